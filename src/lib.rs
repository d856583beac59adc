pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod logging;
pub mod market;
mod state;
pub mod store;

use config::ClientConfigArgs;
use db::initialize_pool_from_path;
use error::AppError;
use health::store_health;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub use config::{ClientConfig, MarketSource};
pub use market::types::{ConnectionState, PriceHistoryArgs};
pub use store::{MarketStore, StoreEvent};

const HEALTH_LOG_INTERVAL_SECS: u64 = 30;
/// Symbols watched on a first run with no saved watchlist.
const FIRST_RUN_WATCHLIST_LEN: usize = 3;

/// Runs the client until ctrl-c: restores saved state, keeps the session
/// alive and logs store events plus a periodic health line.
pub async fn run() -> Result<(), AppError> {
    let config = ClientConfigArgs::from_env().normalize()?;
    logging::init_tracing(&config.log_level);
    info!(
        demo = config.is_demo(),
        db = %config.db_path.display(),
        "market sync client starting"
    );

    let db_pool = initialize_pool_from_path(&config.db_path).await?;
    let store = MarketStore::new(config, Some(db_pool));
    let mut events = store.subscribe_events();

    let preferences = store.rehydrate().await?;
    match store.fetch_symbols().await {
        Ok(symbols) if preferences.watchlist.is_empty() => {
            for symbol in symbols.iter().take(FIRST_RUN_WATCHLIST_LEN) {
                store.add_to_watchlist(&symbol.symbol).await?;
                if let Err(error) = store.fetch_market_data(&symbol.symbol).await {
                    warn!(symbol = %symbol.symbol, %error, "market data fetch failed");
                }
            }
        }
        Ok(symbols) => debug!(count = symbols.len(), "symbol list loaded"),
        Err(error) => warn!(%error, "symbol list unavailable"),
    }

    let mut heartbeat = tokio::time::interval(Duration::from_secs(HEALTH_LOG_INTERVAL_SECS));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(error) = signal {
                    warn!(%error, "ctrl-c handler failed");
                }
                break;
            }
            _ = heartbeat.tick() => {
                let report = store_health(&store).await;
                match simd_json::serde::to_string(&report) {
                    Ok(json) => info!(health = %json, "heartbeat"),
                    Err(error) => warn!(%error, "failed to encode health report"),
                }
            }
            event = events.recv() => match event {
                Ok(StoreEvent::ConnectionChanged(state)) => {
                    info!(state = state.as_str(), "connection state changed");
                }
                Ok(StoreEvent::Error(message)) => warn!(%message, "store error"),
                Ok(event) => debug!(?event, "store event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    store.disconnect().await;
    info!("market sync client stopped");
    Ok(())
}
