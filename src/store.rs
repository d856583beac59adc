use crate::config::{ClientConfig, MarketSource};
use crate::error::AppError;
use crate::market::api;
use crate::market::cache::CacheWrite;
use crate::market::demo::{build_demo_history, demo_symbols, generate_demo_market_data};
use crate::market::now_unix_ms;
use crate::market::persistence::{load_preferences, save_preferences};
use crate::market::stream::{run_demo_feed, run_live_connection};
use crate::market::types::{
    normalize_symbol, Candle, ClientPreferences, ConnectionState, MarketData, OrderBook,
    PriceHistoryArgs, SymbolInfo, TickerUpdate, Trade, MAX_WATCHLIST_LEN,
};
use crate::state::{MarketStreamHandle, SharedState};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Change notifications for observers. Payloads name what changed; the
/// current value is read back through the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    ConnectionChanged(ConnectionState),
    MarketDataUpdated { symbol: String },
    TickerUpdated { symbol: String },
    OrderBookUpdated { symbol: String },
    TradeReceived { symbol: String },
    SymbolsLoaded { count: usize },
    PriceHistoryLoaded { symbol: String },
    PreferencesChanged,
    Error(String),
}

/// Client-side market data store: one push session, a symbol-keyed cache and
/// the user's selection and watchlist. Cloning shares the same store.
#[derive(Clone)]
pub struct MarketStore {
    shared: Arc<SharedState>,
    stream: Arc<Mutex<Option<MarketStreamHandle>>>,
}

impl MarketStore {
    pub fn new(config: ClientConfig, db_pool: Option<SqlitePool>) -> Self {
        Self {
            shared: Arc::new(SharedState::new(config, db_pool)),
            stream: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn started_at(&self) -> Instant {
        self.shared.started_at
    }

    pub fn db_pool(&self) -> Option<&SqlitePool> {
        self.shared.db_pool.as_ref()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.shared.subscribe_events()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection_state()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.link.lock().manager.reconnect_attempts()
    }

    pub fn active_subscription_count(&self) -> usize {
        self.shared.link.lock().manager.registry().len()
    }

    /// Opens the push session. A no-op while one is connected or connecting.
    pub async fn connect(&self) {
        // The slot lock serializes connect against disconnect.
        let mut stream_slot = self.stream.lock().await;
        if !self.shared.mark_connecting() {
            debug!("connect ignored, session already active");
            return;
        }

        if let Some(handle) = stream_slot.take() {
            handle.cancellation_token.cancel();
            let _ = handle.join_handle.await;
        }

        let cancellation_token = CancellationToken::new();
        let task_token = cancellation_token.clone();
        let shared = Arc::clone(&self.shared);

        let join_handle = match &self.shared.config.source {
            MarketSource::Demo => {
                info!("opening demo market session");
                shared.mark_open(None);
                let tick_interval = Duration::from_millis(self.shared.config.demo_tick_interval_ms);
                tokio::spawn(async move {
                    run_demo_feed(shared, tick_interval, task_token).await;
                })
            }
            MarketSource::Live { ws_url, .. } => {
                info!(url = %ws_url, "opening live market session");
                let ws_url = ws_url.clone();
                tokio::spawn(async move {
                    run_live_connection(shared, ws_url, task_token).await;
                })
            }
        };

        *stream_slot = Some(MarketStreamHandle {
            cancellation_token,
            join_handle,
        });
    }

    /// Closes the session, drops the subscription registry and cancels any
    /// scheduled reconnect. Cached data stays readable.
    pub async fn disconnect(&self) {
        let mut stream_slot = self.stream.lock().await;
        if let Some(handle) = stream_slot.take() {
            handle.cancellation_token.cancel();
            let _ = handle.join_handle.await;
        }

        self.shared.mark_disconnected();
        info!("market session closed");
    }

    /// True while a session task (live driver or demo feed) is still running.
    pub async fn session_task_active(&self) -> bool {
        self.stream
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.join_handle.is_finished())
    }

    pub fn preferences(&self) -> ClientPreferences {
        self.shared.preferences.lock().clone()
    }

    pub fn selected_symbol(&self) -> Option<String> {
        self.shared.preferences.lock().selected_symbol.clone()
    }

    pub fn watchlist(&self) -> Vec<String> {
        self.shared.preferences.lock().watchlist.clone()
    }

    /// Selects `symbol` for full-depth updates, or clears the selection.
    pub async fn select_symbol(&self, symbol: Option<&str>) -> Result<(), AppError> {
        let symbol = symbol.map(normalize_symbol).transpose()?;
        let preferences = {
            let mut preferences = self.shared.preferences.lock();
            if preferences.selected_symbol == symbol {
                return Ok(());
            }
            preferences.selected_symbol = symbol;
            preferences.clone()
        };
        self.apply_preferences(preferences).await
    }

    pub async fn add_to_watchlist(&self, symbol: &str) -> Result<(), AppError> {
        let symbol = normalize_symbol(symbol)?;
        let preferences = {
            let mut preferences = self.shared.preferences.lock();
            if preferences.watchlist.contains(&symbol) {
                return Ok(());
            }
            if preferences.watchlist.len() >= MAX_WATCHLIST_LEN {
                return Err(AppError::InvalidArgument(format!(
                    "watchlist holds at most {MAX_WATCHLIST_LEN} symbols"
                )));
            }
            preferences.watchlist.push(symbol);
            preferences.clone()
        };
        self.apply_preferences(preferences).await
    }

    pub async fn remove_from_watchlist(&self, symbol: &str) -> Result<(), AppError> {
        let symbol = normalize_symbol(symbol)?;
        let preferences = {
            let mut preferences = self.shared.preferences.lock();
            let before = preferences.watchlist.len();
            preferences.watchlist.retain(|watched| watched != &symbol);
            if preferences.watchlist.len() == before {
                return Ok(());
            }
            preferences.clone()
        };
        self.apply_preferences(preferences).await
    }

    async fn apply_preferences(&self, preferences: ClientPreferences) -> Result<(), AppError> {
        let sent = self.shared.reconcile_subscriptions();
        debug!(
            selected = ?preferences.selected_symbol,
            watchlist = preferences.watchlist.len(),
            frames = sent,
            "preferences changed"
        );
        self.shared.publish(StoreEvent::PreferencesChanged);
        self.persist_preferences(&preferences).await
    }

    async fn persist_preferences(&self, preferences: &ClientPreferences) -> Result<(), AppError> {
        let Some(pool) = &self.shared.db_pool else {
            return Ok(());
        };
        save_preferences(pool, preferences)
            .await
            .map_err(|error| self.shared.record_failure("persist preferences", error))
    }

    /// Restores the persisted selection and watchlist, opens the session and
    /// refreshes every tracked symbol. Per-symbol fetch failures are logged.
    pub async fn rehydrate(&self) -> Result<ClientPreferences, AppError> {
        let preferences = match &self.shared.db_pool {
            Some(pool) => load_preferences(pool)
                .await
                .map_err(|error| self.shared.record_failure("load preferences", error))?,
            None => ClientPreferences::default(),
        };

        *self.shared.preferences.lock() = preferences.clone();
        self.shared.reconcile_subscriptions();
        info!(
            selected = ?preferences.selected_symbol,
            watchlist = preferences.watchlist.len(),
            "client state rehydrated"
        );

        self.connect().await;

        let mut tracked = preferences.watchlist.clone();
        if let Some(selected) = &preferences.selected_symbol {
            if !tracked.contains(selected) {
                tracked.push(selected.clone());
            }
        }
        for symbol in &tracked {
            if let Err(error) = self.fetch_market_data(symbol).await {
                warn!(%symbol, %error, "initial market data fetch failed");
            }
        }

        Ok(preferences)
    }

    pub async fn fetch_symbols(&self) -> Result<Vec<SymbolInfo>, AppError> {
        let symbols = match &self.shared.config.source {
            MarketSource::Demo => demo_symbols(),
            MarketSource::Live { api_url, .. } => {
                api::fetch_symbols(&self.shared.http_client, api_url)
                    .await
                    .map_err(|error| self.shared.record_failure("fetch symbols", error))?
            }
        };

        self.shared
            .cache
            .write()
            .replace_symbols(symbols.clone(), now_unix_ms());
        self.shared.publish(StoreEvent::SymbolsLoaded {
            count: symbols.len(),
        });
        Ok(symbols)
    }

    /// Fetches a full snapshot for `symbol`. When a push update lands while
    /// the request is in flight, the cached value wins and is returned.
    pub async fn fetch_market_data(&self, symbol: &str) -> Result<MarketData, AppError> {
        let symbol = normalize_symbol(symbol)?;
        let observed = self.shared.cache.read().version(&symbol);

        let fetched = match &self.shared.config.source {
            MarketSource::Demo => demo_market_data(&symbol),
            MarketSource::Live { api_url, .. } => {
                api::fetch_market_data(&self.shared.http_client, api_url, &symbol)
                    .await
                    .map_err(|error| self.shared.record_failure("fetch market data", error))?
            }
        };

        let write = self
            .shared
            .cache
            .write()
            .apply_fetched_market_data(fetched.clone(), observed, now_unix_ms());
        match write {
            CacheWrite::Applied => {
                self.shared
                    .publish(StoreEvent::MarketDataUpdated { symbol });
                Ok(fetched)
            }
            CacheWrite::Rebased => {
                debug!(%symbol, "fetched snapshot rebased onto newer ticker");
                let stored = self.market_data(&symbol).unwrap_or(fetched);
                self.shared
                    .publish(StoreEvent::MarketDataUpdated { symbol });
                Ok(stored)
            }
            CacheWrite::Stale { current, observed } => {
                debug!(%symbol, current, observed, "discarding stale market data fetch");
                Ok(self.market_data(&symbol).unwrap_or(fetched))
            }
        }
    }

    pub async fn fetch_price_history(
        &self,
        symbol: &str,
        args: PriceHistoryArgs,
    ) -> Result<Vec<Candle>, AppError> {
        let symbol = normalize_symbol(symbol)?;
        let query = args.normalize()?;

        let candles = match &self.shared.config.source {
            MarketSource::Demo => build_demo_history(&symbol, query, now_unix_ms()),
            MarketSource::Live { api_url, .. } => {
                api::fetch_price_history(&self.shared.http_client, api_url, &symbol, query)
                    .await
                    .map_err(|error| self.shared.record_failure("fetch price history", error))?
            }
        };

        self.shared
            .cache
            .write()
            .apply_price_history(&symbol, candles.clone(), now_unix_ms());
        self.shared
            .publish(StoreEvent::PriceHistoryLoaded { symbol });
        Ok(candles)
    }

    pub fn error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    pub fn clear_error(&self) {
        *self.shared.last_error.lock() = None;
    }

    pub fn symbols(&self) -> Vec<SymbolInfo> {
        self.shared.cache.read().symbols().to_vec()
    }

    pub fn market_data(&self, symbol: &str) -> Option<MarketData> {
        self.shared.cache.read().market_data(symbol).cloned()
    }

    pub fn ticker(&self, symbol: &str) -> Option<TickerUpdate> {
        self.shared.cache.read().ticker(symbol).cloned()
    }

    pub fn order_book(&self, symbol: &str) -> Option<OrderBook> {
        self.shared.cache.read().order_book(symbol).cloned()
    }

    /// Newest first, at most the retained window.
    pub fn recent_trades(&self, symbol: &str) -> Vec<Trade> {
        self.shared.cache.read().recent_trades(symbol).to_vec()
    }

    pub fn price_history(&self, symbol: &str) -> Option<Vec<Candle>> {
        self.shared
            .cache
            .read()
            .price_history(symbol)
            .map(<[Candle]>::to_vec)
    }

    pub fn last_update(&self) -> Option<i64> {
        self.shared.cache.read().last_update()
    }

    /// True when `symbol` is tracked and the session is live, so its cached
    /// entry is still being refreshed.
    pub fn is_live(&self, symbol: &str) -> bool {
        self.connection_state() == ConnectionState::Connected
            && self.shared.preferences.lock().tracks(symbol)
    }
}

fn demo_market_data(symbol: &str) -> MarketData {
    generate_demo_market_data(symbol, &mut rand::thread_rng(), now_unix_ms())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{initialize_pool_from_path, unique_db_path};
    use crate::market::demo::PRICE_JITTER;
    use crate::market::types::{HistoryInterval, InboundFrame};

    fn demo_store() -> MarketStore {
        MarketStore::new(ClientConfig::demo(), None)
    }

    #[tokio::test]
    async fn demo_connect_subscribes_watchlist() {
        let store = demo_store();
        store.add_to_watchlist("eurusd").await.expect("add should succeed");
        store.add_to_watchlist("GBPUSD").await.expect("add should succeed");

        store.connect().await;

        assert_eq!(store.connection_state(), ConnectionState::Connected);
        assert_eq!(store.active_subscription_count(), 2);
        assert!(store.is_live("EURUSD"));
        assert!(!store.is_live("AUDUSD"));

        store.disconnect().await;
        assert_eq!(store.connection_state(), ConnectionState::Disconnected);
        assert_eq!(store.active_subscription_count(), 0);
    }

    #[tokio::test]
    async fn second_connect_is_a_noop() {
        let store = demo_store();
        store.connect().await;
        let mut events = store.subscribe_events();

        store.connect().await;

        assert_eq!(store.connection_state(), ConnectionState::Connected);
        assert!(events.try_recv().is_err());
        store.disconnect().await;
    }

    #[tokio::test]
    async fn racing_connect_and_disconnect_settle_consistently() {
        for _ in 0..20 {
            let store = demo_store();
            let racer = store.clone();
            tokio::join!(store.connect(), racer.disconnect());

            let running = store.session_task_active().await;
            let connected = store.connection_state() == ConnectionState::Connected;
            assert_eq!(running, connected);
            store.disconnect().await;
            assert!(!store.session_task_active().await);
        }
    }

    #[tokio::test]
    async fn selecting_symbol_adds_depth_subscriptions() {
        let store = demo_store();
        store.add_to_watchlist("EURUSD").await.expect("add should succeed");
        store.connect().await;

        store
            .select_symbol(Some("EURUSD"))
            .await
            .expect("select should succeed");
        assert_eq!(store.active_subscription_count(), 3);

        store
            .select_symbol(Some("BTCUSD"))
            .await
            .expect("select should succeed");
        assert_eq!(store.active_subscription_count(), 4);

        store.select_symbol(None).await.expect("clear should succeed");
        assert_eq!(store.active_subscription_count(), 1);
        store.disconnect().await;
    }

    #[tokio::test]
    async fn watchlist_rejects_invalid_symbols_and_ignores_duplicates() {
        let store = demo_store();
        store.add_to_watchlist("EURUSD").await.expect("add should succeed");
        store.add_to_watchlist("eurusd").await.expect("duplicate is a no-op");

        assert!(store.add_to_watchlist("EUR/USD").await.is_err());
        assert_eq!(store.watchlist(), vec!["EURUSD".to_string()]);

        store
            .remove_from_watchlist("EURUSD")
            .await
            .expect("remove should succeed");
        assert!(store.watchlist().is_empty());
    }

    #[tokio::test]
    async fn demo_fetch_market_data_stays_near_base_price() {
        let store = demo_store();

        let data = store
            .fetch_market_data("BTCUSD")
            .await
            .expect("demo fetch should succeed");

        let bound = 50_000.0 * PRICE_JITTER * 2.0;
        assert!((data.price - 50_000.0).abs() <= bound);
        assert_eq!(store.market_data("BTCUSD"), Some(data));
    }

    #[tokio::test]
    async fn push_update_during_fetch_wins() {
        let store = demo_store();
        store
            .fetch_market_data("EURUSD")
            .await
            .expect("seed fetch should succeed");

        let observed = store.shared.cache.read().version("EURUSD");
        let pushed = {
            let mut cache = store.shared.cache.write();
            crate::market::router::apply_frame(
                &mut cache,
                InboundFrame::Ticker(TickerUpdate {
                    symbol: "EURUSD".to_string(),
                    price: Some(2.0),
                    ..TickerUpdate::default()
                }),
                now_unix_ms(),
            );
            cache
                .market_data("EURUSD")
                .cloned()
                .expect("ticker should merge into existing entry")
        };

        let late_fetch = demo_market_data("EURUSD");
        let write = store.shared.cache.write().apply_fetched_market_data(
            late_fetch,
            observed,
            now_unix_ms(),
        );

        assert!(matches!(write, CacheWrite::Stale { .. }));
        assert_eq!(store.market_data("EURUSD"), Some(pushed));
    }

    #[tokio::test]
    async fn depth_frames_during_first_fetch_keep_the_snapshot() {
        let store = demo_store();
        store
            .select_symbol(Some("BTCUSD"))
            .await
            .expect("select should succeed");
        let observed = store.shared.cache.read().version("BTCUSD");

        let mut book = br#"{"type":"orderbook","channel":"orderbook","data":{"symbol":"BTCUSD","bids":[{"price":49990.0,"quantity":1.0}],"asks":[],"timestamp":1}}"#
            .to_vec();
        store.shared.ingest_frame(&mut book);

        let write = store.shared.cache.write().apply_fetched_market_data(
            demo_market_data("BTCUSD"),
            observed,
            now_unix_ms(),
        );
        assert_eq!(write, CacheWrite::Applied);

        let mut ticker =
            br#"{"type":"ticker","channel":"ticker","data":{"symbol":"BTCUSD","price":50123.0}}"#
                .to_vec();
        store.shared.ingest_frame(&mut ticker);

        let data = store
            .market_data("BTCUSD")
            .expect("tracked symbol should keep its market data");
        assert_eq!(data.price, 50_123.0);
    }

    #[tokio::test]
    async fn demo_symbols_and_history_populate_cache() {
        let store = demo_store();
        let mut events = store.subscribe_events();

        let symbols = store.fetch_symbols().await.expect("demo symbols should load");
        assert!(!symbols.is_empty());
        assert_eq!(store.symbols().len(), symbols.len());
        assert_eq!(
            events.recv().await.expect("event should arrive"),
            StoreEvent::SymbolsLoaded {
                count: symbols.len()
            }
        );

        let candles = store
            .fetch_price_history(
                "ethbtc",
                PriceHistoryArgs {
                    interval: Some(HistoryInterval::M15),
                    limit: Some(20),
                },
            )
            .await
            .expect("demo history should load");
        assert_eq!(candles.len(), 20);
        assert_eq!(store.price_history("ETHBTC"), Some(candles));
    }

    #[tokio::test]
    async fn rehydrate_restores_persisted_preferences() {
        let db_path = unique_db_path("store-rehydrate");
        let pool = initialize_pool_from_path(&db_path)
            .await
            .expect("pool initialization should succeed");

        let first = MarketStore::new(ClientConfig::demo(), Some(pool.clone()));
        first.add_to_watchlist("GBPUSD").await.expect("add should succeed");
        first
            .select_symbol(Some("BTCUSD"))
            .await
            .expect("select should succeed");

        let second = MarketStore::new(ClientConfig::demo(), Some(pool.clone()));
        let restored = second.rehydrate().await.expect("rehydrate should succeed");

        assert_eq!(restored.watchlist, vec!["GBPUSD".to_string()]);
        assert_eq!(restored.selected_symbol.as_deref(), Some("BTCUSD"));
        assert_eq!(second.connection_state(), ConnectionState::Connected);
        assert!(second.market_data("GBPUSD").is_some());
        assert!(second.market_data("BTCUSD").is_some());

        second.disconnect().await;
        drop(pool);
        let _ = std::fs::remove_file(db_path);
    }

    #[tokio::test]
    async fn failed_fetch_surfaces_error_until_cleared() {
        let config = ClientConfig {
            source: MarketSource::Live {
                api_url: "http://127.0.0.1:9".to_string(),
                ws_url: "ws://127.0.0.1:9".to_string(),
            },
            ..ClientConfig::demo()
        };
        let store = MarketStore::new(config, None);

        assert!(store.fetch_symbols().await.is_err());
        let message = store.error().expect("error should be recorded");
        assert!(message.starts_with("fetch symbols"));

        store.clear_error();
        assert!(store.error().is_none());
    }
}
