use crate::config::ClientConfig;
use crate::error::AppError;
use crate::market::cache::MarketCache;
use crate::market::connection::ConnectionManager;
use crate::market::now_unix_ms;
use crate::market::router::{route_message, RouteOutcome};
use crate::market::types::{ClientPreferences, ConnectionState, ControlFrame};
use crate::store::StoreEvent;
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use sqlx::SqlitePool;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const STORE_EVENT_CAPACITY: usize = 1_024;

pub struct MarketStreamHandle {
    pub cancellation_token: CancellationToken,
    pub join_handle: tokio::task::JoinHandle<()>,
}

/// Connection lifecycle and the live session's outbound queue, locked as one
/// unit so a subscription change cannot land between a session opening and
/// its queue being installed.
#[derive(Debug, Default)]
pub struct LinkState {
    pub manager: ConnectionManager,
    pub outbound: Option<mpsc::UnboundedSender<ControlFrame>>,
}

impl LinkState {
    fn send_frames(&self, frames: Vec<ControlFrame>) {
        let Some(outbound) = &self.outbound else {
            return;
        };
        for frame in frames {
            if outbound.send(frame).is_err() {
                break;
            }
        }
    }
}

/// State shared between the store facade and its background stream task.
///
/// Lock order is `link` before `preferences`; neither is held across an await.
pub struct SharedState {
    pub config: ClientConfig,
    pub http_client: Client,
    pub db_pool: Option<SqlitePool>,
    pub started_at: Instant,
    pub cache: RwLock<MarketCache>,
    pub link: Mutex<LinkState>,
    pub preferences: Mutex<ClientPreferences>,
    pub last_error: Mutex<Option<String>>,
    events: broadcast::Sender<StoreEvent>,
}

impl SharedState {
    pub fn new(config: ClientConfig, db_pool: Option<SqlitePool>) -> Self {
        let (events, _) = broadcast::channel(STORE_EVENT_CAPACITY);
        let link = LinkState {
            manager: ConnectionManager::new(config.max_reconnect_attempts),
            outbound: None,
        };

        Self {
            config,
            http_client: Client::new(),
            db_pool,
            started_at: Instant::now(),
            cache: RwLock::new(MarketCache::default()),
            link: Mutex::new(link),
            preferences: Mutex::new(ClientPreferences::default()),
            last_error: Mutex::new(None),
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn publish(&self, event: StoreEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.link.lock().manager.state()
    }

    pub fn mark_connecting(&self) -> bool {
        let started = self.link.lock().manager.begin_connect();
        if started {
            self.publish(StoreEvent::ConnectionChanged(ConnectionState::Connecting));
        }
        started
    }

    /// Opens the session and queues the full desired subscription set.
    /// Demo sessions pass no queue; their registry still tracks the set.
    pub fn mark_open(&self, outbound: Option<mpsc::UnboundedSender<ControlFrame>>) {
        let queued = {
            let mut link = self.link.lock();
            let desired = self.preferences.lock().desired_subscriptions();
            let frames = link.manager.on_open(&desired);
            let queued = frames.len();
            link.outbound = outbound;
            link.send_frames(frames);
            queued
        };

        info!(subscriptions = queued, "market session open");
        self.publish(StoreEvent::ConnectionChanged(ConnectionState::Connected));
    }

    pub fn mark_transport_error(&self) {
        let message = {
            let mut link = self.link.lock();
            link.outbound = None;
            link.manager.on_error()
        };

        *self.last_error.lock() = Some(message.to_string());
        self.publish(StoreEvent::ConnectionChanged(ConnectionState::Error));
        self.publish(StoreEvent::Error(message.to_string()));
    }

    pub fn mark_closed(&self) -> Option<Duration> {
        let delay = {
            let mut link = self.link.lock();
            link.outbound = None;
            link.manager.on_close()
        };

        self.publish(StoreEvent::ConnectionChanged(ConnectionState::Disconnected));
        delay
    }

    pub fn mark_disconnected(&self) {
        {
            let mut link = self.link.lock();
            link.outbound = None;
            link.manager.disconnect();
        }
        self.publish(StoreEvent::ConnectionChanged(ConnectionState::Disconnected));
    }

    /// Brings the session's subscriptions in line with the current preferences.
    pub fn reconcile_subscriptions(&self) -> usize {
        let mut link = self.link.lock();
        let desired = self.preferences.lock().desired_subscriptions();
        let frames = link.manager.reconcile(&desired);
        let sent = frames.len();
        link.send_frames(frames);
        sent
    }

    pub fn ingest_frame(&self, payload: &mut [u8]) {
        let outcome = route_message(&self.cache, payload, now_unix_ms());
        self.publish_route(outcome);
    }

    pub fn publish_route(&self, outcome: RouteOutcome) {
        match outcome {
            RouteOutcome::Ticker { symbol, merged } => {
                if merged {
                    self.publish(StoreEvent::MarketDataUpdated {
                        symbol: symbol.clone(),
                    });
                }
                self.publish(StoreEvent::TickerUpdated { symbol });
            }
            RouteOutcome::OrderBook { symbol } => {
                self.publish(StoreEvent::OrderBookUpdated { symbol })
            }
            RouteOutcome::Trade { symbol } => self.publish(StoreEvent::TradeReceived { symbol }),
            RouteOutcome::Unrecognized { .. } | RouteOutcome::Malformed => {}
        }
    }

    /// Stores the failure as the observable error string and hands the error back.
    pub fn record_failure(&self, context: &str, error: AppError) -> AppError {
        let message = format!("{context}: {error}");
        warn!(%message, "market store operation failed");
        *self.last_error.lock() = Some(message.clone());
        self.publish(StoreEvent::Error(message));
        error
    }
}
