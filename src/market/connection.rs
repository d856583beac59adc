use crate::market::registry::SubscriptionRegistry;
use crate::market::types::{ConnectionState, ControlFrame, Subscription};
use std::time::Duration;

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const CONNECTION_ERROR_MESSAGE: &str = "market data connection error";

/// Transport lifecycle for the push feed, kept free of I/O so the driver in
/// `stream` owns the socket and this type owns every state transition.
#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    reconnect_attempts: u32,
    max_reconnect_attempts: u32,
    registry: SubscriptionRegistry,
}

impl ConnectionManager {
    pub fn new(max_reconnect_attempts: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            max_reconnect_attempts,
            registry: SubscriptionRegistry::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Returns false when a session is already live or being opened.
    pub fn begin_connect(&mut self) -> bool {
        if matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    /// Marks the session live and replays `desired` into a fresh registry.
    pub fn on_open(&mut self, desired: &[Subscription]) -> Vec<ControlFrame> {
        self.state = ConnectionState::Connected;
        self.reconnect_attempts = 0;
        self.registry.clear();
        self.registry.reconcile(desired, true)
    }

    pub fn on_error(&mut self) -> &'static str {
        self.state = ConnectionState::Error;
        CONNECTION_ERROR_MESSAGE
    }

    /// Returns the delay before the next automatic attempt, or `None` once the
    /// attempt budget is spent.
    pub fn on_close(&mut self) -> Option<Duration> {
        self.state = ConnectionState::Disconnected;
        if self.reconnect_attempts >= self.max_reconnect_attempts {
            return None;
        }
        let delay = reconnect_delay(self.reconnect_attempts);
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        Some(delay)
    }

    pub fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.registry.clear();
    }

    pub fn subscribe(&mut self, subscription: Subscription) -> Option<ControlFrame> {
        let connected = self.is_connected();
        self.registry.subscribe(subscription, connected)
    }

    pub fn unsubscribe(&mut self, subscription: &Subscription) -> Option<ControlFrame> {
        let connected = self.is_connected();
        self.registry.unsubscribe(subscription, connected)
    }

    pub fn reconcile(&mut self, desired: &[Subscription]) -> Vec<ControlFrame> {
        let connected = self.is_connected();
        self.registry.reconcile(desired, connected)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECONNECT_ATTEMPTS)
    }
}

/// Pure exponential backoff: `2^attempts` seconds, no jitter.
pub fn reconnect_delay(attempts: u32) -> Duration {
    Duration::from_secs(1_u64 << attempts.min(16))
}
