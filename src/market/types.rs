use crate::error::AppError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_HISTORY_INTERVAL: HistoryInterval = HistoryInterval::H1;
pub const DEFAULT_HISTORY_LIMIT: u16 = 100;
pub const MIN_HISTORY_LIMIT: u16 = 1;
pub const MAX_HISTORY_LIMIT: u16 = 1_000;
pub const MAX_WATCHLIST_LEN: usize = 64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    #[serde(rename = "ticker")]
    Ticker,
    #[serde(rename = "orderbook")]
    OrderBook,
    #[serde(rename = "trades")]
    Trades,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Ticker, Channel::OrderBook, Channel::Trades];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::OrderBook => "orderbook",
            Self::Trades => "trades",
        }
    }

    /// Inbound `type` value that carries data for this channel.
    pub fn message_type(self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::OrderBook => "orderbook",
            Self::Trades => "trade",
        }
    }

    pub fn from_frame_route(message_type: &str, channel: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.message_type() == message_type && candidate.as_str() == channel)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subscription {
    pub channel: Channel,
    pub symbol: String,
}

impl Subscription {
    pub fn new(channel: Channel, symbol: impl Into<String>) -> Self {
        Self {
            channel,
            symbol: symbol.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlFrame {
    #[serde(rename = "type")]
    pub action: ControlAction,
    pub channel: Channel,
    pub symbol: String,
}

impl ControlFrame {
    pub fn subscribe(subscription: &Subscription) -> Self {
        Self {
            action: ControlAction::Subscribe,
            channel: subscription.channel,
            symbol: subscription.symbol.clone(),
        }
    }

    pub fn unsubscribe(subscription: &Subscription) -> Self {
        Self {
            action: ControlAction::Unsubscribe,
            channel: subscription.channel,
            symbol: subscription.symbol.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, AppError> {
        Ok(simd_json::serde::to_string(self)?)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SymbolStatus {
    Trading,
    Halted,
    Break,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub price_precision: u8,
    pub quantity_precision: u8,
    pub status: SymbolStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarketData {
    pub symbol: String,
    pub price: f64,
    pub previous_price: f64,
    pub price_change: f64,
    pub price_change_percent: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub volume_24h: f64,
    pub trades_24h: u64,
    pub bid: f64,
    pub ask: f64,
    pub spread: f64,
    pub timestamp: i64,
    pub is_market_open: bool,
}

impl MarketData {
    /// Builds the next record from this one, taking every field the ticker carries.
    pub fn merged_with(&self, update: &TickerUpdate, now_ms: i64) -> Self {
        let price = update.price.unwrap_or(self.price);
        let previous_price = match (update.previous_price, update.price) {
            (Some(previous), _) => previous,
            (None, Some(_)) => self.price,
            (None, None) => self.previous_price,
        };
        let bid = update.bid.unwrap_or(self.bid);
        let ask = update.ask.unwrap_or(self.ask);
        let spread = match update.spread {
            Some(spread) => spread,
            None if update.bid.is_some() || update.ask.is_some() => (ask - bid).max(0.0),
            None => self.spread,
        };

        Self {
            symbol: self.symbol.clone(),
            price,
            previous_price,
            price_change: update.price_change.unwrap_or(self.price_change),
            price_change_percent: update
                .price_change_percent
                .unwrap_or(self.price_change_percent),
            high_24h: update.high_24h.unwrap_or(self.high_24h),
            low_24h: update.low_24h.unwrap_or(self.low_24h),
            volume_24h: update.volume_24h.unwrap_or(self.volume_24h),
            trades_24h: update.trades_24h.unwrap_or(self.trades_24h),
            bid,
            ask,
            spread,
            timestamp: now_ms,
            is_market_open: update.is_market_open.unwrap_or(self.is_market_open),
        }
    }
}

/// Push-feed ticker. Every statistic is optional; absent fields keep their cached value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TickerUpdate {
    pub symbol: String,
    pub price: Option<f64>,
    pub previous_price: Option<f64>,
    pub price_change: Option<f64>,
    pub price_change_percent: Option<f64>,
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    pub volume_24h: Option<f64>,
    pub trades_24h: Option<u64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub spread: Option<f64>,
    pub timestamp: Option<i64>,
    pub is_market_open: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BookLevel {
    pub price: f64,
    pub quantity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderBook {
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub price: f64,
    pub quantity: f64,
    pub side: TradeSide,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub t: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HistoryInterval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

impl HistoryInterval {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
            Self::W1 => "1w",
        }
    }

    pub fn parse_str(raw: &str) -> Result<Self, AppError> {
        match raw.trim() {
            "1m" => Ok(Self::M1),
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "1h" => Ok(Self::H1),
            "4h" => Ok(Self::H4),
            "1d" => Ok(Self::D1),
            "1w" => Ok(Self::W1),
            other => Err(AppError::InvalidArgument(format!(
                "unsupported history interval '{other}'"
            ))),
        }
    }

    pub fn duration_ms(self) -> i64 {
        match self {
            Self::M1 => 60_000,
            Self::M5 => 300_000,
            Self::M15 => 900_000,
            Self::H1 => 3_600_000,
            Self::H4 => 14_400_000,
            Self::D1 => 86_400_000,
            Self::W1 => 604_800_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PriceHistoryArgs {
    pub interval: Option<HistoryInterval>,
    pub limit: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceHistoryQuery {
    pub interval: HistoryInterval,
    pub limit: u16,
}

impl PriceHistoryArgs {
    pub fn normalize(self) -> Result<PriceHistoryQuery, AppError> {
        let interval = self.interval.unwrap_or(DEFAULT_HISTORY_INTERVAL);
        let limit = self.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        if !(MIN_HISTORY_LIMIT..=MAX_HISTORY_LIMIT).contains(&limit) {
            return Err(AppError::InvalidArgument(format!(
                "history limit must be between {MIN_HISTORY_LIMIT} and {MAX_HISTORY_LIMIT}"
            )));
        }
        Ok(PriceHistoryQuery { interval, limit })
    }
}

/// Uniform `{ success, data, error }` wrapper around every REST payload.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn into_result(self) -> Result<T, AppError> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(AppError::Api(
                self.error
                    .unwrap_or_else(|| "response carried no data".to_string()),
            )),
            (false, _) => Err(AppError::Api(
                self.error.unwrap_or_else(|| "request failed".to_string()),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientPreferences {
    pub selected_symbol: Option<String>,
    pub watchlist: Vec<String>,
}

impl ClientPreferences {
    pub fn normalize(self) -> Result<Self, AppError> {
        let selected_symbol = self
            .selected_symbol
            .as_deref()
            .map(normalize_symbol)
            .transpose()?;

        let mut watchlist: Vec<String> = Vec::with_capacity(self.watchlist.len());
        for raw in &self.watchlist {
            let symbol = normalize_symbol(raw)?;
            if !watchlist.contains(&symbol) {
                watchlist.push(symbol);
            }
        }
        if watchlist.len() > MAX_WATCHLIST_LEN {
            return Err(AppError::InvalidArgument(format!(
                "watchlist holds at most {MAX_WATCHLIST_LEN} symbols"
            )));
        }

        Ok(Self {
            selected_symbol,
            watchlist,
        })
    }

    /// Ticker for every watched symbol, full depth for the selected one.
    pub fn desired_subscriptions(&self) -> Vec<Subscription> {
        let mut desired: Vec<Subscription> = self
            .watchlist
            .iter()
            .map(|symbol| Subscription::new(Channel::Ticker, symbol.clone()))
            .collect();

        if let Some(selected) = &self.selected_symbol {
            for channel in Channel::ALL {
                let subscription = Subscription::new(channel, selected.clone());
                if !desired.contains(&subscription) {
                    desired.push(subscription);
                }
            }
        }

        desired
    }

    pub fn tracks(&self, symbol: &str) -> bool {
        self.selected_symbol.as_deref() == Some(symbol)
            || self.watchlist.iter().any(|watched| watched == symbol)
    }
}

#[derive(Debug, Deserialize)]
struct FrameEnvelope {
    #[serde(rename = "type")]
    kind: String,
    channel: String,
    data: simd_json::OwnedValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Ticker(TickerUpdate),
    OrderBook(OrderBook),
    Trade(Trade),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Known(InboundFrame),
    Unrecognized { kind: String, channel: String },
}

pub fn decode_frame(payload: &mut [u8]) -> Result<DecodedFrame, AppError> {
    let envelope: FrameEnvelope = simd_json::serde::from_slice(payload)?;
    let Some(channel) = Channel::from_frame_route(&envelope.kind, &envelope.channel) else {
        return Ok(DecodedFrame::Unrecognized {
            kind: envelope.kind,
            channel: envelope.channel,
        });
    };

    let frame = match channel {
        Channel::Ticker => InboundFrame::Ticker(simd_json::serde::from_owned_value(envelope.data)?),
        Channel::OrderBook => {
            InboundFrame::OrderBook(simd_json::serde::from_owned_value(envelope.data)?)
        }
        Channel::Trades => InboundFrame::Trade(simd_json::serde::from_owned_value(envelope.data)?),
    };
    Ok(DecodedFrame::Known(frame))
}

pub fn normalize_symbol(raw: &str) -> Result<String, AppError> {
    let symbol = raw.trim().to_ascii_uppercase();
    if symbol.is_empty() || !symbol.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(AppError::InvalidArgument(format!(
            "symbol '{raw}' must be non-empty alphanumeric ASCII"
        )));
    }
    Ok(symbol)
}
