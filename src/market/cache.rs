use crate::market::types::{Candle, MarketData, OrderBook, SymbolInfo, TickerUpdate, Trade};
use std::collections::HashMap;

pub const MAX_RECENT_TRADES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheWrite {
    Applied,
    /// A ticker landed first and no record existed yet; the snapshot was
    /// stored with that ticker laid over it.
    Rebased,
    /// A newer write landed after the caller captured `observed`.
    Stale { current: u64, observed: u64 },
}

/// Latest known state per symbol.
///
/// The market data slot of each symbol carries a version, bumped by tickers
/// and fetched snapshots. One-shot fetches capture the version before their
/// request and are rejected if it moved, so a slow response can never
/// overwrite a fresher push update. Order books and trades leave it alone.
#[derive(Debug, Default)]
pub struct MarketCache {
    symbols: Vec<SymbolInfo>,
    market_data: HashMap<String, MarketData>,
    tickers: HashMap<String, TickerUpdate>,
    order_books: HashMap<String, OrderBook>,
    recent_trades: HashMap<String, Vec<Trade>>,
    price_history: HashMap<String, Vec<Candle>>,
    versions: HashMap<String, u64>,
    last_update: Option<i64>,
}

impl MarketCache {
    pub fn version(&self, symbol: &str) -> u64 {
        self.versions.get(symbol).copied().unwrap_or(0)
    }

    /// Stores the ticker and merges it into existing market data. Returns true
    /// when a market data record was updated.
    pub fn apply_ticker(&mut self, update: TickerUpdate, now_ms: i64) -> bool {
        let merged = match self.market_data.get(&update.symbol) {
            Some(current) => {
                let next = current.merged_with(&update, now_ms);
                self.market_data.insert(update.symbol.clone(), next);
                true
            }
            None => false,
        };
        self.bump(&update.symbol);
        self.last_update = Some(now_ms);
        self.tickers.insert(update.symbol.clone(), update);
        merged
    }

    pub fn apply_order_book(&mut self, book: OrderBook, now_ms: i64) {
        self.last_update = Some(now_ms);
        self.order_books.insert(book.symbol.clone(), book);
    }

    pub fn apply_trade(&mut self, trade: Trade, now_ms: i64) {
        self.last_update = Some(now_ms);
        let trades = self.recent_trades.entry(trade.symbol.clone()).or_default();
        trades.insert(0, trade);
        trades.truncate(MAX_RECENT_TRADES);
    }

    pub fn apply_fetched_market_data(
        &mut self,
        data: MarketData,
        observed: u64,
        now_ms: i64,
    ) -> CacheWrite {
        let current = self.version(&data.symbol);
        let write = if current <= observed {
            CacheWrite::Applied
        } else if self.market_data.contains_key(&data.symbol) {
            return CacheWrite::Stale { current, observed };
        } else {
            CacheWrite::Rebased
        };

        let record = match (write, self.tickers.get(&data.symbol)) {
            (CacheWrite::Rebased, Some(ticker)) => data.merged_with(ticker, now_ms),
            _ => data,
        };
        self.bump(&record.symbol);
        self.last_update = Some(now_ms);
        self.market_data.insert(record.symbol.clone(), record);
        write
    }

    pub fn apply_price_history(&mut self, symbol: &str, candles: Vec<Candle>, now_ms: i64) {
        self.price_history.insert(symbol.to_string(), candles);
        self.last_update = Some(now_ms);
    }

    pub fn replace_symbols(&mut self, symbols: Vec<SymbolInfo>, now_ms: i64) {
        self.symbols = symbols;
        self.last_update = Some(now_ms);
    }

    pub fn symbols(&self) -> &[SymbolInfo] {
        &self.symbols
    }

    pub fn market_data(&self, symbol: &str) -> Option<&MarketData> {
        self.market_data.get(symbol)
    }

    pub fn ticker(&self, symbol: &str) -> Option<&TickerUpdate> {
        self.tickers.get(symbol)
    }

    pub fn order_book(&self, symbol: &str) -> Option<&OrderBook> {
        self.order_books.get(symbol)
    }

    /// Newest first.
    pub fn recent_trades(&self, symbol: &str) -> &[Trade] {
        self.recent_trades
            .get(symbol)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn price_history(&self, symbol: &str) -> Option<&[Candle]> {
        self.price_history.get(symbol).map(Vec::as_slice)
    }

    pub fn last_update(&self) -> Option<i64> {
        self.last_update
    }

    fn bump(&mut self, symbol: &str) {
        let version = self.versions.entry(symbol.to_string()).or_insert(0);
        *version = version.saturating_add(1);
    }
}
