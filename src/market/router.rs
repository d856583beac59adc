use crate::market::cache::MarketCache;
use crate::market::types::{decode_frame, DecodedFrame, InboundFrame};
use parking_lot::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Ticker { symbol: String, merged: bool },
    OrderBook { symbol: String },
    Trade { symbol: String },
    Unrecognized { kind: String, channel: String },
    Malformed,
}

impl RouteOutcome {
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::Ticker { symbol, .. } | Self::OrderBook { symbol } | Self::Trade { symbol } => {
                Some(symbol)
            }
            Self::Unrecognized { .. } | Self::Malformed => None,
        }
    }
}

/// Decodes one inbound frame and folds it into the cache. Decoding happens
/// before the write lock is taken; a bad frame never touches the cache.
pub fn route_message(cache: &RwLock<MarketCache>, payload: &mut [u8], now_ms: i64) -> RouteOutcome {
    let frame = match decode_frame(payload) {
        Ok(DecodedFrame::Known(frame)) => frame,
        Ok(DecodedFrame::Unrecognized { kind, channel }) => {
            warn!(%kind, %channel, "ignoring market frame with unknown route");
            return RouteOutcome::Unrecognized { kind, channel };
        }
        Err(error) => {
            warn!(%error, bytes = payload.len(), "dropping malformed market frame");
            return RouteOutcome::Malformed;
        }
    };

    let mut writable = cache.write();
    apply_frame(&mut writable, frame, now_ms)
}

pub fn apply_frame(cache: &mut MarketCache, frame: InboundFrame, now_ms: i64) -> RouteOutcome {
    match frame {
        InboundFrame::Ticker(update) => {
            let symbol = update.symbol.clone();
            let merged = cache.apply_ticker(update, now_ms);
            debug!(%symbol, merged, "ticker applied");
            RouteOutcome::Ticker { symbol, merged }
        }
        InboundFrame::OrderBook(book) => {
            let symbol = book.symbol.clone();
            cache.apply_order_book(book, now_ms);
            RouteOutcome::OrderBook { symbol }
        }
        InboundFrame::Trade(trade) => {
            let symbol = trade.symbol.clone();
            cache.apply_trade(trade, now_ms);
            RouteOutcome::Trade { symbol }
        }
    }
}
