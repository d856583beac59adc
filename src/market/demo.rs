use crate::market::types::{
    Candle, MarketData, PriceHistoryQuery, SymbolInfo, SymbolStatus, TickerUpdate,
};
use rand::Rng;

pub const FIAT_BASE_PRICE: f64 = 1.2345;
pub const CRYPTO_BASE_PRICE: f64 = 50_000.0;
/// Per-call perturbation, as a fraction of the base price.
pub const PRICE_JITTER: f64 = 0.001;
pub const HIGH_LOW_BAND: f64 = 0.02;
pub const QUOTE_HALF_SPREAD: f64 = 0.0001;
const VOLUME_RANGE: std::ops::Range<f64> = 1_000_000.0..10_000_000.0;
const TRADES_RANGE: std::ops::Range<u64> = 1_000..10_000;

const DEMO_SYMBOLS: [(&str, &str, &str, u8, u8); 6] = [
    ("EURUSD", "EUR", "USD", 5, 2),
    ("GBPUSD", "GBP", "USD", 5, 2),
    ("AUDUSD", "AUD", "USD", 5, 2),
    ("BTCUSD", "BTC", "USD", 2, 6),
    ("ETHBTC", "ETH", "BTC", 6, 4),
    ("SOLETH", "SOL", "ETH", 6, 3),
];

/// Base assets priced on the crypto scale even when quoted in USD.
const CRYPTO_BASE_ASSETS: [&str; 5] = ["BTC", "ETH", "SOL", "XRP", "DOGE"];

pub fn base_price(symbol: &str) -> f64 {
    let crypto_base = CRYPTO_BASE_ASSETS
        .iter()
        .any(|asset| symbol.starts_with(asset));
    if symbol.contains("USD") && !crypto_base {
        FIAT_BASE_PRICE
    } else {
        CRYPTO_BASE_PRICE
    }
}

pub fn generate_demo_price<R: Rng + ?Sized>(symbol: &str, rng: &mut R) -> f64 {
    let base = base_price(symbol);
    base * (1.0 + rng.gen_range(-PRICE_JITTER..=PRICE_JITTER))
}

pub fn generate_demo_market_data<R: Rng + ?Sized>(
    symbol: &str,
    rng: &mut R,
    now_ms: i64,
) -> MarketData {
    let base = base_price(symbol);
    let price = generate_demo_price(symbol, rng);
    let price_change = price - base;
    let half_spread = price * QUOTE_HALF_SPREAD;

    MarketData {
        symbol: symbol.to_string(),
        price,
        previous_price: base,
        price_change,
        price_change_percent: price_change / base * 100.0,
        high_24h: price * (1.0 + HIGH_LOW_BAND),
        low_24h: price * (1.0 - HIGH_LOW_BAND),
        volume_24h: rng.gen_range(VOLUME_RANGE),
        trades_24h: rng.gen_range(TRADES_RANGE),
        bid: price - half_spread,
        ask: price + half_spread,
        spread: half_spread * 2.0,
        timestamp: now_ms,
        is_market_open: true,
    }
}

/// Same fields the live feed pushes for a ticker.
pub fn generate_demo_ticker<R: Rng + ?Sized>(symbol: &str, rng: &mut R, now_ms: i64) -> TickerUpdate {
    let base = base_price(symbol);
    let price = generate_demo_price(symbol, rng);
    let price_change = price - base;
    let half_spread = price * QUOTE_HALF_SPREAD;

    TickerUpdate {
        symbol: symbol.to_string(),
        price: Some(price),
        price_change: Some(price_change),
        price_change_percent: Some(price_change / base * 100.0),
        volume_24h: Some(rng.gen_range(VOLUME_RANGE)),
        bid: Some(price - half_spread),
        ask: Some(price + half_spread),
        timestamp: Some(now_ms),
        ..TickerUpdate::default()
    }
}

pub fn demo_symbols() -> Vec<SymbolInfo> {
    DEMO_SYMBOLS
        .iter()
        .map(
            |&(symbol, base_asset, quote_asset, price_precision, quantity_precision)| SymbolInfo {
                symbol: symbol.to_string(),
                base_asset: base_asset.to_string(),
                quote_asset: quote_asset.to_string(),
                price_precision,
                quantity_precision,
                status: SymbolStatus::Trading,
            },
        )
        .collect()
}

/// Deterministic candle walk ending at the bucket that contains `now_ms`.
pub fn build_demo_history(symbol: &str, query: PriceHistoryQuery, now_ms: i64) -> Vec<Candle> {
    let interval_ms = query.interval.duration_ms();
    let aligned_now = now_ms - now_ms.rem_euclid(interval_ms);
    let limit = i64::from(query.limit);
    let start = aligned_now - (limit - 1) * interval_ms;
    let base = base_price(symbol);

    let mut candles = Vec::with_capacity(usize::from(query.limit));
    let mut price = base;
    for step in 0..limit {
        let drift = ((step % 7) as f64 - 3.0) * 0.0002;
        let open = price;
        let close = open * (1.0 + drift);
        let wick = base * 0.0001;
        candles.push(Candle {
            t: start + step * interval_ms,
            o: open,
            h: open.max(close) + wick,
            l: open.min(close) - wick,
            c: close,
            v: 2.0 + (step % 5) as f64 * 0.3,
        });
        price = close;
    }

    candles
}
