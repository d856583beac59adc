use crate::error::AppError;
use crate::market::types::{ApiEnvelope, Candle, MarketData, PriceHistoryQuery, SymbolInfo};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

pub type MarketWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn symbols_endpoint(api_url: &str) -> String {
    format!("{}/market/symbols", api_url.trim_end_matches('/'))
}

fn market_data_endpoint(api_url: &str, symbol: &str) -> String {
    format!(
        "{}/market/data/{}",
        api_url.trim_end_matches('/'),
        symbol.to_ascii_uppercase()
    )
}

fn history_endpoint(api_url: &str, symbol: &str, query: PriceHistoryQuery) -> String {
    format!(
        "{}/market/history/{}",
        api_url.trim_end_matches('/'),
        symbol.to_ascii_uppercase()
    ) + &format!("?interval={}&limit={}", query.interval.as_str(), query.limit)
}

pub async fn connect_market_stream(ws_url: &str) -> Result<MarketWsStream, AppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(16 << 20),
        max_frame_size: Some(4 << 20),
        ..Default::default()
    };

    let (stream, _) = connect_async_with_config(ws_url, Some(ws_config), true).await?;
    Ok(stream)
}

/// Unwraps the `{ success, data, error }` envelope. The backend's own error
/// message wins over the bare HTTP status when the body still decodes.
pub fn decode_envelope<T: DeserializeOwned>(
    status: StatusCode,
    body: &mut [u8],
) -> Result<T, AppError> {
    match simd_json::serde::from_slice::<ApiEnvelope<T>>(body) {
        Ok(envelope) => envelope.into_result(),
        Err(error) if status.is_success() => Err(error.into()),
        Err(_) => Err(AppError::Api(format!("request failed with status {status}"))),
    }
}

async fn get_enveloped<T: DeserializeOwned>(client: &Client, endpoint: String) -> Result<T, AppError> {
    let response = client.get(endpoint).send().await?;
    let status = response.status();
    let mut body = response.bytes().await?.to_vec();
    decode_envelope(status, &mut body)
}

pub async fn fetch_symbols(client: &Client, api_url: &str) -> Result<Vec<SymbolInfo>, AppError> {
    get_enveloped(client, symbols_endpoint(api_url)).await
}

pub async fn fetch_market_data(
    client: &Client,
    api_url: &str,
    symbol: &str,
) -> Result<MarketData, AppError> {
    get_enveloped(client, market_data_endpoint(api_url, symbol)).await
}

pub async fn fetch_price_history(
    client: &Client,
    api_url: &str,
    symbol: &str,
    query: PriceHistoryQuery,
) -> Result<Vec<Candle>, AppError> {
    let mut candles: Vec<Candle> =
        get_enveloped(client, history_endpoint(api_url, symbol, query)).await?;
    candles.sort_unstable_by_key(|candle| candle.t);
    candles.dedup_by_key(|candle| candle.t);
    Ok(candles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::HistoryInterval;

    #[test]
    fn endpoints_trim_trailing_slash() {
        assert_eq!(
            symbols_endpoint("http://localhost:3001/api/"),
            "http://localhost:3001/api/market/symbols"
        );
        assert_eq!(
            market_data_endpoint("http://localhost:3001/api", "eurusd"),
            "http://localhost:3001/api/market/data/EURUSD"
        );
    }

    #[test]
    fn history_endpoint_carries_interval_and_limit() {
        let endpoint = history_endpoint(
            "https://api.example.test",
            "btcusd",
            PriceHistoryQuery {
                interval: HistoryInterval::H4,
                limit: 250,
            },
        );
        assert!(endpoint.contains("/market/history/BTCUSD"));
        assert!(endpoint.contains("interval=4h"));
        assert!(endpoint.contains("limit=250"));
    }

    #[test]
    fn decodes_successful_envelope() {
        let mut body = br#"{"success":true,"data":[{"symbol":"EURUSD","baseAsset":"EUR","quoteAsset":"USD","pricePrecision":5,"quantityPrecision":2,"status":"trading"}]}"#
            .to_vec();
        let symbols: Vec<SymbolInfo> =
            decode_envelope(StatusCode::OK, &mut body).expect("envelope should decode");

        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].quote_asset, "USD");
    }

    #[test]
    fn prefers_backend_error_message_on_failed_status() {
        let mut body = br#"{"success":false,"error":"unknown symbol XYZ"}"#.to_vec();
        let result: Result<MarketData, AppError> =
            decode_envelope(StatusCode::NOT_FOUND, &mut body);

        let error = result.expect_err("failed envelope must error");
        assert_eq!(error.to_string(), "api error: unknown symbol XYZ");
    }

    #[test]
    fn falls_back_to_status_for_non_json_error_body() {
        let mut body = b"upstream timed out".to_vec();
        let result: Result<MarketData, AppError> =
            decode_envelope(StatusCode::BAD_GATEWAY, &mut body);

        let error = result.expect_err("bad gateway must error");
        assert!(error.to_string().contains("502"));
    }

    #[test]
    fn unknown_symbol_status_is_tolerated() {
        let mut body = br#"{"success":true,"data":[{"symbol":"EURUSD","baseAsset":"EUR","quoteAsset":"USD","pricePrecision":5,"quantityPrecision":2,"status":"auction"}]}"#
            .to_vec();
        let symbols: Vec<SymbolInfo> =
            decode_envelope(StatusCode::OK, &mut body).expect("envelope should decode");
        assert_eq!(
            symbols[0].status,
            crate::market::types::SymbolStatus::Unknown
        );
    }
}
