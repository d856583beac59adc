use crate::error::AppError;
use crate::market::connection::DEFAULT_MAX_RECONNECT_ATTEMPTS;
use serde::Deserialize;
use std::path::PathBuf;

pub const DEFAULT_DB_FILENAME: &str = "market-sync.db";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_DEMO_TICK_INTERVAL_MS: u64 = 1_000;
pub const MIN_DEMO_TICK_INTERVAL_MS: u64 = 50;
pub const MAX_DEMO_TICK_INTERVAL_MS: u64 = 60_000;
pub const MAX_RECONNECT_ATTEMPTS_LIMIT: u32 = 10;

/// Where market data comes from. Chosen once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketSource {
    Live { api_url: String, ws_url: String },
    Demo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfigArgs {
    pub api_url: Option<String>,
    pub ws_url: Option<String>,
    pub demo_mode: Option<bool>,
    pub demo_tick_interval_ms: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
    pub db_path: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub source: MarketSource,
    pub demo_tick_interval_ms: u64,
    pub max_reconnect_attempts: u32,
    pub db_path: PathBuf,
    pub log_level: String,
}

impl ClientConfig {
    pub fn is_demo(&self) -> bool {
        self.source == MarketSource::Demo
    }

    pub fn demo() -> Self {
        Self {
            source: MarketSource::Demo,
            demo_tick_interval_ms: DEFAULT_DEMO_TICK_INTERVAL_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            db_path: PathBuf::from(DEFAULT_DB_FILENAME),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn validate_url(name: &str, raw: String, schemes: &[&str]) -> Result<String, AppError> {
    let value = raw.trim().trim_end_matches('/').to_string();
    let scheme_ok = schemes
        .iter()
        .any(|scheme| value.starts_with(&format!("{scheme}://")));
    let has_host = value
        .split_once("://")
        .map(|(_, rest)| !rest.is_empty())
        .unwrap_or(false);
    if !scheme_ok || !has_host {
        return Err(AppError::InvalidArgument(format!(
            "{name} must be a {} url, got '{value}'",
            schemes.join("/")
        )));
    }
    Ok(value)
}

impl ClientConfigArgs {
    /// Reads `MARKET_*` variables; `.env` is loaded first without overriding
    /// variables that are already set.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            api_url: env_value("MARKET_API_URL"),
            ws_url: env_value("MARKET_WS_URL"),
            demo_mode: env_value("MARKET_DEMO_MODE").map(|value| parse_flag(&value)),
            demo_tick_interval_ms: env_value("MARKET_DEMO_TICK_INTERVAL_MS")
                .and_then(|value| value.parse().ok()),
            max_reconnect_attempts: env_value("MARKET_MAX_RECONNECT_ATTEMPTS")
                .and_then(|value| value.parse().ok()),
            db_path: env_value("MARKET_DB_FILENAME"),
            log_level: env_value("RUST_LOG"),
        }
    }

    pub fn normalize(self) -> Result<ClientConfig, AppError> {
        let demo_requested = self.demo_mode.unwrap_or(false);
        let source = match (demo_requested, self.api_url, self.ws_url) {
            (true, _, _) | (false, None, None) => MarketSource::Demo,
            (false, Some(api_url), Some(ws_url)) => MarketSource::Live {
                api_url: validate_url("api url", api_url, &["http", "https"])?,
                ws_url: validate_url("websocket url", ws_url, &["ws", "wss"])?,
            },
            (false, _, _) => {
                return Err(AppError::InvalidArgument(
                    "api url and websocket url must be configured together".to_string(),
                ))
            }
        };

        let demo_tick_interval_ms = self
            .demo_tick_interval_ms
            .unwrap_or(DEFAULT_DEMO_TICK_INTERVAL_MS);
        if !(MIN_DEMO_TICK_INTERVAL_MS..=MAX_DEMO_TICK_INTERVAL_MS).contains(&demo_tick_interval_ms)
        {
            return Err(AppError::InvalidArgument(format!(
                "demo tick interval must be between {MIN_DEMO_TICK_INTERVAL_MS} and {MAX_DEMO_TICK_INTERVAL_MS} ms"
            )));
        }

        let max_reconnect_attempts = self
            .max_reconnect_attempts
            .unwrap_or(DEFAULT_MAX_RECONNECT_ATTEMPTS);
        if max_reconnect_attempts > MAX_RECONNECT_ATTEMPTS_LIMIT {
            return Err(AppError::InvalidArgument(format!(
                "reconnect attempts must be at most {MAX_RECONNECT_ATTEMPTS_LIMIT}"
            )));
        }

        Ok(ClientConfig {
            source,
            demo_tick_interval_ms,
            max_reconnect_attempts,
            db_path: PathBuf::from(
                self.db_path
                    .unwrap_or_else(|| DEFAULT_DB_FILENAME.to_string()),
            ),
            log_level: self
                .log_level
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        })
    }
}
