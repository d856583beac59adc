use crate::error::AppError;
use crate::market::now_unix_ms;
use crate::market::types::ClientPreferences;
use sqlx::{Row, SqlitePool};

/// Fixed key the selected symbol and watchlist are stored under.
pub const CLIENT_STATE_KEY: &str = "market-store";

pub async fn load_preferences(pool: &SqlitePool) -> Result<ClientPreferences, AppError> {
    let row = sqlx::query("SELECT value_json FROM client_state WHERE key = ?")
        .bind(CLIENT_STATE_KEY)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(ClientPreferences::default());
    };

    let value_json: String = row.try_get("value_json")?;
    let mut bytes = value_json.into_bytes();
    let stored: ClientPreferences = simd_json::serde::from_slice(&mut bytes)?;
    stored.normalize()
}

pub async fn save_preferences(
    pool: &SqlitePool,
    preferences: &ClientPreferences,
) -> Result<(), AppError> {
    let value_json = simd_json::serde::to_string(preferences)?;

    sqlx::query(
        "INSERT INTO client_state (key, value_json, updated_at_ms) VALUES (?, ?, ?) \
         ON CONFLICT(key) DO UPDATE SET value_json=excluded.value_json, updated_at_ms=excluded.updated_at_ms",
    )
    .bind(CLIENT_STATE_KEY)
    .bind(value_json)
    .bind(now_unix_ms())
    .execute(pool)
    .await?;

    Ok(())
}
