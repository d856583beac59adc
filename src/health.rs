use crate::market::types::ConnectionState;
use crate::store::MarketStore;
use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Instant;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub uptime_ms: u64,
    pub db: &'static str,
    pub connection: &'static str,
    pub last_update_ms: Option<i64>,
}

pub async fn build_health_report(
    started_at: Instant,
    pool: Option<&SqlitePool>,
    connection: ConnectionState,
    last_update_ms: Option<i64>,
) -> HealthReport {
    let db_status = match pool {
        Some(pool) => match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(pool)
            .await
        {
            Ok(_) => "ok",
            Err(_) => "error",
        },
        None => "disabled",
    };

    let status = if db_status == "error" || connection == ConnectionState::Error {
        "degraded"
    } else {
        "ok"
    };

    HealthReport {
        status,
        uptime_ms: u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
        db: db_status,
        connection: connection.as_str(),
        last_update_ms,
    }
}

pub async fn store_health(store: &MarketStore) -> HealthReport {
    build_health_report(
        store.started_at(),
        store.db_pool(),
        store.connection_state(),
        store.last_update(),
    )
    .await
}
