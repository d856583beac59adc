pub mod api;
pub mod cache;
pub mod connection;
pub mod demo;
pub mod persistence;
pub mod registry;
pub mod router;
pub mod stream;
pub mod types;

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}
