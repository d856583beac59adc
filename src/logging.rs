use tracing_subscriber::{fmt, EnvFilter};

/// `RUST_LOG` wins when set; otherwise `default_level` applies to every target.
pub fn init_tracing(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // A second init (tests, embedding hosts) keeps the first subscriber.
    let _ = fmt().with_env_filter(env_filter).with_target(false).try_init();
}
