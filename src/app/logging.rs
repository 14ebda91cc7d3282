use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over `default_level` when both are set.
pub fn init_logging(default_level: &str) {
    let level = if default_level.trim().is_empty() {
        "info"
    } else {
        default_level.trim()
    };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if cfg!(debug_assertions) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .with_target(false)
            .try_init();
    }
}
