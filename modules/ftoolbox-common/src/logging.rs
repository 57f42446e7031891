use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber. RUST_LOG overrides LOG_LEVEL.
pub fn init(log_level: &str) {
    let level = match log_level {
        "debug" | "info" | "warn" | "error" => log_level,
        _ => "info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();
}
