/// Logging initialization: tracing-subscriber fmt → stderr, filtered by
/// `RUST_LOG` when set. Called once at the start of `ChatClient::new()`;
/// safe to call again (later calls are no-ops).
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem_core=debug,info".into()),
        )
        .try_init();
}
