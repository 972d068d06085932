use std::sync::Once;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Install the global subscriber. Later calls are no-ops.
pub fn init_tracing() {
    INIT.call_once(|| {
        let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into());

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(env_filter))
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_target(true)
            .with_level(true)
            .compact()
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
