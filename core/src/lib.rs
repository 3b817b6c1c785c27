pub mod config;
pub mod error;
pub mod model;
pub mod record;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_tracing() {
    init_tracing_with(None);
}

/// Install the global subscriber. An explicit `level` overrides `RUST_LOG`.
pub fn init_tracing_with(level: Option<&str>) {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);

    let filter_layer = match level {
        Some(level) => EnvFilter::try_new(level),
        None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info")),
    }
    .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init();
}
