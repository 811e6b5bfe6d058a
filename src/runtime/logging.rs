use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use platter::config::LogSettings;

/// Log to stderr, filtered by `RUST_LOG` or else the configured filter.
pub fn init(settings: &LogSettings) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
