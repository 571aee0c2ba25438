use std::sync::OnceLock;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static LOGGER_INIT: OnceLock<()> = OnceLock::new();

const DEFAULT_FILTER: &str = "thumbnailer=info,info";

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init() {
    LOGGER_INIT.get_or_init(|| {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| DEFAULT_FILTER.into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}
