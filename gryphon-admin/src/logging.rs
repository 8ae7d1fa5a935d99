// tracing-subscriber bootstrap, grounded on the same registry+fmt-layer
// composition the corpus's own server binaries use, driven by RUST_LOG
// when set and a configured default level otherwise.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Installs the process-wide tracing subscriber. Call once from `main`.
/// `default_level` is used when `RUST_LOG` is unset.
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).with_filter(filter);
    tracing_subscriber::registry().with(fmt_layer).init();
}
