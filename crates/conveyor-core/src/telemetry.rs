//! Tracing initialisation shared by the Conveyor binaries.
//!
//! `RUST_LOG` takes precedence over the supplied default level. Calling
//! more than once is harmless; only the first call installs a subscriber.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// With `json` set, log lines are newline-delimited JSON for aggregation;
/// otherwise the human-readable formatter is used. Returns whether this
/// call installed the subscriber (false when one is already in place).
pub fn init_tracing(json: bool, level: Level) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .is_ok()
    } else {
        registry
            .with(fmt::layer().with_target(false))
            .try_init()
            .is_ok()
    }
}
