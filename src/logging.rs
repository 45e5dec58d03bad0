//! Tracing subscriber setup for binaries and demos
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the embedding program.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install a global formatting subscriber.
///
/// `RUST_LOG` takes precedence; `default_filter` (e.g. `"aimstore=info"`)
/// applies when it is unset or unparsable. Returns `false` when a global
/// subscriber was already installed, in which case nothing changes.
pub fn init_logging(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_ignored() {
        init_logging("aimstore=debug");
        assert!(!init_logging("aimstore=trace"));
        tracing::info!("logging initialized");
    }
}
