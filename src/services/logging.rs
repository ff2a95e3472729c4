//! Tracing subscriber setup for the diagnostic binary and embedding apps.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "librarian_debrid=debug,debrid_check=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into())
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed (e.g. by the
/// embedding application), in which case nothing changes.
pub fn init_tracing(format: LogFormat) -> bool {
    let registry = tracing_subscriber::registry().with(env_filter());
    let installed = match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_a_no_op() {
        let _ = init_tracing(LogFormat::Pretty);
        assert!(!init_tracing(LogFormat::Json));
    }
}
