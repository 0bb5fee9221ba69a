//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events; binaries and test suites call
//! one of these to see them. Every initializer honours `RUST_LOG` and falls
//! back to [`DEFAULT_FILTER`]. Calling any of them twice is harmless.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or invalid
pub const DEFAULT_FILTER: &str = "pollwright=info";

fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Human-readable output on stderr.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(DEFAULT_FILTER))
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

/// One JSON object per event, for CI log collectors
pub fn init_json() -> bool {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter(DEFAULT_FILTER))
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

/// Output captured by the test harness, debug level by default
pub fn init_for_tests() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter("pollwright=debug"))
        .with_test_writer()
        .try_init()
        .is_ok()
}
