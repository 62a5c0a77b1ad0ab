//! Logging setup for Conclave.
//!
//! Components log through `tracing` macros. Hosts call [`init`] once at
//! startup; tests call [`init_for_tests`], which is safe to call repeatedly.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "conclave=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into())
}

/// Install the global subscriber (env filter + fmt layer).
///
/// Returns an error if a global subscriber is already set.
pub fn init() -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

/// Install a subscriber that writes through the test harness.
pub fn init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::info;

    #[test]
    fn test_init_is_idempotent() {
        init_for_tests();
        init_for_tests();
        info!("logging initialised twice without panicking");
    }

    #[test]
    fn second_global_init_fails() {
        init_for_tests();
        assert!(init().is_err());
    }
}
