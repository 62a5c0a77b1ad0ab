//! Reading configuration from environment variables.
//!
//! Unset variables give the default. Set but unparsable ones give the
//! default too, with a warning.

use std::str::FromStr;

use tracing::warn;

/// Parse a boolean flag: `1/true/yes/on` or `0/false/no/off`, any case.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Read a boolean flag from `name`.
pub fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => parse_flag(&raw).unwrap_or_else(|| {
            warn!("Ignoring unparsable {}={:?}", name, raw);
            default
        }),
        Err(_) => default,
    }
}

/// Read any `FromStr` value from `name`.
pub fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring unparsable {}={:?}", name, raw);
            default
        }),
        Err(_) => default,
    }
}
