//! Environment variable utilities
//!
//! Typed lookups with defaults, used by `ServerConfig::from_env()` and the
//! binaries. A value that is unset or fails to parse falls back to the
//! default; configuration never fails because of a malformed variable.
//!
//! ```ignore
//! use duplex_core::env::{env_get, env_get_bool, env_get_ms};
//!
//! let workers: usize = env_get("DUPLEX_WORKERS", 1);
//! let grace = env_get_ms("DUPLEX_SHUTDOWN_GRACE_MS", 2000);
//! let verbose = env_get_bool("DUPLEX_VERBOSE", false);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`, or return `default`.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// `Some(T)` if `key` is set and parses.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean flag: "1", "true", "yes", "on" (any case) are true, "0",
/// "false", "no", "off" are false, anything else is the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// String value, or `default`.
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Millisecond duration, or `default_ms`.
#[inline]
pub fn env_get_ms(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_get(key, default_ms))
}
