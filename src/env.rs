//! Environment variable names used by the gateway binaries.
//!
//! These are purely helpers; the core types take explicit values and never
//! read the environment themselves.

/// Path to the YAML config file, used when `--config` is not given.
pub const LOGGATE_CONFIG_ENV: &str = "LOGGATE_CONFIG";

/// Overrides `server.log_address`.
pub const LOGGATE_LOG_ADDRESS_ENV: &str = "LOGGATE_LOG_ADDRESS";

/// Overrides `logging.level`.
pub const LOGGATE_LOG_LEVEL_ENV: &str = "LOGGATE_LOG_LEVEL";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
