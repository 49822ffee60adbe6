//! Best-effort configuration from environment variables.
//!
//! # Policy
//!
//! Every getter takes a fallback. An unset variable, an empty variable, and a
//! variable that does not parse as the requested type all produce the
//! fallback; nothing is reported. Services that need strict validation should
//! layer it on top of these getters.
//!
//! # Common Variables
//!
//! - `SERVICE_NAME`: Service identity for log lines (default: `unknown`)
//! - `LOG_LEVEL`: Minimum log level (default: `info`)
//! - `LOG_FORMAT`: `json` for JSON lines, anything else for console output
//! - `ENVIRONMENT`: Deployment environment (default: `development`)

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::logger::{LogConfig, LogFormat};

/// Configuration shared by every service, loaded from the environment.
///
/// # Example
///
/// ```rust,ignore
/// let common = CommonConfig::from_env();
/// let log = Logger::from_config(&common.log_config());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonConfig {
    /// Service name attached to every log line (default: "unknown")
    pub service_name: String,

    /// Log level name, e.g. "info", "debug" (default: "info")
    pub log_level: String,

    /// Log output format (default: console)
    pub log_format: LogFormat,

    /// Deployment environment, e.g. "production" (default: "development")
    pub environment: String,
}

impl CommonConfig {
    /// Load common configuration from environment variables.
    ///
    /// A `.env` file in the working directory is loaded first when present.
    pub fn from_env() -> Self {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self {
            service_name: get_env("SERVICE_NAME", "unknown"),
            log_level: get_env("LOG_LEVEL", "info"),
            log_format: LogFormat::from_env(),
            environment: get_env("ENVIRONMENT", "development"),
        }
    }

    /// Logging settings derived from this configuration.
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level.clone(),
            service_name: self.service_name.clone(),
            format: self.log_format,
        }
    }

    /// Whether the service runs in a production environment.
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Console,
            environment: "development".to_string(),
        }
    }
}

/// Read a non-empty environment variable.
fn lookup(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get a string variable or the default.
pub fn get_env(key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}

/// Get a variable parsed with [`FromStr`], or the default if unset or invalid.
pub fn get_env_parsed<T: FromStr>(key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Get an integer variable or the default.
pub fn get_env_int(key: &str, default: i64) -> i64 {
    get_env_parsed(key, default)
}

/// Get a 32-bit integer variable or the default. Out-of-range values fall back.
pub fn get_env_i32(key: &str, default: i32) -> i32 {
    get_env_parsed(key, default)
}

/// Get a boolean variable or the default.
///
/// Accepts `1`, `t`, `T`, `TRUE`, `true`, `True` and their false counterparts
/// `0`, `f`, `F`, `FALSE`, `false`, `False`.
pub fn get_env_bool(key: &str, default: bool) -> bool {
    lookup(key)
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

/// Get a duration variable such as `300ms`, `5s` or `2h45m`, or the default.
pub fn get_env_duration(key: &str, default: Duration) -> Duration {
    lookup(key)
        .and_then(|v| parse_duration(&v))
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn parse_duration(value: &str) -> Option<Duration> {
    humantime::parse_duration(value.trim()).ok()
}
