//! Configuration module for the wiki backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::AppError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Public base URL handed to the macro service
    pub site_url: String,
    /// Locale of source documents; every other locale is a translation
    pub default_locale: String,
    /// Base URL of the macro render service
    pub kumascript_url: String,
    /// Age after which an in-progress render lock is considered stale
    pub render_timeout: Duration,
    /// Synchronous renders at least this slow switch the document to deferred mode
    pub force_deferred_timeout: Duration,
    /// Timeout for one macro service call; zero serves raw content without calling it
    pub kumascript_timeout: Duration,
    /// Render synchronously even for documents flagged for deferred rendering
    pub force_immediate_rendering: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let bind_addr: SocketAddr = get("WIKI_BIND_ADDR", "127.0.0.1:8080")
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid WIKI_BIND_ADDR: {}", e)))?;

        Ok(Self {
            db_path: get("WIKI_DB_PATH", "./data/wiki.sqlite").into(),
            bind_addr,
            log_level: get("WIKI_LOG_LEVEL", "info"),
            site_url: get("WIKI_SITE_URL", "http://localhost:8080"),
            default_locale: get("WIKI_DEFAULT_LOCALE", "en-US"),
            kumascript_url: get("WIKI_KUMASCRIPT_URL", "http://localhost:9080"),
            render_timeout: parse_seconds(
                "WIKI_RENDER_TIMEOUT",
                &get("WIKI_RENDER_TIMEOUT", "180"),
            )?,
            force_deferred_timeout: parse_seconds(
                "WIKI_FORCE_DEFERRED_TIMEOUT",
                &get("WIKI_FORCE_DEFERRED_TIMEOUT", "10"),
            )?,
            kumascript_timeout: parse_seconds(
                "WIKI_KUMASCRIPT_TIMEOUT",
                &get("WIKI_KUMASCRIPT_TIMEOUT", "10"),
            )?,
            force_immediate_rendering: parse_flag(
                "WIKI_FORCE_IMMEDIATE_RENDERING",
                &get("WIKI_FORCE_IMMEDIATE_RENDERING", "false"),
            )?,
        })
    }
}

/// Parse a (possibly fractional) number of seconds.
fn parse_seconds(name: &str, raw: &str) -> Result<Duration, AppError> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|e| AppError::Config(format!("Invalid {}: {}", name, e)))?;
    Duration::try_from_secs_f64(secs)
        .map_err(|e| AppError::Config(format!("Invalid {}: {}", name, e)))
}

fn parse_flag(name: &str, raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(AppError::Config(format!(
            "Invalid {}: expected a boolean, got {:?}",
            name, other
        ))),
    }
}
