//! Runtime configuration parsed from environment variables.
//!
//! All sync tuning knobs have defaults; unparseable values fall back to the
//! default rather than failing startup.

use std::time::Duration;

pub const DEFAULT_PORT: u16 = 10000;
pub const DEFAULT_MAX_RECENT_STROKES: usize = 100;
pub const DEFAULT_PERSIST_INTERVAL_MS: u64 = 15_000;
pub const DEFAULT_STROKE_FLUSH_MS: u64 = 50;

/// Tuning knobs for the sync core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Upper bound on the durable stroke log per whiteboard.
    pub max_recent_strokes: usize,
    /// Interval of the full-state persistence sweep.
    pub persist_interval: Duration,
    /// Delay between the first buffered stroke and its bulk flush.
    pub stroke_flush_delay: Duration,
}

impl SyncConfig {
    /// Load from `WHITEBOARD_MAX_RECENT_STROKES`, `WHITEBOARD_PERSIST_MS`,
    /// `WHITEBOARD_STROKE_FLUSH_MS`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            max_recent_strokes: env_parse("WHITEBOARD_MAX_RECENT_STROKES", DEFAULT_MAX_RECENT_STROKES),
            persist_interval: Duration::from_millis(env_parse("WHITEBOARD_PERSIST_MS", DEFAULT_PERSIST_INTERVAL_MS)),
            stroke_flush_delay: Duration::from_millis(env_parse("WHITEBOARD_STROKE_FLUSH_MS", DEFAULT_STROKE_FLUSH_MS)),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_recent_strokes: DEFAULT_MAX_RECENT_STROKES,
            persist_interval: Duration::from_millis(DEFAULT_PERSIST_INTERVAL_MS),
            stroke_flush_delay: Duration::from_millis(DEFAULT_STROKE_FLUSH_MS),
        }
    }
}

/// Process-level settings needed before the router exists.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub port: u16,
    pub jwt_secret: String,
    /// Allowed CORS origin. `None` allows any origin.
    pub frontend_origin: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} required")]
    Missing(&'static str),
}

impl ServerConfig {
    /// Load from `DATABASE_URL`, `JWT_SECRET`, `PORT`, `FRONTEND_ORIGIN`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if a required variable is unset or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            port: env_parse("PORT", DEFAULT_PORT),
            jwt_secret: required("JWT_SECRET")?,
            frontend_origin: std::env::var("FRONTEND_ORIGIN")
                .ok()
                .filter(|v| !v.is_empty() && v != "*"),
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(key))
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
