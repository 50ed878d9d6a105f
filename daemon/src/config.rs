//! Daemon configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default sync tick between status updates.
pub const DEFAULT_TICK_SECS: u64 = 5;
/// Default per-stash debounce window for filesystem events.
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// Daemon configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory holding the stashes, cache, and daemon files
    pub base: PathBuf,
    /// Interval between status/rotation ticks
    pub tick: Duration,
    /// Debounce window for watcher events
    pub debounce: Duration,
}

impl Config {
    /// Load configuration from `STASH_BASE`, `STASH_TICK_SECS`, and
    /// `STASH_DEBOUNCE_MS`, with defaults for everything.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base = env::var("STASH_BASE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".stash"));

        let tick = match env::var("STASH_TICK_SECS") {
            Err(_) => Duration::from_secs(DEFAULT_TICK_SECS),
            Ok(raw) => Duration::from_secs(
                raw.parse::<u64>().map_err(|_| ConfigError::InvalidTick(raw))?,
            ),
        };

        let debounce = match env::var("STASH_DEBOUNCE_MS") {
            Err(_) => Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            Ok(raw) => Duration::from_millis(
                raw.parse::<u64>()
                    .map_err(|_| ConfigError::InvalidDebounce(raw))?,
            ),
        };

        Ok(Self {
            base,
            tick,
            debounce,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid STASH_TICK_SECS value: '{0}'")]
    InvalidTick(String),

    #[error("invalid STASH_DEBOUNCE_MS value: '{0}'")]
    InvalidDebounce(String),
}
