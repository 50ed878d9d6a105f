//! The daemon status file.
//!
//! `daemon.status` is a small JSON object rewritten on every tick; callers
//! read it opportunistically to check liveness without signalling the
//! process.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stash_engine::paths;
use std::fs;
use std::path::Path;

/// Contents of `daemon.status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: u32,
    pub start_time: DateTime<Utc>,
    pub uptime_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    pub stashes_watched: usize,
    pub memory_mb: f64,
}

impl DaemonStatus {
    /// Atomically write the status file under `base`.
    pub fn write(&self, base: &Path) -> Result<()> {
        let mut contents = serde_json::to_vec_pretty(self)?;
        contents.push(b'\n');
        paths::write_atomic(&paths::status_path(base), &contents)?;
        Ok(())
    }

    /// Read the status file under `base`.
    pub fn read(base: &Path) -> Result<Self> {
        let contents = fs::read_to_string(paths::status_path(base))?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Resident set size of this process in megabytes, best effort.
pub fn rss_mb() -> f64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(contents) = fs::read_to_string("/proc/self/status") {
            for line in contents.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    if let Some(kb) = rest
                        .split_whitespace()
                        .next()
                        .and_then(|v| v.parse::<f64>().ok())
                    {
                        return kb / 1024.0;
                    }
                }
            }
        }
    }
    0.0
}
