//! Base-directory layout.
//!
//! ```text
//! <base>/
//!   <stash-name>/
//!     config.json
//!     records.jsonl
//!     files/<record-id>/<filename>
//!   cache.db
//!   daemon.pid
//!   daemon.log[.1|.2|.3]
//!   daemon.status
//! ```

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Per-stash append-only event log.
pub const LOG_FILE: &str = "records.jsonl";
/// Per-stash schema metadata.
pub const CONFIG_FILE: &str = "config.json";
/// Per-stash attachment subdirectory.
pub const FILES_DIR: &str = "files";
/// Shared indexed cache database.
pub const CACHE_FILE: &str = "cache.db";
/// Daemon pid file.
pub const PID_FILE: &str = "daemon.pid";
/// Daemon log file (rotated generations append `.1`..`.3`).
pub const DAEMON_LOG_FILE: &str = "daemon.log";
/// Daemon status file.
pub const STATUS_FILE: &str = "daemon.status";

pub fn stash_dir(base: &Path, stash: &str) -> PathBuf {
    base.join(stash)
}

pub fn config_path(base: &Path, stash: &str) -> PathBuf {
    stash_dir(base, stash).join(CONFIG_FILE)
}

pub fn log_path(base: &Path, stash: &str) -> PathBuf {
    stash_dir(base, stash).join(LOG_FILE)
}

pub fn files_dir(base: &Path, stash: &str) -> PathBuf {
    stash_dir(base, stash).join(FILES_DIR)
}

/// Attachment directory for a single record.
pub fn record_files_dir(base: &Path, stash: &str, record_id: &str) -> PathBuf {
    files_dir(base, stash).join(record_id)
}

pub fn cache_path(base: &Path) -> PathBuf {
    base.join(CACHE_FILE)
}

pub fn pid_path(base: &Path) -> PathBuf {
    base.join(PID_FILE)
}

pub fn daemon_log_path(base: &Path) -> PathBuf {
    base.join(DAEMON_LOG_FILE)
}

pub fn status_path(base: &Path) -> PathBuf {
    base.join(STATUS_FILE)
}

/// Write `contents` to `path` atomically: temp file in the same directory,
/// fsync, then rename over the destination. A crash mid-write leaves either
/// the old file or the fully committed new one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = temp_sibling(path);
    let mut file = File::create(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Temp-file path next to `path`, so the final rename stays on one
/// filesystem.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
