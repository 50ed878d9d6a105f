//! The daemon pid file.
//!
//! Exactly one daemon owns a base directory. The pid file records its
//! process id; a stale file (dead or garbage pid) is cleaned on access
//! rather than treated as a lock.

use crate::error::{DaemonError, Result};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use stash_engine::paths;
use std::fs;
use std::io;
use std::path::Path;

/// Write `"<pid>\n"` atomically.
pub fn write(path: &Path, pid: u32) -> Result<()> {
    paths::write_atomic(path, format!("{pid}\n").as_bytes())?;
    Ok(())
}

/// Parse the pid file. Missing file reports `PidFileMissing`; empty,
/// non-numeric, zero, or negative contents report `InvalidPid`.
pub fn read(path: &Path) -> Result<i32> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(DaemonError::PidFileMissing)
        }
        Err(e) => return Err(e.into()),
    };
    let trimmed = contents.trim();
    match trimmed.parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(pid),
        _ => Err(DaemonError::InvalidPid(trimmed.to_string())),
    }
}

/// Probe whether a process exists, without signalling it.
pub fn is_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

/// Remove the pid file when it is stale: missing contents, an unparsable
/// pid, or a pid with no live process. Returns true when a file was
/// cleaned, false when there was nothing to do or the owner is alive.
pub fn clean_stale(path: &Path) -> Result<bool> {
    match read(path) {
        Err(DaemonError::PidFileMissing) => Ok(false),
        Err(DaemonError::InvalidPid(_)) => {
            remove(path)?;
            Ok(true)
        }
        Err(e) => Err(e),
        Ok(pid) if is_alive(pid) => Ok(false),
        Ok(_) => {
            remove(path)?;
            Ok(true)
        }
    }
}

/// Remove the pid file; a missing file is not an error.
pub fn remove(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
