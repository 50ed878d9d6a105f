//! Health checks and repair.
//!
//! The doctor never mutates anything: it walks the base directory and
//! reports one pass/warn/fail result per check. Repair is the mutating
//! counterpart; its destructive steps run only behind an explicit
//! confirmation.

use crate::engine::{replay_log, Engine};
use crate::error::Result;
use crate::hash::content_hash;
use crate::{paths, stash::fold};
use std::fs;
use std::path::PathBuf;

/// Outcome of a single health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// One named health check result.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl CheckResult {
    fn pass(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Pass,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Fail,
            detail: detail.into(),
        }
    }
}

/// Options for [`Engine::repair`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RepairOptions {
    /// Allow destructive steps (orphaned attachment removal)
    pub confirm: bool,
}

/// What a repair run did.
#[derive(Debug, Default)]
pub struct RepairReport {
    /// Stashes whose cache was rebuilt from the log
    pub rebuilt: Vec<String>,
    /// Orphaned attachment directories that were removed
    pub removed_attachments: Vec<PathBuf>,
    /// Orphans found but left in place (no confirmation)
    pub skipped_attachments: Vec<PathBuf>,
}

impl Engine {
    /// Run every health check over the base directory.
    pub fn doctor(&self) -> Result<Vec<CheckResult>> {
        let mut results = Vec::new();

        for name in self.list_stashes()? {
            self.check_stash(&name, &mut results);
        }
        results.push(self.check_pid_file());

        Ok(results)
    }

    fn check_stash(&self, name: &str, results: &mut Vec<CheckResult>) {
        let check = |kind: &str| format!("{name}: {kind}");

        let stash = match self.get_stash(name) {
            Ok(s) => s,
            Err(e) => {
                results.push(CheckResult::fail(check("config"), e.to_string()));
                return;
            }
        };
        results.push(CheckResult::pass(check("config"), "readable"));

        let entries = match self.log.read_all(name) {
            Ok(entries) => entries,
            Err(e) => {
                results.push(CheckResult::fail(check("log"), e.to_string()));
                return;
            }
        };
        results.push(CheckResult::pass(
            check("log"),
            format!("{} entries", entries.len()),
        ));

        match self.cache.table_exists(name) {
            Ok(true) => results.push(CheckResult::pass(check("cache table"), "present")),
            Ok(false) => {
                results.push(CheckResult::warn(
                    check("cache table"),
                    "missing; run a rebuild",
                ));
                return;
            }
            Err(e) => {
                results.push(CheckResult::fail(check("cache table"), e.to_string()));
                return;
            }
        }

        // config/cache column drift: the add-column failure window leaves
        // the table short a column
        match self.cache.user_columns(name) {
            Ok(cache_columns) => {
                let missing: Vec<&str> = stash
                    .columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .filter(|c| !cache_columns.iter().any(|cc| fold(cc) == fold(c)))
                    .collect();
                if missing.is_empty() {
                    results.push(CheckResult::pass(check("columns"), "in sync"));
                } else {
                    results.push(CheckResult::warn(
                        check("columns"),
                        format!("cache table missing: {}", missing.join(", ")),
                    ));
                }
            }
            Err(e) => results.push(CheckResult::fail(check("columns"), e.to_string())),
        }

        // hash verification over the replayed log; mismatches are
        // reported, never fatal
        let mut mismatches = Vec::new();
        for (record_id, record) in replay_log(entries) {
            let computed = content_hash(&record.fields);
            if computed != record.hash {
                mismatches.push(format!(
                    "{record_id} (stored {}, computed {computed})",
                    record.hash
                ));
            }
        }
        if mismatches.is_empty() {
            results.push(CheckResult::pass(check("hashes"), "verified"));
        } else {
            results.push(CheckResult::warn(
                check("hashes"),
                format!("mismatch: {}", mismatches.join(", ")),
            ));
        }

        match self.orphaned_attachments(name, &stash) {
            Ok(orphans) if orphans.is_empty() => {
                results.push(CheckResult::pass(check("attachments"), "no orphans"));
            }
            Ok(orphans) => results.push(CheckResult::warn(
                check("attachments"),
                format!("{} orphaned directories", orphans.len()),
            )),
            Err(e) => results.push(CheckResult::fail(check("attachments"), e.to_string())),
        }
    }

    fn check_pid_file(&self) -> CheckResult {
        let path = paths::pid_path(self.base());
        let contents = match fs::read_to_string(&path) {
            Err(_) => return CheckResult::pass("daemon pid", "no pid file"),
            Ok(c) => c,
        };
        match contents.trim().parse::<i64>() {
            Ok(pid) if pid > 0 => CheckResult::pass("daemon pid", format!("pid {pid}")),
            _ => CheckResult::warn("daemon pid", "pid file is not a valid pid"),
        }
    }

    /// Attachment directories under `files/` whose record id is no longer
    /// in the cache.
    fn orphaned_attachments(
        &self,
        stash_name: &str,
        stash: &crate::stash::Stash,
    ) -> Result<Vec<PathBuf>> {
        let dir = paths::files_dir(self.base(), stash_name);
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut orphans = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let record_id = entry.file_name().to_string_lossy().into_owned();
            if self.cache.get(stash, &record_id)?.is_none() {
                orphans.push(entry.path());
            }
        }
        Ok(orphans)
    }

    /// Repair the base directory: rebuild every stash cache from its log,
    /// and remove orphaned attachment directories when confirmed.
    pub fn repair(&mut self, opts: RepairOptions) -> Result<RepairReport> {
        let mut report = RepairReport::default();

        for name in self.list_stashes()? {
            self.rebuild_cache(&name)?;
            report.rebuilt.push(name.clone());

            let stash = self.get_stash(&name)?;
            for orphan in self.orphaned_attachments(&name, &stash)? {
                if opts.confirm {
                    fs::remove_dir_all(&orphan)?;
                    report.removed_attachments.push(orphan);
                } else {
                    report.skipped_attachments.push(orphan);
                }
            }
        }
        Ok(report)
    }
}
