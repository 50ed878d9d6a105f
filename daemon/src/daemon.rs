//! The daemon lifecycle: start, run, stop.
//!
//! One daemon process owns a base directory. `start` spawns a detached
//! child re-executing this binary in run mode with its output redirected
//! to `daemon.log`; `run` is the long-lived loop driving the watcher, the
//! status tick, and signal-driven shutdown.

use crate::config::Config;
use crate::error::{DaemonError, Result};
use crate::pidlock;
use crate::status::{rss_mb, DaemonStatus};
use crate::watcher::{RebuildCallback, StashWatcher};
use chrono::{DateTime, Utc};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use stash_engine::{paths, Engine};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Rotate `daemon.log` past this size.
const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;
/// Rotated generations kept (`daemon.log.1` .. `.3`).
const LOG_GENERATIONS: u32 = 3;
/// Grace period before `stop` escalates to SIGKILL.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a `start` request.
#[derive(Debug)]
pub enum StartOutcome {
    /// A live daemon already owns the base directory
    AlreadyRunning(i32),
    /// A child was spawned with this pid
    Started(u32),
}

/// Result of a `stop` request.
#[derive(Debug)]
pub enum StopOutcome {
    NotRunning,
    /// Exited within the grace period
    Stopped(i32),
    /// Had to be killed
    Killed(i32),
}

/// Start the daemon for `config.base` if none is running.
///
/// Present-and-alive pid is treated as idempotent success. Otherwise a
/// detached child re-executes this binary in run mode, its stdout and
/// stderr appended to `daemon.log`; the child's pid and an initial status
/// file are written before returning.
pub fn start(config: &Config) -> Result<StartOutcome> {
    fs::create_dir_all(&config.base)?;
    let pid_path = paths::pid_path(&config.base);
    pidlock::clean_stale(&pid_path)?;
    if let Ok(pid) = pidlock::read(&pid_path) {
        if pidlock::is_alive(pid) {
            return Ok(StartOutcome::AlreadyRunning(pid));
        }
    }

    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(paths::daemon_log_path(&config.base))?;
    let child = Command::new(std::env::current_exe()?)
        .arg("run")
        .env("STASH_BASE", &config.base)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log.try_clone()?))
        .stderr(Stdio::from(log))
        .process_group(0)
        .spawn()?;

    let pid = child.id();
    pidlock::write(&pid_path, pid)?;
    DaemonStatus {
        running: true,
        pid,
        start_time: Utc::now(),
        uptime_seconds: 0,
        last_sync: None,
        stashes_watched: 0,
        memory_mb: 0.0,
    }
    .write(&config.base)?;

    Ok(StartOutcome::Started(pid))
}

/// The daemon-run loop. Blocks until a termination signal arrives.
pub async fn run(config: Config) -> Result<()> {
    fs::create_dir_all(&config.base)?;
    let pid_path = paths::pid_path(&config.base);
    pidlock::write(&pid_path, std::process::id())?;

    let engine = Arc::new(Mutex::new(Engine::open(&config.base)?));
    let last_sync: Arc<Mutex<Option<DateTime<Utc>>>> = Arc::new(Mutex::new(None));

    let callback: RebuildCallback = {
        let engine = Arc::clone(&engine);
        let last_sync = Arc::clone(&last_sync);
        Arc::new(move |stash: &str| {
            lock(&engine).rebuild_cache(stash)?;
            *lock(&last_sync) = Some(Utc::now());
            Ok(())
        })
    };

    let watcher = StashWatcher::new(&config.base, config.debounce, callback)?;
    tracing::info!(
        base = %config.base.display(),
        stashes = watcher.watched_count(),
        "daemon running"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher_task = tokio::spawn(watcher.run(shutdown_rx.clone()));

    // signal task: first SIGTERM or SIGINT wins
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let (mut term, mut int) = match (
                signal(SignalKind::terminate()),
                signal(SignalKind::interrupt()),
            ) {
                (Ok(t), Ok(i)) => (t, i),
                (t, i) => {
                    tracing::error!(
                        "failed to install signal handlers: {:?} {:?}",
                        t.err(),
                        i.err()
                    );
                    return;
                }
            };
            tokio::select! {
                _ = term.recv() => {}
                _ = int.recv() => {}
            }
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        });
    }

    let start_time = Utc::now();
    let mut shutdown = shutdown_rx;
    let mut tick = tokio::time::interval(config.tick);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Err(e) = write_status(&config, start_time, true, &last_sync) {
                    tracing::warn!(error = %e, "status write failed");
                }
                if let Err(e) = rotate_at(&paths::daemon_log_path(&config.base), MAX_LOG_BYTES) {
                    tracing::warn!(error = %e, "log rotation failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    // graceful shutdown: stop the watcher, flush a final status, drop the
    // pid file
    let _ = watcher_task.await;
    if let Err(e) = write_status(&config, start_time, false, &last_sync) {
        tracing::warn!(error = %e, "final status write failed");
    }
    pidlock::remove(&pid_path)?;
    tracing::info!("daemon stopped");
    Ok(())
}

/// Stop a running daemon: SIGTERM, wait up to the grace period, then
/// SIGKILL.
pub fn stop(config: &Config) -> Result<StopOutcome> {
    let pid_path = paths::pid_path(&config.base);
    let pid = match pidlock::read(&pid_path) {
        Err(DaemonError::PidFileMissing) => return Ok(StopOutcome::NotRunning),
        Err(DaemonError::InvalidPid(_)) => {
            pidlock::remove(&pid_path)?;
            return Ok(StopOutcome::NotRunning);
        }
        Err(e) => return Err(e),
        Ok(pid) => pid,
    };
    if !pidlock::is_alive(pid) {
        pidlock::remove(&pid_path)?;
        return Ok(StopOutcome::NotRunning);
    }

    let target = Pid::from_raw(pid);
    let _ = kill(target, Signal::SIGTERM);

    let deadline = Instant::now() + STOP_TIMEOUT;
    while Instant::now() < deadline {
        if !pidlock::is_alive(pid) {
            pidlock::remove(&pid_path)?;
            return Ok(StopOutcome::Stopped(pid));
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    let _ = kill(target, Signal::SIGKILL);
    pidlock::remove(&pid_path)?;
    Ok(StopOutcome::Killed(pid))
}

/// Last `n` lines of `daemon.log`. Missing file yields no lines.
pub fn tail_log(base: &Path, n: usize) -> Result<Vec<String>> {
    let contents = match fs::read_to_string(paths::daemon_log_path(base)) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let lines: Vec<&str> = contents.lines().collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].iter().map(|s| s.to_string()).collect())
}

fn write_status(
    config: &Config,
    start_time: DateTime<Utc>,
    running: bool,
    last_sync: &Arc<Mutex<Option<DateTime<Utc>>>>,
) -> Result<()> {
    let now = Utc::now();
    DaemonStatus {
        running,
        pid: std::process::id(),
        start_time,
        uptime_seconds: (now - start_time).num_seconds().max(0) as u64,
        last_sync: *lock(last_sync),
        // counted from the filesystem so the tick never contends with a
        // rebuild holding the engine
        stashes_watched: count_stashes(&config.base),
        memory_mb: rss_mb(),
    }
    .write(&config.base)
}

/// Non-hidden subdirectories of the base that carry a config file.
fn count_stashes(base: &Path) -> usize {
    let entries = match fs::read_dir(base) {
        Ok(e) => e,
        Err(_) => return 0,
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| !n.starts_with('.') && !n.starts_with('_'))
                .unwrap_or(false)
        })
        .filter(|e| e.path().join(paths::CONFIG_FILE).exists())
        .count()
}

/// Rotate `path` when it exceeds `limit` bytes, keeping three generations.
fn rotate_at(path: &Path, limit: u64) -> Result<()> {
    let size = match fs::metadata(path) {
        Ok(m) => m.len(),
        Err(_) => return Ok(()),
    };
    if size <= limit {
        return Ok(());
    }

    let generation = |n: u32| -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    };

    let oldest = generation(LOG_GENERATIONS);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..LOG_GENERATIONS).rev() {
        let from = generation(n);
        if from.exists() {
            fs::rename(&from, generation(n + 1))?;
        }
    }
    fs::rename(path, generation(1))?;
    File::create(path)?;
    Ok(())
}

/// Lock a mutex, recovering the guard if a worker panicked while holding
/// it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
