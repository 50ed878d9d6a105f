//! Filesystem watcher with per-stash debouncing.
//!
//! Watches the base directory plus every stash subdirectory, registering
//! new subdirectories as they appear. A change to a stash's `records.jsonl`
//! or `config.json` (re)arms that stash's debounce timer; when the timer
//! expires without further events the rebuild callback runs on a blocking
//! worker, so the event loop never waits on a rebuild.

use crate::error::Result;
use dashmap::DashMap;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use stash_engine::paths;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Rebuild hook invoked with a stash name after its debounce window
/// closes. Errors are logged; the watcher keeps running.
pub type RebuildCallback = Arc<dyn Fn(&str) -> stash_engine::Result<()> + Send + Sync>;

/// Watches a base directory and coalesces rapid edits per stash.
pub struct StashWatcher {
    base: PathBuf,
    debounce: Duration,
    callback: RebuildCallback,
    watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<Event>,
    /// Pending debounce timers by stash name
    pending: Arc<DashMap<String, JoinHandle<()>>>,
    /// Subdirectories already registered with the notifier
    watched: HashSet<PathBuf>,
}

impl StashWatcher {
    /// Watch `base` and all of its existing stash subdirectories.
    pub fn new(
        base: impl Into<PathBuf>,
        debounce: Duration,
        callback: RebuildCallback,
    ) -> Result<Self> {
        let base = base.into().canonicalize()?;
        let (tx, events) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(e) => tracing::warn!(error = %e, "filesystem notifier error"),
            },
            notify::Config::default(),
        )?;
        watcher.watch(&base, RecursiveMode::NonRecursive)?;

        let mut watched = HashSet::new();
        for entry in std::fs::read_dir(&base)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let path = entry.path();
            if is_stash_dir_name(&path) {
                watcher.watch(&path, RecursiveMode::NonRecursive)?;
                watched.insert(path);
            }
        }

        Ok(Self {
            base,
            debounce,
            callback,
            watcher,
            events,
            pending: Arc::new(DashMap::new()),
            watched,
        })
    }

    /// Number of stash subdirectories currently registered.
    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }

    /// Drive the event loop until `shutdown` flips to true or the
    /// notifier goes away. Pending timers are cancelled on exit.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = self.events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => break,
                    }
                }
            }
        }
        self.cancel_pending();
        tracing::info!("watcher stopped");
    }

    fn handle_event(&mut self, event: Event) {
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
        ) {
            return;
        }

        for path in &event.paths {
            // a new subdirectory directly under the base joins the
            // watched set
            if path.parent() == Some(self.base.as_path())
                && path.is_dir()
                && is_stash_dir_name(path)
                && !self.watched.contains(path)
            {
                match self.watcher.watch(path, RecursiveMode::NonRecursive) {
                    Ok(()) => {
                        tracing::info!(dir = %path.display(), "watching new stash directory");
                        self.watched.insert(path.clone());
                    }
                    Err(e) => {
                        tracing::warn!(dir = %path.display(), error = %e, "failed to watch directory");
                    }
                }
                continue;
            }

            if let Some(stash) = self.stash_for(path) {
                self.schedule(stash);
            }
        }
    }

    /// Map an event path to the stash it belongs to: the file must be
    /// `records.jsonl` or `config.json` inside a direct child of the base.
    fn stash_for(&self, path: &Path) -> Option<String> {
        let file = path.file_name()?.to_str()?;
        if file != paths::LOG_FILE && file != paths::CONFIG_FILE {
            return None;
        }
        let dir = path.parent()?;
        if dir.parent()? != self.base {
            return None;
        }
        if !is_stash_dir_name(dir) {
            return None;
        }
        Some(dir.file_name()?.to_str()?.to_owned())
    }

    /// (Re)arm the debounce timer for a stash. The callback fires once,
    /// `debounce` after the last event.
    fn schedule(&self, stash: String) {
        if let Some((_, old)) = self.pending.remove(&stash) {
            old.abort();
        }

        let pending = Arc::clone(&self.pending);
        let callback = Arc::clone(&self.callback);
        let debounce = self.debounce;
        let key = stash.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            pending.remove(&key);

            let rebuild_of = key.clone();
            let outcome =
                tokio::task::spawn_blocking(move || callback(&rebuild_of)).await;
            match outcome {
                Ok(Ok(())) => tracing::info!(stash = %key, "rebuilt from log"),
                Ok(Err(e)) => tracing::warn!(stash = %key, error = %e, "rebuild failed"),
                Err(e) => tracing::error!(stash = %key, error = %e, "rebuild task failed"),
            }
        });
        self.pending.insert(stash, handle);
    }

    /// Stop all pending debounce timers.
    pub fn cancel_pending(&self) {
        for entry in self.pending.iter() {
            entry.value().abort();
        }
        self.pending.clear();
    }
}

/// Hidden directories (leading `.` or `_`) never hold stashes.
fn is_stash_dir_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| !n.starts_with('.') && !n.starts_with('_'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[test]
    fn stash_dir_name_filter() {
        assert!(is_stash_dir_name(Path::new("/base/inventory")));
        assert!(!is_stash_dir_name(Path::new("/base/.git")));
        assert!(!is_stash_dir_name(Path::new("/base/_internal")));
    }

    fn counting_callback() -> (Arc<Mutex<Vec<String>>>, RebuildCallback) {
        let calls: Arc<Mutex<Vec<String>>> = Arc::default();
        let recorder = Arc::clone(&calls);
        let callback: RebuildCallback = Arc::new(move |stash: &str| {
            recorder.lock().unwrap().push(stash.to_string());
            Ok(())
        });
        (calls, callback)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rapid_writes_coalesce_into_one_rebuild() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("s")).unwrap();

        let (calls, callback) = counting_callback();
        let watcher =
            StashWatcher::new(dir.path(), Duration::from_millis(100), callback).unwrap();
        assert_eq!(watcher.watched_count(), 1);

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(watcher.run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let log = dir.path().join("s").join(paths::LOG_FILE);
        for i in 0..5 {
            fs::write(&log, format!("touch {i}\n")).unwrap();
        }
        // an unrelated file in the stash directory is not meaningful
        fs::write(dir.path().join("s").join("scratch.txt"), "x").unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(calls.lock().unwrap().as_slice(), ["s".to_string()]);

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn new_subdirectory_is_watched_dynamically() {
        let dir = TempDir::new().unwrap();

        let (calls, callback) = counting_callback();
        let watcher =
            StashWatcher::new(dir.path(), Duration::from_millis(50), callback).unwrap();
        assert_eq!(watcher.watched_count(), 0);

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(watcher.run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;

        fs::create_dir(dir.path().join("t")).unwrap();
        // give the event loop time to register the new directory
        tokio::time::sleep(Duration::from_millis(200)).await;

        fs::write(dir.path().join("t").join(paths::CONFIG_FILE), "{}\n").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(calls.lock().unwrap().as_slice(), ["t".to_string()]);

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn callback_errors_do_not_stop_the_watcher() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("s")).unwrap();

        let calls: Arc<Mutex<u32>> = Arc::default();
        let recorder = Arc::clone(&calls);
        let callback: RebuildCallback = Arc::new(move |_stash: &str| {
            *recorder.lock().unwrap() += 1;
            Err(stash_engine::Error::StashNotFound("s".into()))
        });

        let watcher =
            StashWatcher::new(dir.path(), Duration::from_millis(50), callback).unwrap();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(watcher.run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let log = dir.path().join("s").join(paths::LOG_FILE);
        fs::write(&log, "one\n").unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        fs::write(&log, "two\n").unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        // both edits rebuilt despite the callback failing each time
        assert_eq!(*calls.lock().unwrap(), 2);

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
