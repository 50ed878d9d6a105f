//! Per-stash configuration files.
//!
//! Each stash directory carries a `config.json` holding the serialized
//! [`Stash`] entity. Writes are atomic; reads of a missing file surface
//! `StashNotFound`.

use crate::error::{Error, Result};
use crate::paths;
use crate::stash::Stash;
use std::fs;
use std::io;
use std::path::PathBuf;

/// Store for per-stash `config.json` files rooted at the base directory.
#[derive(Debug)]
pub struct ConfigStore {
    base: PathBuf,
}

impl ConfigStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn path(&self, stash: &str) -> PathBuf {
        paths::config_path(&self.base, stash)
    }

    /// Whether a config file exists for this stash name.
    pub fn exists(&self, name: &str) -> bool {
        self.path(name).exists()
    }

    /// Atomically write the stash config as pretty JSON with a trailing
    /// newline.
    pub fn write(&self, stash: &Stash) -> Result<()> {
        let path = self.path(&stash.name);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut contents = serde_json::to_vec_pretty(stash)?;
        contents.push(b'\n');
        paths::write_atomic(&path, &contents)?;
        Ok(())
    }

    /// Read the stash config by name.
    pub fn read(&self, name: &str) -> Result<Stash> {
        let contents = match fs::read_to_string(self.path(name)) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::StashNotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&contents)?)
    }

    /// Remove the whole stash directory, config included.
    pub fn delete(&self, name: &str) -> Result<()> {
        match fs::remove_dir_all(paths::stash_dir(&self.base, name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// List stash names: non-hidden subdirectories of the base (first
    /// character not `.` or `_`) that contain a readable config file.
    pub fn list_dirs(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.base) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = match entry.file_name().into_string() {
                Ok(n) => n,
                Err(_) => continue,
            };
            if name.starts_with('.') || name.starts_with('_') {
                continue;
            }
            if self.read(&name).is_ok() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::now;
    use crate::stash::Column;
    use tempfile::TempDir;

    fn test_stash(name: &str) -> Stash {
        Stash::new(name, "inv-", "alice", now()).unwrap()
    }

    #[test]
    fn write_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());

        let mut stash = test_stash("inventory");
        stash
            .add_column(Column::new("Name", "alice", now()))
            .unwrap();
        store.write(&stash).unwrap();

        let read = store.read("inventory").unwrap();
        assert_eq!(read, stash);
    }

    #[test]
    fn pretty_json_with_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        store.write(&test_stash("inventory")).unwrap();

        let raw =
            fs::read_to_string(paths::config_path(dir.path(), "inventory")).unwrap();
        assert!(raw.ends_with('\n'));
        assert!(raw.contains("\n  \"prefix\""));
    }

    #[test]
    fn read_missing_is_stash_not_found() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        assert!(matches!(
            store.read("ghost"),
            Err(Error::StashNotFound(name)) if name == "ghost"
        ));
    }

    #[test]
    fn delete_removes_directory() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        store.write(&test_stash("inventory")).unwrap();
        assert!(store.exists("inventory"));

        store.delete("inventory").unwrap();
        assert!(!store.exists("inventory"));
        assert!(!paths::stash_dir(dir.path(), "inventory").exists());

        // deleting again is fine
        store.delete("inventory").unwrap();
    }

    #[test]
    fn list_dirs_skips_hidden_and_configless() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());

        store.write(&test_stash("inventory")).unwrap();
        store.write(&test_stash("notes")).unwrap();
        fs::create_dir(dir.path().join(".hidden")).unwrap();
        fs::create_dir(dir.path().join("_internal")).unwrap();
        fs::create_dir(dir.path().join("no-config")).unwrap();
        fs::write(dir.path().join("stray.txt"), "x").unwrap();

        assert_eq!(store.list_dirs().unwrap(), vec!["inventory", "notes"]);
    }

    #[test]
    fn list_dirs_on_missing_base() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("nope"));
        assert!(store.list_dirs().unwrap().is_empty());
    }
}
