//! The append-only event log.
//!
//! One JSON object per line, per stash, in chronological order. The log is
//! the authoritative store; the cache is derived from it. Every write goes
//! through the temp-file + fsync + rename discipline so an interrupted
//! append leaves either the old log or a fully committed new one.

use crate::error::{Error, Result};
use crate::paths;
use crate::record::Record;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Per-stash JSONL log store rooted at the base directory.
#[derive(Debug)]
pub struct LogStore {
    base: PathBuf,
}

impl LogStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn path(&self, stash: &str) -> PathBuf {
        paths::log_path(&self.base, stash)
    }

    /// Append a single record to the stash's log.
    ///
    /// The existing log is copied into a temp file, the new line appended,
    /// the file synced, and the temp renamed over the original.
    pub fn append(&self, stash: &str, record: &Record) -> Result<()> {
        let path = self.path(stash);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let tmp = paths::temp_sibling(&path);
        let mut out = File::create(&tmp)?;
        match File::open(&path) {
            Ok(mut existing) => {
                io::copy(&mut existing, &mut out)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        out.write_all(line.as_bytes())?;
        out.sync_all()?;
        drop(out);
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Read every record in the stash's log, in file order.
    ///
    /// Empty lines are skipped. A malformed line aborts with its 1-based
    /// line number. A missing file yields an empty sequence.
    pub fn read_all(&self, stash: &str) -> Result<Vec<Record>> {
        read_log_file(&self.path(stash))
    }

    /// Atomically rewrite the whole log from `records`. Used by compaction.
    pub fn write_all(&self, stash: &str, records: &[Record]) -> Result<()> {
        let path = self.path(stash);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }
        paths::write_atomic(&path, &buf)?;
        Ok(())
    }

    /// Remove the log file. A missing file is not an error.
    pub fn delete(&self, stash: &str) -> Result<()> {
        match fs::remove_file(self.path(stash)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a log file exists for this stash.
    pub fn exists(&self, stash: &str) -> bool {
        self.path(stash).exists()
    }

    #[cfg(test)]
    pub(crate) fn raw_path(&self, stash: &str) -> PathBuf {
        self.path(stash)
    }
}

/// Read the log file at `path` directly, with the same parse rules as
/// [`LogStore::read_all`]. Used by doctor checks that walk arbitrary bases.
pub fn read_log_file(path: &Path) -> Result<Vec<Record>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(&line).map_err(|e| Error::ParseError {
            line: idx + 1,
            message: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::now;
    use crate::FieldMap;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(id: &str, fields: serde_json::Value) -> Record {
        Record::new(id, fields.as_object().unwrap().clone(), "alice", now())
    }

    #[test]
    fn append_and_read() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::new(dir.path());

        store
            .append("inventory", &record("inv-aaa1", json!({"Name": "A"})))
            .unwrap();
        store
            .append("inventory", &record("inv-bbb2", json!({"Name": "B"})))
            .unwrap();

        let records = store.read_all("inventory").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "inv-aaa1");
        assert_eq!(records[1].id, "inv-bbb2");
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::new(dir.path());
        assert!(store.read_all("nothing").unwrap().is_empty());
    }

    #[test]
    fn empty_and_trailing_lines_skipped() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::new(dir.path());

        store
            .append("inventory", &record("inv-aaa1", json!({})))
            .unwrap();
        let path = store.raw_path("inventory");
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push('\n');
        contents.push('\n');
        fs::write(&path, contents).unwrap();

        let records = store.read_all("inventory").unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn parse_error_reports_line_number() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::new(dir.path());

        store
            .append("inventory", &record("inv-aaa1", json!({})))
            .unwrap();
        store
            .append("inventory", &record("inv-bbb2", json!({})))
            .unwrap();

        let path = store.raw_path("inventory");
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push_str("{not json\n");
        fs::write(&path, contents).unwrap();

        let err = store.read_all("inventory").unwrap_err();
        match err {
            Error::ParseError { line, .. } => assert_eq!(line, 3),
            other => panic!("expected parse error, got {other}"),
        }
    }

    #[test]
    fn write_all_replaces_log() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::new(dir.path());

        for i in 0..5 {
            store
                .append("inventory", &record("inv-aaa1", json!({"rev": i})))
                .unwrap();
        }
        assert_eq!(store.read_all("inventory").unwrap().len(), 5);

        let last = record("inv-aaa1", json!({"rev": 4}));
        store.write_all("inventory", &[last]).unwrap();

        let records = store.read_all("inventory").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fields["rev"], json!(4));
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::new(dir.path());

        store.delete("inventory").unwrap();
        store
            .append("inventory", &record("inv-aaa1", json!({})))
            .unwrap();
        assert!(store.exists("inventory"));
        store.delete("inventory").unwrap();
        assert!(!store.exists("inventory"));
        store.delete("inventory").unwrap();
    }

    #[test]
    fn user_fields_survive_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::new(dir.path());

        let mut rec = record(
            "inv-aaa1",
            json!({"Name": "Laptop", "Specs": {"ram": 32}, "Tags": ["a", "b"]}),
        );
        rec.parent_id = Some("inv-root".into());
        store.append("inventory", &rec).unwrap();

        let read = store.read_all("inventory").unwrap().remove(0);
        assert_eq!(read, rec);
        assert_eq!(read.fields.len(), 3);
        assert!(read.fields.keys().all(|k| !k.starts_with('_')));
    }

    #[test]
    fn empty_fieldmap_serializes_cleanly() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::new(dir.path());
        store
            .append("inventory", &Record::new("inv-aaa1", FieldMap::new(), "a", now()))
            .unwrap();
        let read = store.read_all("inventory").unwrap();
        assert!(read[0].fields.is_empty());
    }
}
