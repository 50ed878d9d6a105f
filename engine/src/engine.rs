//! The engine coordinates the three stores.
//!
//! Every mutation goes log-first: the record is appended to the stash's
//! JSONL log, then upserted into the cache. If the upsert fails the log
//! remains authoritative and the next rebuild reconciles the cache.
//! Queries never touch the log.

use crate::cache::{IndexCache, ListOptions, StashMeta};
use crate::config_store::ConfigStore;
use crate::error::{Error, Result};
use crate::log::LogStore;
use crate::record::{now, Operation, Record};
use crate::stash::{validate_column_name, validate_stash_name, Column, Stash};
use crate::{id, paths, Actor, FieldMap, RecordId, StashName};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Input for creating a record. The engine assigns the id (unless one is
/// supplied), computes the hash, and stamps timestamps and operation.
#[derive(Debug, Clone)]
pub struct NewRecord {
    /// Explicit id; minted from the stash prefix when absent
    pub id: Option<RecordId>,
    /// Create as a child of this record
    pub parent_id: Option<RecordId>,
    /// Branch label to stamp, if any
    pub branch: Option<String>,
    pub actor: Actor,
    pub fields: FieldMap,
}

impl NewRecord {
    pub fn new(actor: impl Into<Actor>, fields: FieldMap) -> Self {
        Self {
            id: None,
            parent_id: None,
            branch: None,
            actor: actor.into(),
            fields,
        }
    }

    pub fn with_id(mut self, id: impl Into<RecordId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<RecordId>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

/// Coordinator owning the log store, config store, and index cache for a
/// base directory.
#[derive(Debug)]
pub struct Engine {
    base: PathBuf,
    pub(crate) log: LogStore,
    pub(crate) config: ConfigStore,
    pub(crate) cache: IndexCache,
    /// Highest child sequence handed out per `<stash>/<parent>` in this
    /// process; keeps allocation monotonic even when a purge empties the
    /// cache of children.
    child_seqs: HashMap<String, u64>,
}

impl Engine {
    /// Open the engine over `base`, creating the directory and the cache
    /// database as needed.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        fs::create_dir_all(&base)?;
        let cache = IndexCache::open(&paths::cache_path(&base))?;
        Ok(Self {
            log: LogStore::new(&base),
            config: ConfigStore::new(&base),
            cache,
            child_seqs: HashMap::new(),
            base,
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    // ------------------------------------------------------------------
    // Stash lifecycle
    // ------------------------------------------------------------------

    /// Create a stash: write its config, then create the cache table.
    /// If the table creation fails the config write is rolled back.
    pub fn create_stash(&mut self, stash: Stash) -> Result<()> {
        validate_stash_name(&stash.name)?;
        id::validate_prefix(&stash.prefix)?;
        for column in &stash.columns {
            validate_column_name(&column.name)?;
        }
        if self.config.exists(&stash.name) {
            return Err(Error::StashExists(stash.name));
        }

        self.config.write(&stash)?;
        if let Err(e) = self.cache.create_stash(&stash) {
            let _ = self.config.delete(&stash.name);
            return Err(e);
        }
        Ok(())
    }

    /// Drop a stash: cache table, metadata row, and the whole directory.
    pub fn drop_stash(&mut self, name: &str) -> Result<()> {
        if !self.config.exists(name) {
            return Err(Error::StashNotFound(name.to_string()));
        }
        self.cache.drop_stash(name)?;
        self.config.delete(name)?;
        self.child_seqs
            .retain(|key, _| !key.starts_with(&format!("{name}/")));
        Ok(())
    }

    /// Load a stash config by name.
    pub fn get_stash(&self, name: &str) -> Result<Stash> {
        self.config.read(name)
    }

    /// Names of all stashes under the base directory.
    pub fn list_stashes(&self) -> Result<Vec<StashName>> {
        self.config.list_dirs()
    }

    /// Cached metadata row for a stash, if any.
    pub fn stash_meta(&self, name: &str) -> Result<Option<StashMeta>> {
        self.cache.meta(name)
    }

    /// Append a column to a stash's schema.
    ///
    /// Config is rewritten first, then the cache table altered, then the
    /// metadata row refreshed. A failure between the steps leaves the
    /// table short one column; the doctor checks catch that drift.
    pub fn add_column(&mut self, stash_name: &str, column: Column) -> Result<()> {
        let mut stash = self.config.read(stash_name)?;
        let column_name = column.name.clone();
        stash.add_column(column)?;
        self.config.write(&stash)?;
        self.cache.add_column(&stash, &column_name)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Record lifecycle
    // ------------------------------------------------------------------

    /// Create a record: assign its id, hash its fields, stamp metadata,
    /// append to the log, and upsert into the cache.
    pub fn create_record(&mut self, stash_name: &str, new: NewRecord) -> Result<Record> {
        let stash = self.config.read(stash_name)?;
        let fields = stash.validate_fields(new.fields)?;

        let (record_id, parent_id) = self.assign_id(&stash, new.id, new.parent_id)?;

        let mut record = Record::new(record_id, fields, new.actor, now());
        record.parent_id = parent_id;
        record.branch = new.branch.filter(|b| !b.is_empty());
        record.operation = Operation::Create;

        self.log.append(stash_name, &record)?;
        self.cache.upsert(&stash, &record)?;
        Ok(record)
    }

    /// Replace a record's user fields, recomputing the hash.
    ///
    /// Updating a soft-deleted record is allowed and leaves it deleted;
    /// only purged (absent) records reject the update.
    pub fn update_record(
        &mut self,
        stash_name: &str,
        record_id: &str,
        fields: FieldMap,
        actor: impl Into<Actor>,
    ) -> Result<Record> {
        let stash = self.config.read(stash_name)?;
        let fields = stash.validate_fields(fields)?;

        let mut record = self
            .cache
            .get(&stash, record_id)?
            .ok_or_else(|| Error::RecordNotFound(record_id.to_string()))?;
        record.set_fields(fields);
        record.touch(actor, now());
        record.operation = Operation::Update;

        self.log.append(stash_name, &record)?;
        self.cache.upsert(&stash, &record)?;
        Ok(record)
    }

    /// Soft-delete a record.
    ///
    /// Records with active direct children refuse the delete; callers
    /// implement cascade by deleting depth-first.
    pub fn delete_record(
        &mut self,
        stash_name: &str,
        record_id: &str,
        actor: impl Into<Actor>,
    ) -> Result<Record> {
        let stash = self.config.read(stash_name)?;
        let mut record = self
            .cache
            .get(&stash, record_id)?
            .ok_or_else(|| Error::RecordNotFound(record_id.to_string()))?;
        if record.is_deleted() {
            return Err(Error::RecordAlreadyDeleted(record_id.to_string()));
        }

        let active_children = self.cache.list(
            &stash,
            &ListOptions {
                parent_id: record_id.to_string(),
                limit: Some(1),
                ..Default::default()
            },
        )?;
        if !active_children.is_empty() {
            return Err(Error::HasChildren(record_id.to_string()));
        }

        record.mark_deleted(actor, now());
        self.log.append(stash_name, &record)?;
        self.cache.upsert(&stash, &record)?;
        Ok(record)
    }

    /// Restore a soft-deleted record.
    pub fn restore_record(
        &mut self,
        stash_name: &str,
        record_id: &str,
        actor: impl Into<Actor>,
    ) -> Result<Record> {
        let stash = self.config.read(stash_name)?;
        let mut record = self
            .cache
            .get(&stash, record_id)?
            .ok_or_else(|| Error::RecordNotFound(record_id.to_string()))?;
        if record.is_active() {
            return Err(Error::NotDeleted(record_id.to_string()));
        }

        record.mark_restored(actor, now());
        self.log.append(stash_name, &record)?;
        self.cache.upsert(&stash, &record)?;
        Ok(record)
    }

    /// Fetch an active record.
    pub fn get_record(&self, stash_name: &str, record_id: &str) -> Result<Record> {
        let record = self.get_record_including_deleted(stash_name, record_id)?;
        if record.is_deleted() {
            return Err(Error::RecordDeleted(record_id.to_string()));
        }
        Ok(record)
    }

    /// Fetch a record whether or not it is soft-deleted.
    pub fn get_record_including_deleted(
        &self,
        stash_name: &str,
        record_id: &str,
    ) -> Result<Record> {
        let stash = self.config.read(stash_name)?;
        self.cache
            .get(&stash, record_id)?
            .ok_or_else(|| Error::RecordNotFound(record_id.to_string()))
    }

    /// List records per the given options.
    pub fn list_records(&self, stash_name: &str, opts: &ListOptions) -> Result<Vec<Record>> {
        let stash = self.config.read(stash_name)?;
        self.cache.list(&stash, opts)
    }

    /// Active direct children of a record.
    pub fn get_children(&self, stash_name: &str, parent_id: &str) -> Result<Vec<Record>> {
        self.list_records(
            stash_name,
            &ListOptions {
                parent_id: parent_id.to_string(),
                ..Default::default()
            },
        )
    }

    /// Direct children of a record, soft-deleted included.
    pub fn get_children_including_deleted(
        &self,
        stash_name: &str,
        parent_id: &str,
    ) -> Result<Vec<Record>> {
        self.list_records(
            stash_name,
            &ListOptions {
                parent_id: parent_id.to_string(),
                include_deleted: true,
                ..Default::default()
            },
        )
    }

    /// Next child sequence for `parent`: one past the highest direct-child
    /// sequence the cache knows, or past the highest handed out by this
    /// process, whichever is larger.
    pub fn next_child_seq(&self, stash_name: &str, parent: &str) -> Result<u64> {
        let from_cache = self.cache.next_child_seq(stash_name, parent)?;
        let from_process = self
            .child_seqs
            .get(&seq_key(stash_name, parent))
            .map_or(1, |last| last + 1);
        Ok(from_cache.max(from_process))
    }

    /// Hard-remove a soft-deleted record from the cache and delete its
    /// attachment directory.
    ///
    /// The log entry is left in place and swept by the next
    /// [`Engine::flush_to_log`]; until then a rebuild resurrects the
    /// record. Purging an id that no longer exists is a no-op.
    pub fn purge_record(&mut self, stash_name: &str, record_id: &str) -> Result<()> {
        let stash = self.config.read(stash_name)?;
        let record = match self.cache.get(&stash, record_id)? {
            None => return Ok(()),
            Some(r) => r,
        };
        if record.is_active() {
            return Err(Error::NotDeleted(record_id.to_string()));
        }

        self.cache.remove(stash_name, record_id)?;
        match fs::remove_dir_all(paths::record_files_dir(&self.base, stash_name, record_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------
    // Log/cache reconciliation
    // ------------------------------------------------------------------

    /// Rebuild the cache table from the log.
    ///
    /// The log is replayed into a map keyed by id: create, update, and
    /// restore entries overwrite the mapped state; a delete entry overlays
    /// deletion metadata onto whatever state the record had. The surviving
    /// states replace the table contents wholesale.
    pub fn rebuild_cache(&mut self, stash_name: &str) -> Result<()> {
        let stash = self.config.read(stash_name)?;
        let entries = self.log.read_all(stash_name)?;
        let records: Vec<Record> = replay_log(entries).into_values().collect();
        self.cache.replace_all(&stash, &records)?;
        self.cache.update_meta(&stash)?;
        self.cache.touch_sync_time(stash_name, now())?;
        Ok(())
    }

    /// Compact the log: rewrite it from the current cache snapshot, one
    /// line per surviving record. Active rows are written as `create`
    /// entries, soft-deleted rows as `delete` entries; purged records
    /// disappear.
    pub fn flush_to_log(&mut self, stash_name: &str) -> Result<()> {
        let stash = self.config.read(stash_name)?;
        let mut records = self.cache.list(
            &stash,
            &ListOptions {
                include_deleted: true,
                order_by: Some("created_at".into()),
                ..Default::default()
            },
        )?;
        for record in &mut records {
            record.operation = if record.is_deleted() {
                Operation::Delete
            } else {
                Operation::Create
            };
        }
        self.log.write_all(stash_name, &records)
    }

    /// Run a read-only SELECT against the cache.
    ///
    /// The statement is passed through unvalidated; callers must not pass
    /// DDL or DML.
    pub fn raw_query(&self, sql: &str) -> Result<Vec<FieldMap>> {
        self.cache.raw_query(sql)
    }

    // ------------------------------------------------------------------

    fn assign_id(
        &mut self,
        stash: &Stash,
        explicit: Option<RecordId>,
        parent: Option<RecordId>,
    ) -> Result<(RecordId, Option<RecordId>)> {
        if let Some(record_id) = explicit {
            id::validate_id(&record_id)?;
            if !record_id.starts_with(&stash.prefix) {
                return Err(Error::InvalidId(record_id));
            }
            if self.cache.get(stash, &record_id)?.is_some() {
                return Err(Error::RecordExists(record_id));
            }
            let parent_id = match id::parent_of(&record_id) {
                "" => None,
                derived => {
                    if self.cache.get(stash, derived)?.is_none() {
                        return Err(Error::RecordNotFound(derived.to_string()));
                    }
                    self.note_child_seq(&stash.name, derived, &record_id);
                    Some(derived.to_string())
                }
            };
            return Ok((record_id, parent_id));
        }

        if let Some(parent) = parent.filter(|p| !p.is_empty()) {
            if self.cache.get(stash, &parent)?.is_none() {
                return Err(Error::RecordNotFound(parent));
            }
            let seq = self.next_child_seq(&stash.name, &parent)?;
            let record_id = id::child(&parent, seq);
            self.child_seqs.insert(seq_key(&stash.name, &parent), seq);
            return Ok((record_id, Some(parent)));
        }

        let record_id = loop {
            let candidate = id::mint(&stash.prefix);
            if self.cache.get(stash, &candidate)?.is_none() {
                break candidate;
            }
        };
        Ok((record_id, None))
    }

    /// Track the sequence of an explicitly supplied child id so later
    /// allocations stay monotonic.
    fn note_child_seq(&mut self, stash_name: &str, parent: &str, record_id: &str) {
        if let Some(seq) = record_id
            .rsplit('.')
            .next()
            .and_then(|s| s.parse::<u64>().ok())
        {
            let entry = self
                .child_seqs
                .entry(seq_key(stash_name, parent))
                .or_insert(0);
            *entry = (*entry).max(seq);
        }
    }
}

fn seq_key(stash_name: &str, parent: &str) -> String {
    format!("{stash_name}/{parent}")
}

/// Replay log entries into the latest state per record id.
///
/// Create, update, and restore entries overwrite the mapped state; delete
/// entries overlay deletion metadata onto an existing state and are
/// ignored for ids never created.
pub(crate) fn replay_log(entries: Vec<Record>) -> BTreeMap<RecordId, Record> {
    let mut state: BTreeMap<RecordId, Record> = BTreeMap::new();
    for entry in entries {
        match entry.operation {
            Operation::Create | Operation::Update | Operation::Restore => {
                state.insert(entry.id.clone(), entry);
            }
            Operation::Delete => {
                if let Some(current) = state.get_mut(&entry.id) {
                    current.overlay_deletion(&entry);
                }
            }
        }
    }
    state
}
