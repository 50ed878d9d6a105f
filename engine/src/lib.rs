//! # Stash Engine
//!
//! A dual-store record engine for local-first data.
//!
//! Every stash (a named collection) keeps its data in two places:
//!
//! - an **append-only JSONL log** (`records.jsonl`) — the human-readable
//!   authority, one operation per line
//! - an **indexed SQLite cache** (`cache.db`) — fast queryable state,
//!   derived from the log and rebuildable at any time
//!
//! The [`Engine`] coordinates both: mutations append to the log first and
//! then upsert the cache, so a crash or failed upsert can always be
//! reconciled by replaying the log ([`Engine::rebuild_cache`]). The inverse
//! direction, [`Engine::flush_to_log`], compacts the log from the current
//! cache snapshot.
//!
//! ## Core Concepts
//!
//! ### Stashes and Columns
//!
//! A [`Stash`] has an immutable name, an immutable id prefix (`inv-`), and
//! an append-only list of user-defined [`Column`]s. Column names never
//! collide case-insensitively and never shadow the reserved `_`-prefixed
//! system names.
//!
//! ### Records
//!
//! A [`Record`] is system metadata (id, content hash, timestamps, actor
//! stamps, soft-delete state) plus an open-ended user [`FieldMap`]. Record
//! ids are hierarchical: `inv-k3x9.2` is the second child of `inv-k3x9`,
//! by string construction ([`id`]).
//!
//! ### Soft delete, restore, purge
//!
//! Deleting sets `deleted_at` and hides the record from default reads;
//! restoring clears it. Purging removes a soft-deleted record from the
//! cache (and its attachments); the log entry disappears at the next
//! compaction.
//!
//! ## Quick Start
//!
//! ```no_run
//! use stash_engine::{Column, Engine, NewRecord, Stash};
//! use stash_engine::record::now;
//! use serde_json::json;
//!
//! # fn main() -> stash_engine::Result<()> {
//! let mut engine = Engine::open(".stash")?;
//!
//! let mut stash = Stash::new("inventory", "inv-", "alice", now())?;
//! stash.add_column(Column::new("Name", "alice", now()))?;
//! stash.add_column(Column::new("Price", "alice", now()))?;
//! engine.create_stash(stash)?;
//!
//! let fields = json!({"Name": "Laptop", "Price": 999})
//!     .as_object().unwrap().clone();
//! let record = engine.create_record("inventory", NewRecord::new("alice", fields))?;
//! println!("created {} with hash {}", record.id, record.hash);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config_store;
pub mod doctor;
pub mod engine;
pub mod error;
pub mod hash;
pub mod id;
pub mod log;
pub mod paths;
pub mod record;
pub mod stash;

// Re-export main types at crate root
pub use cache::{Filter, FilterOp, IndexCache, ListOptions, StashMeta};
pub use config_store::ConfigStore;
pub use doctor::{CheckResult, CheckStatus, RepairOptions, RepairReport};
pub use engine::{Engine, NewRecord};
pub use error::{Error, Result};
pub use log::LogStore;
pub use record::{Operation, Record};
pub use stash::{Column, Stash, ValidateRule, RESERVED_NAMES};

/// Type aliases for clarity
pub type RecordId = String;
pub type StashName = String;
pub type ColumnName = String;
pub type Actor = String;
/// Open-ended user fields: column name to JSON value.
pub type FieldMap = serde_json::Map<String, serde_json::Value>;
