//! Record types and the operation log vocabulary.
//!
//! A record is system metadata plus an open-ended map of user fields.
//! Changes are expressed as operations appended to the per-stash log;
//! the cache only ever holds the latest state.

use crate::{hash, Actor, FieldMap, RecordId};
use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// The kind of change a log entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Restore,
}

/// A data record with its system metadata.
///
/// On the wire (one JSON object per log line) the system attributes use
/// reserved `_`-prefixed keys; user fields sit alongside them at the top
/// level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record id: `<prefix><base36 x4>` plus optional `.N` child segments
    #[serde(rename = "_id")]
    pub id: RecordId,
    /// 12-hex-char content hash of the user fields
    #[serde(rename = "_hash")]
    pub hash: String,
    /// Parent record id for hierarchical records
    #[serde(rename = "_parent", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<RecordId>,
    #[serde(rename = "_created_at")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "_created_by")]
    pub created_by: Actor,
    #[serde(rename = "_updated_at")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "_updated_by")]
    pub updated_by: Actor,
    /// Branch label stamped by the caller, if any
    #[serde(rename = "_branch", default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Set when the record is soft-deleted
    #[serde(
        rename = "_deleted_at",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(
        rename = "_deleted_by",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub deleted_by: Option<Actor>,
    /// Operation this log entry records
    #[serde(rename = "_op")]
    pub operation: Operation,
    /// User fields, keyed by column name
    #[serde(flatten)]
    pub fields: FieldMap,
}

/// Current wall-clock time, truncated to whole seconds.
///
/// Both stores serialize timestamps at second precision; truncating at the
/// source keeps the log and the cache byte-identical on round trips.
pub fn now() -> DateTime<Utc> {
    Utc::now().with_nanosecond(0).expect("zero nanoseconds is valid")
}

/// Render a timestamp the way both stores persist it: RFC 3339 UTC,
/// second precision, `Z` suffix.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl Record {
    /// Build a freshly created record. The hash is computed from `fields`.
    pub fn new(
        id: impl Into<RecordId>,
        fields: FieldMap,
        actor: impl Into<Actor>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let actor = actor.into();
        let hash = hash::content_hash(&fields);
        Self {
            id: id.into(),
            hash,
            parent_id: None,
            created_at: timestamp,
            created_by: actor.clone(),
            updated_at: timestamp,
            updated_by: actor,
            branch: None,
            deleted_at: None,
            deleted_by: None,
            operation: Operation::Create,
            fields,
        }
    }

    /// Check if the record is active (not soft-deleted).
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Check if the record is soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Replace the user fields and recompute the hash.
    pub fn set_fields(&mut self, fields: FieldMap) {
        self.fields = fields;
        self.hash = hash::content_hash(&self.fields);
    }

    /// Stamp an update by `actor` at `timestamp`.
    pub fn touch(&mut self, actor: impl Into<Actor>, timestamp: DateTime<Utc>) {
        self.updated_at = timestamp;
        self.updated_by = actor.into();
    }

    /// Soft-delete: set deletion metadata and align `updated_*` with it.
    pub fn mark_deleted(&mut self, actor: impl Into<Actor>, timestamp: DateTime<Utc>) {
        let actor = actor.into();
        self.deleted_at = Some(timestamp);
        self.deleted_by = Some(actor.clone());
        self.updated_at = timestamp;
        self.updated_by = actor;
        self.operation = Operation::Delete;
    }

    /// Undo a soft delete.
    pub fn mark_restored(&mut self, actor: impl Into<Actor>, timestamp: DateTime<Utc>) {
        self.deleted_at = None;
        self.deleted_by = None;
        self.updated_at = timestamp;
        self.updated_by = actor.into();
        self.operation = Operation::Restore;
    }

    /// Copy the deletion metadata of a `delete` log entry onto this record.
    ///
    /// Used during log replay: a delete entry overlays the deletion fields
    /// and updated stamps of whatever state the record had at that point.
    pub fn overlay_deletion(&mut self, delete_entry: &Record) {
        self.deleted_at = delete_entry.deleted_at;
        self.deleted_by = delete_entry.deleted_by.clone();
        self.updated_at = delete_entry.updated_at;
        self.updated_by = delete_entry.updated_by.clone();
        self.operation = Operation::Delete;
    }
}
