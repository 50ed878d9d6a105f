//! The indexed query cache.
//!
//! A single SQLite database (`cache.db`) holds one table per stash plus a
//! metadata table. The cache always reflects the latest record state; the
//! append-only log is the authority and can rebuild the cache at any time.
//!
//! SQLite conventions: timestamps are TEXT in RFC 3339 UTC, absent values
//! are NULL, user-field values are TEXT (raw for strings, canonical JSON
//! otherwise).

use crate::error::{Error, Result};
use crate::record::{format_ts, Operation, Record};
use crate::stash::{fold, Stash};
use crate::FieldMap;
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;

/// Fixed system columns of every per-stash table, in storage order.
pub const SYSTEM_COLUMNS: &[&str] = &[
    "id",
    "hash",
    "parent_id",
    "created_at",
    "created_by",
    "updated_at",
    "updated_by",
    "branch",
    "deleted_at",
    "deleted_by",
];

const BUSY_TIMEOUT_MS: u64 = 5_000;

/// Metadata row for a stash.
#[derive(Debug, Clone)]
pub struct StashMeta {
    pub name: String,
    pub prefix: String,
    /// Serialized stash config, as stored in `config.json`
    pub config: String,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Comparison operators for [`Filter`] predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Like,
}

impl FilterOp {
    fn sql(self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Lt => "<",
            FilterOp::Gt => ">",
            FilterOp::Le => "<=",
            FilterOp::Ge => ">=",
            FilterOp::Like => "LIKE",
        }
    }

    /// Ordering comparisons cast both sides to REAL.
    fn is_numeric(self) -> bool {
        matches!(
            self,
            FilterOp::Lt | FilterOp::Gt | FilterOp::Le | FilterOp::Ge
        )
    }
}

/// A single `column <op> value` predicate; predicates are AND-combined.
#[derive(Debug, Clone)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

impl Filter {
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }
}

/// Options for listing records.
#[derive(Debug, Clone)]
pub struct ListOptions {
    /// `""` selects root records only, `"*"` all records, anything else an
    /// exact parent match.
    pub parent_id: String,
    /// Include soft-deleted rows (default false)
    pub include_deleted: bool,
    /// Return only soft-deleted rows; overrides `include_deleted`
    pub deleted_only: bool,
    /// AND-combined predicates over system or user columns
    pub filters: Vec<Filter>,
    /// Substring match across every user column and the id
    pub search: Option<String>,
    /// Order column, resolved case-insensitively; defaults to `updated_at`
    pub order_by: Option<String>,
    pub descending: bool,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            parent_id: "*".into(),
            include_deleted: false,
            deleted_only: false,
            filters: Vec::new(),
            search: None,
            order_by: None,
            descending: false,
            limit: None,
            offset: 0,
        }
    }
}

/// Indexed per-stash tables plus the stash metadata table.
#[derive(Debug)]
pub struct IndexCache {
    conn: Connection,
}

/// SQL identifier for a stash's table: hyphens become underscores.
fn table_name(stash_name: &str) -> String {
    stash_name.replace('-', "_")
}

impl IndexCache {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Self::setup(Connection::open(path)?)
    }

    /// In-memory cache, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::setup(Connection::open_in_memory()?)
    }

    fn setup(conn: Connection) -> Result<Self> {
        // journal_mode returns the resulting mode as a row
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS _stash_meta (
                name      TEXT PRIMARY KEY,
                prefix    TEXT NOT NULL,
                config    TEXT NOT NULL,
                last_sync TEXT
            )",
        )?;
        Ok(Self { conn })
    }

    /// Create the per-stash table, its indexes, and its metadata row.
    pub fn create_stash(&self, stash: &Stash) -> Result<()> {
        self.ensure_table(stash)?;
        self.update_meta(stash)?;
        Ok(())
    }

    /// Make sure the per-stash table exists with every configured user
    /// column. Missing columns are added; existing ones are left alone.
    pub fn ensure_table(&self, stash: &Stash) -> Result<()> {
        let t = table_name(&stash.name);
        self.conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{t}" (
                id         TEXT PRIMARY KEY,
                hash       TEXT NOT NULL DEFAULT '',
                parent_id  TEXT,
                created_at TEXT NOT NULL,
                created_by TEXT NOT NULL DEFAULT '',
                updated_at TEXT NOT NULL,
                updated_by TEXT NOT NULL DEFAULT '',
                branch     TEXT,
                deleted_at TEXT,
                deleted_by TEXT
            );
            CREATE INDEX IF NOT EXISTS "idx_{t}_parent_id"  ON "{t}"(parent_id);
            CREATE INDEX IF NOT EXISTS "idx_{t}_deleted_at" ON "{t}"(deleted_at);
            CREATE INDEX IF NOT EXISTS "idx_{t}_hash"       ON "{t}"(hash);
            CREATE INDEX IF NOT EXISTS "idx_{t}_branch"     ON "{t}"(branch);
            CREATE INDEX IF NOT EXISTS "idx_{t}_updated_at" ON "{t}"(updated_at);
            "#
        ))?;

        let existing = self.table_columns(&stash.name)?;
        for column in &stash.columns {
            if !existing.iter().any(|c| fold(c) == fold(&column.name)) {
                self.conn.execute_batch(&format!(
                    r#"ALTER TABLE "{t}" ADD COLUMN "{}" TEXT"#,
                    column.name
                ))?;
            }
        }
        Ok(())
    }

    /// Add one user column to an existing table and refresh the metadata
    /// row from the updated stash config.
    pub fn add_column(&self, stash: &Stash, column_name: &str) -> Result<()> {
        let t = table_name(&stash.name);
        self.conn.execute_batch(&format!(
            r#"ALTER TABLE "{t}" ADD COLUMN "{column_name}" TEXT"#
        ))?;
        self.update_meta(stash)?;
        Ok(())
    }

    /// Drop the per-stash table and its metadata row.
    pub fn drop_stash(&self, name: &str) -> Result<()> {
        let t = table_name(name);
        self.conn
            .execute_batch(&format!(r#"DROP TABLE IF EXISTS "{t}""#))?;
        self.conn
            .execute("DELETE FROM _stash_meta WHERE name = ?1", [name])?;
        Ok(())
    }

    /// Insert or refresh the metadata row, preserving `last_sync`.
    pub fn update_meta(&self, stash: &Stash) -> Result<()> {
        let config = serde_json::to_string(stash)?;
        self.conn.execute(
            "INSERT INTO _stash_meta (name, prefix, config) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET prefix = excluded.prefix, config = excluded.config",
            (&stash.name, &stash.prefix, &config),
        )?;
        Ok(())
    }

    /// Record when the stash was last synced from its log.
    pub fn touch_sync_time(&self, name: &str, when: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE _stash_meta SET last_sync = ?2 WHERE name = ?1",
            (name, format_ts(when)),
        )?;
        Ok(())
    }

    /// Metadata row for a stash, if present.
    pub fn meta(&self, name: &str) -> Result<Option<StashMeta>> {
        let row = self
            .conn
            .query_row(
                "SELECT name, prefix, config, last_sync FROM _stash_meta WHERE name = ?1",
                [name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        Ok(match row {
            None => None,
            Some((name, prefix, config, last_sync)) => Some(StashMeta {
                name,
                prefix,
                config,
                last_sync: match last_sync {
                    None => None,
                    Some(s) => Some(parse_ts(&s)?),
                },
            }),
        })
    }

    /// Whether the per-stash table exists.
    pub fn table_exists(&self, stash_name: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table_name(stash_name)],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// All column names of the per-stash table, system columns included.
    pub fn table_columns(&self, stash_name: &str) -> Result<Vec<String>> {
        let t = table_name(stash_name);
        let mut stmt = self
            .conn
            .prepare(&format!(r#"PRAGMA table_info("{t}")"#))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    /// User columns of the per-stash table (everything beyond the system
    /// set). Used by doctor to detect config/cache drift.
    pub fn user_columns(&self, stash_name: &str) -> Result<Vec<String>> {
        Ok(self
            .table_columns(stash_name)?
            .into_iter()
            .filter(|c| !SYSTEM_COLUMNS.contains(&c.as_str()))
            .collect())
    }

    /// Insert or replace one record.
    pub fn upsert(&self, stash: &Stash, record: &Record) -> Result<()> {
        let sql = upsert_sql(stash);
        self.conn
            .execute(&sql, params_from_iter(record_params(stash, record)))?;
        Ok(())
    }

    /// Remove one record row. Missing ids are a no-op.
    pub fn remove(&self, stash_name: &str, id: &str) -> Result<()> {
        let t = table_name(stash_name);
        self.conn
            .execute(&format!(r#"DELETE FROM "{t}" WHERE id = ?1"#), [id])?;
        Ok(())
    }

    /// Fetch one record by id, soft-deleted or not.
    pub fn get(&self, stash: &Stash, id: &str) -> Result<Option<Record>> {
        let sql = format!(
            r#"SELECT {} FROM "{}" WHERE id = ?1"#,
            select_columns(stash),
            table_name(&stash.name)
        );
        Ok(self
            .conn
            .query_row(&sql, [id], |row| row_to_record(stash, row))
            .optional()?)
    }

    /// Clear the per-stash table (creating it if missing) and bulk-insert
    /// `records` in one transaction. The rebuild path.
    pub fn replace_all(&mut self, stash: &Stash, records: &[Record]) -> Result<()> {
        self.ensure_table(stash)?;
        let t = table_name(&stash.name);
        let sql = upsert_sql(stash);

        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(r#"DELETE FROM "{t}""#))?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for record in records {
                stmt.execute(params_from_iter(record_params(stash, record)))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Highest direct-child sequence of `parent` plus one, or 1 when the
    /// parent has no direct children in the cache.
    pub fn next_child_seq(&self, stash_name: &str, parent: &str) -> Result<u64> {
        let t = table_name(stash_name);
        // substr() is 1-based: position after "parent." is len(parent)+2.
        let start = (parent.len() + 2) as i64;
        let max: Option<i64> = self.conn.query_row(
            &format!(
                r#"SELECT MAX(CAST(substr(id, ?1) AS INTEGER)) FROM "{t}"
                   WHERE id LIKE ?2 AND substr(id, ?1) NOT LIKE '%.%'"#
            ),
            (start, format!("{parent}.%")),
            |row| row.get(0),
        )?;
        Ok(max.map_or(1, |m| m as u64 + 1))
    }

    /// List records per [`ListOptions`].
    pub fn list(&self, stash: &Stash, opts: &ListOptions) -> Result<Vec<Record>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();

        match opts.parent_id.as_str() {
            "*" => {}
            "" => clauses.push("parent_id IS NULL".into()),
            parent => {
                clauses.push("parent_id = ?".into());
                params.push(SqlValue::Text(parent.into()));
            }
        }

        if opts.deleted_only {
            clauses.push("deleted_at IS NOT NULL".into());
        } else if !opts.include_deleted {
            clauses.push("deleted_at IS NULL".into());
        }

        for filter in &opts.filters {
            let column = resolve_column(stash, &filter.column)?;
            if filter.op.is_numeric() {
                clauses.push(format!(
                    r#"CAST("{column}" AS REAL) {} CAST(? AS REAL)"#,
                    filter.op.sql()
                ));
            } else {
                clauses.push(format!(r#""{column}" {} ?"#, filter.op.sql()));
            }
            params.push(SqlValue::Text(filter.value.clone()));
        }

        if let Some(term) = opts.search.as_deref().filter(|t| !t.is_empty()) {
            let pattern = format!("%{term}%");
            let mut alts = vec!["id LIKE ?".to_string()];
            params.push(SqlValue::Text(pattern.clone()));
            for column in &stash.columns {
                alts.push(format!(r#""{}" LIKE ?"#, column.name));
                params.push(SqlValue::Text(pattern.clone()));
            }
            clauses.push(format!("({})", alts.join(" OR ")));
        }

        let mut sql = format!(
            r#"SELECT {} FROM "{}""#,
            select_columns(stash),
            table_name(&stash.name)
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let order = match opts.order_by.as_deref() {
            None => "updated_at".to_string(),
            Some(name) => resolve_column(stash, name)?,
        };
        let direction = if opts.descending { "DESC" } else { "ASC" };
        sql.push_str(&format!(r#" ORDER BY "{order}" {direction}, id ASC"#));

        match (opts.limit, opts.offset) {
            (Some(limit), offset) => {
                sql.push_str(" LIMIT ? OFFSET ?");
                params.push(SqlValue::Integer(limit as i64));
                params.push(SqlValue::Integer(offset as i64));
            }
            (None, offset) if offset > 0 => {
                // -1 is SQLite's unlimited-LIMIT marker; OFFSET needs it.
                sql.push_str(" LIMIT -1 OFFSET ?");
                params.push(SqlValue::Integer(offset as i64));
            }
            (None, _) => {}
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params), |row| row_to_record(stash, row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Run an arbitrary read-only SELECT and return its rows as
    /// column-name → value maps. The query is not validated; callers must
    /// not pass DDL or DML.
    pub fn raw_query(&self, sql: &str) -> Result<Vec<FieldMap>> {
        let mut stmt = self.conn.prepare(sql)?;
        let column_names: Vec<String> =
            stmt.column_names().iter().map(|s| s.to_string()).collect();

        let rows = stmt.query_map([], |row| {
            let mut map = FieldMap::new();
            for (idx, name) in column_names.iter().enumerate() {
                map.insert(name.clone(), raw_value(row.get_ref(idx)?));
            }
            Ok(map)
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

/// Resolve a column reference case-insensitively against system + user
/// columns, returning the stored spelling.
fn resolve_column(stash: &Stash, name: &str) -> Result<String> {
    let folded = fold(name);
    if let Some(system) = SYSTEM_COLUMNS.iter().find(|c| **c == folded) {
        return Ok(system.to_string());
    }
    stash
        .column(name)
        .map(|c| c.name.clone())
        .ok_or_else(|| Error::ColumnNotFound(name.to_string()))
}

fn select_columns(stash: &Stash) -> String {
    let mut cols: Vec<String> = SYSTEM_COLUMNS.iter().map(|c| format!(r#""{c}""#)).collect();
    cols.extend(stash.columns.iter().map(|c| format!(r#""{}""#, c.name)));
    cols.join(", ")
}

fn upsert_sql(stash: &Stash) -> String {
    let placeholders = vec!["?"; SYSTEM_COLUMNS.len() + stash.columns.len()].join(", ");
    format!(
        r#"INSERT OR REPLACE INTO "{}" ({}) VALUES ({placeholders})"#,
        table_name(&stash.name),
        select_columns(stash)
    )
}

fn record_params(stash: &Stash, record: &Record) -> Vec<SqlValue> {
    let opt_text = |v: Option<&str>| match v {
        Some(s) if !s.is_empty() => SqlValue::Text(s.to_string()),
        _ => SqlValue::Null,
    };

    let mut params = vec![
        SqlValue::Text(record.id.clone()),
        SqlValue::Text(record.hash.clone()),
        opt_text(record.parent_id.as_deref()),
        SqlValue::Text(format_ts(record.created_at)),
        SqlValue::Text(record.created_by.clone()),
        SqlValue::Text(format_ts(record.updated_at)),
        SqlValue::Text(record.updated_by.clone()),
        opt_text(record.branch.as_deref()),
        record
            .deleted_at
            .map_or(SqlValue::Null, |ts| SqlValue::Text(format_ts(ts))),
        opt_text(record.deleted_by.as_deref()),
    ];
    for column in &stash.columns {
        params.push(encode_field(record.fields.get(&column.name)));
    }
    params
}

/// User-field storage encoding: raw text for strings, canonical JSON for
/// everything else, NULL when the field is absent.
fn encode_field(value: Option<&serde_json::Value>) -> SqlValue {
    match value {
        None => SqlValue::Null,
        Some(serde_json::Value::String(s)) => SqlValue::Text(s.clone()),
        Some(other) => SqlValue::Text(other.to_string()),
    }
}

/// Inverse of [`encode_field`]: JSON-parseable text that is not a bare
/// string comes back as its parsed value, everything else as a string.
fn decode_field(stored: String) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(&stored) {
        Ok(v) if !v.is_string() => v,
        _ => serde_json::Value::String(stored),
    }
}

fn raw_value(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => {
            serde_json::Number::from_f64(f).map_or(serde_json::Value::Null, serde_json::Value::Number)
        }
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::String(hex::encode(b)),
    }
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|d| Some(d.with_timezone(&Utc)))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| Error::ParseError {
            line: 0,
            message: format!("bad timestamp '{s}': {e}"),
        })
}

fn row_to_record(stash: &Stash, row: &Row<'_>) -> rusqlite::Result<Record> {
    let deleted_at = opt_ts_col(row, 8)?;
    let mut fields = FieldMap::new();
    for (offset, column) in stash.columns.iter().enumerate() {
        let idx = SYSTEM_COLUMNS.len() + offset;
        if let Some(stored) = row.get::<_, Option<String>>(idx)? {
            fields.insert(column.name.clone(), decode_field(stored));
        }
    }

    Ok(Record {
        id: row.get(0)?,
        hash: row.get(1)?,
        parent_id: row.get(2)?,
        created_at: ts_col(row, 3)?,
        created_by: row.get(4)?,
        updated_at: ts_col(row, 5)?,
        updated_by: row.get(6)?,
        branch: row.get(7)?,
        deleted_at,
        deleted_by: row.get(9)?,
        // the cache stores state, not history; the operation column of a
        // row is implied by its deletion state
        operation: if deleted_at.is_some() {
            Operation::Delete
        } else {
            Operation::Create
        },
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::now;
    use crate::stash::Column;
    use serde_json::json;

    fn test_stash() -> Stash {
        let mut stash = Stash::new("inventory", "inv-", "alice", now()).unwrap();
        stash.add_column(Column::new("Name", "alice", now())).unwrap();
        stash.add_column(Column::new("Price", "alice", now())).unwrap();
        stash
    }

    fn cache_with(stash: &Stash) -> IndexCache {
        let cache = IndexCache::open_in_memory().unwrap();
        cache.create_stash(stash).unwrap();
        cache
    }

    fn record(id: &str, fields: serde_json::Value) -> Record {
        Record::new(id, fields.as_object().unwrap().clone(), "alice", now())
    }

    #[test]
    fn create_stash_builds_table_and_meta() {
        let stash = test_stash();
        let cache = cache_with(&stash);

        assert!(cache.table_exists("inventory").unwrap());
        assert_eq!(cache.user_columns("inventory").unwrap(), vec!["Name", "Price"]);

        let meta = cache.meta("inventory").unwrap().unwrap();
        assert_eq!(meta.prefix, "inv-");
        assert!(meta.last_sync.is_none());
        let config: Stash = serde_json::from_str(&meta.config).unwrap();
        assert_eq!(config, stash);
    }

    #[test]
    fn table_name_mangles_hyphens() {
        let stash = Stash::new("my-things", "th-", "alice", now()).unwrap();
        let cache = cache_with(&stash);
        assert!(cache.table_exists("my-things").unwrap());
        assert_eq!(table_name("my-things"), "my_things");
    }

    #[test]
    fn upsert_and_get_roundtrip() {
        let stash = test_stash();
        let cache = cache_with(&stash);

        let mut rec = record("inv-aaa1", json!({"Name": "Laptop", "Price": 999}));
        rec.branch = Some("main".into());
        cache.upsert(&stash, &rec).unwrap();

        let got = cache.get(&stash, "inv-aaa1").unwrap().unwrap();
        assert_eq!(got.id, rec.id);
        assert_eq!(got.hash, rec.hash);
        assert_eq!(got.branch.as_deref(), Some("main"));
        assert_eq!(got.fields["Name"], json!("Laptop"));
        assert_eq!(got.fields["Price"], json!(999));
        assert_eq!(got.created_at, rec.created_at);

        assert!(cache.get(&stash, "inv-zzzz").unwrap().is_none());
    }

    #[test]
    fn upsert_replaces_existing_row() {
        let stash = test_stash();
        let cache = cache_with(&stash);

        cache
            .upsert(&stash, &record("inv-aaa1", json!({"Price": 100})))
            .unwrap();
        cache
            .upsert(&stash, &record("inv-aaa1", json!({"Price": 200})))
            .unwrap();

        let all = cache.list(&stash, &ListOptions::default()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].fields["Price"], json!(200));
    }

    #[test]
    fn empty_parent_and_branch_stored_as_null() {
        let stash = test_stash();
        let cache = cache_with(&stash);

        let mut rec = record("inv-aaa1", json!({}));
        rec.parent_id = Some(String::new());
        rec.branch = Some(String::new());
        cache.upsert(&stash, &rec).unwrap();

        let rows = cache
            .raw_query("SELECT parent_id, branch FROM inventory")
            .unwrap();
        assert_eq!(rows[0]["parent_id"], json!(null));
        assert_eq!(rows[0]["branch"], json!(null));
    }

    #[test]
    fn list_parent_modes() {
        let stash = test_stash();
        let cache = cache_with(&stash);

        let root = record("inv-aaa1", json!({}));
        let mut child = record("inv-aaa1.1", json!({}));
        child.parent_id = Some("inv-aaa1".into());
        cache.upsert(&stash, &root).unwrap();
        cache.upsert(&stash, &child).unwrap();

        let roots = cache
            .list(
                &stash,
                &ListOptions {
                    parent_id: String::new(),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id, "inv-aaa1");

        let all = cache.list(&stash, &ListOptions::default()).unwrap();
        assert_eq!(all.len(), 2);

        let children = cache
            .list(
                &stash,
                &ListOptions {
                    parent_id: "inv-aaa1".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, "inv-aaa1.1");
    }

    #[test]
    fn list_deleted_modes() {
        let stash = test_stash();
        let cache = cache_with(&stash);

        let active = record("inv-aaa1", json!({}));
        let mut deleted = record("inv-bbb2", json!({}));
        deleted.mark_deleted("bob", now());
        cache.upsert(&stash, &active).unwrap();
        cache.upsert(&stash, &deleted).unwrap();

        let visible = cache.list(&stash, &ListOptions::default()).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, "inv-aaa1");

        let with_deleted = cache
            .list(
                &stash,
                &ListOptions {
                    include_deleted: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(with_deleted.len(), 2);

        // deleted_only overrides include_deleted
        let only_deleted = cache
            .list(
                &stash,
                &ListOptions {
                    include_deleted: true,
                    deleted_only: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(only_deleted.len(), 1);
        assert_eq!(only_deleted[0].id, "inv-bbb2");
        assert!(only_deleted[0].is_deleted());
    }

    #[test]
    fn filters_and_numeric_casts() {
        let stash = test_stash();
        let cache = cache_with(&stash);

        cache
            .upsert(&stash, &record("inv-aaa1", json!({"Name": "A", "Price": 50})))
            .unwrap();
        cache
            .upsert(&stash, &record("inv-bbb2", json!({"Name": "B", "Price": 500})))
            .unwrap();

        let cheap = cache
            .list(
                &stash,
                &ListOptions {
                    filters: vec![Filter::new("price", FilterOp::Lt, "100")],
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(cheap.len(), 1);
        assert_eq!(cheap[0].id, "inv-aaa1");

        // 50 < 100 numerically even though "50" > "100" as text
        let expensive = cache
            .list(
                &stash,
                &ListOptions {
                    filters: vec![Filter::new("Price", FilterOp::Ge, "100")],
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(expensive.len(), 1);
        assert_eq!(expensive[0].id, "inv-bbb2");

        let named = cache
            .list(
                &stash,
                &ListOptions {
                    filters: vec![Filter::new("NAME", FilterOp::Eq, "A")],
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(named.len(), 1);

        let err = cache
            .list(
                &stash,
                &ListOptions {
                    filters: vec![Filter::new("ghost", FilterOp::Eq, "x")],
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::ColumnNotFound(_)));
    }

    #[test]
    fn search_spans_user_columns_and_id() {
        let stash = test_stash();
        let cache = cache_with(&stash);

        cache
            .upsert(&stash, &record("inv-aaa1", json!({"Name": "Laptop"})))
            .unwrap();
        cache
            .upsert(&stash, &record("inv-bbb2", json!({"Name": "Mouse"})))
            .unwrap();

        let by_value = cache
            .list(
                &stash,
                &ListOptions {
                    search: Some("apto".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(by_value.len(), 1);
        assert_eq!(by_value[0].id, "inv-aaa1");

        let by_id = cache
            .list(
                &stash,
                &ListOptions {
                    search: Some("bbb".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(by_id.len(), 1);
        assert_eq!(by_id[0].id, "inv-bbb2");
    }

    #[test]
    fn order_limit_offset() {
        let stash = test_stash();
        let cache = cache_with(&stash);

        for (id, price) in [("inv-aaa1", 30), ("inv-bbb2", 10), ("inv-ccc3", 20)] {
            cache
                .upsert(&stash, &record(id, json!({"Price": price})))
                .unwrap();
        }

        let ordered = cache
            .list(
                &stash,
                &ListOptions {
                    order_by: Some("price".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let ids: Vec<&str> = ordered.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["inv-bbb2", "inv-ccc3", "inv-aaa1"]);

        let top = cache
            .list(
                &stash,
                &ListOptions {
                    order_by: Some("Price".into()),
                    descending: true,
                    limit: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(top[0].id, "inv-aaa1");

        // offset without limit still applies
        let rest = cache
            .list(
                &stash,
                &ListOptions {
                    order_by: Some("Price".into()),
                    offset: 1,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].id, "inv-ccc3");
    }

    #[test]
    fn next_child_seq_direct_children_only() {
        let stash = test_stash();
        let cache = cache_with(&stash);

        assert_eq!(cache.next_child_seq("inventory", "inv-aaa1").unwrap(), 1);

        for id in ["inv-aaa1.1", "inv-aaa1.3", "inv-aaa1.3.7"] {
            let mut rec = record(id, json!({}));
            rec.parent_id = Some(crate::id::parent_of(id).to_string());
            cache.upsert(&stash, &rec).unwrap();
        }

        // grandchild .3.7 is not a direct child; max direct seq is 3
        assert_eq!(cache.next_child_seq("inventory", "inv-aaa1").unwrap(), 4);
        assert_eq!(cache.next_child_seq("inventory", "inv-aaa1.3").unwrap(), 8);
        assert_eq!(cache.next_child_seq("inventory", "inv-aaa1.1").unwrap(), 1);
    }

    #[test]
    fn replace_all_rebuilds_table_state() {
        let stash = test_stash();
        let mut cache = cache_with(&stash);

        cache
            .upsert(&stash, &record("inv-old1", json!({"Name": "stale"})))
            .unwrap();

        let fresh = vec![
            record("inv-aaa1", json!({"Name": "A"})),
            record("inv-bbb2", json!({"Name": "B"})),
        ];
        cache.replace_all(&stash, &fresh).unwrap();

        let all = cache.list(&stash, &ListOptions::default()).unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["inv-aaa1", "inv-bbb2"]);
    }

    #[test]
    fn add_column_alters_table() {
        let mut stash = test_stash();
        let cache = cache_with(&stash);

        stash
            .add_column(Column::new("Location", "alice", now()))
            .unwrap();
        cache.add_column(&stash, "Location").unwrap();

        assert_eq!(
            cache.user_columns("inventory").unwrap(),
            vec!["Name", "Price", "Location"]
        );
        let meta = cache.meta("inventory").unwrap().unwrap();
        let config: Stash = serde_json::from_str(&meta.config).unwrap();
        assert_eq!(config.columns.len(), 3);
    }

    #[test]
    fn drop_stash_removes_table_and_meta() {
        let stash = test_stash();
        let cache = cache_with(&stash);

        cache.drop_stash("inventory").unwrap();
        assert!(!cache.table_exists("inventory").unwrap());
        assert!(cache.meta("inventory").unwrap().is_none());
    }

    #[test]
    fn touch_sync_time_persists() {
        let stash = test_stash();
        let cache = cache_with(&stash);

        let when = now();
        cache.touch_sync_time("inventory", when).unwrap();
        let meta = cache.meta("inventory").unwrap().unwrap();
        assert_eq!(meta.last_sync, Some(when));

        // config refresh keeps last_sync
        cache.update_meta(&stash).unwrap();
        let meta = cache.meta("inventory").unwrap().unwrap();
        assert_eq!(meta.last_sync, Some(when));
    }

    #[test]
    fn field_value_types_roundtrip() {
        let mut stash = Stash::new("typed", "ty-", "alice", now()).unwrap();
        for name in ["s", "n", "b", "arr", "obj", "nul"] {
            stash.add_column(Column::new(name, "alice", now())).unwrap();
        }
        let cache = cache_with(&stash);

        let rec = record(
            "ty-aaa1",
            json!({
                "s": "plain",
                "n": 4.5,
                "b": true,
                "arr": [1, 2],
                "obj": {"k": "v"},
                "nul": null
            }),
        );
        cache.upsert(&stash, &rec).unwrap();

        let got = cache.get(&stash, "ty-aaa1").unwrap().unwrap();
        assert_eq!(got.fields["s"], json!("plain"));
        assert_eq!(got.fields["n"], json!(4.5));
        assert_eq!(got.fields["b"], json!(true));
        assert_eq!(got.fields["arr"], json!([1, 2]));
        assert_eq!(got.fields["obj"], json!({"k": "v"}));
        assert_eq!(got.fields["nul"], json!(null));
    }

    #[test]
    fn raw_query_returns_maps() {
        let stash = test_stash();
        let cache = cache_with(&stash);
        cache
            .upsert(&stash, &record("inv-aaa1", json!({"Name": "A"})))
            .unwrap();

        let rows = cache
            .raw_query("SELECT id, COUNT(*) AS n FROM inventory GROUP BY id")
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!("inv-aaa1"));
        assert_eq!(rows[0]["n"], json!(1));
    }
}
