//! Stash and column definitions.
//!
//! A stash is a named collection with a fixed id prefix and an append-only
//! list of user-defined columns. Schema rules live here: name validation,
//! reserved-name checks, and per-column value validation.

use crate::error::{Error, Result};
use crate::{id, Actor, ColumnName, FieldMap, StashName};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// System column names, never user-creatable (checked case-insensitively).
pub const RESERVED_NAMES: &[&str] = &[
    "_id",
    "_hash",
    "_parent",
    "_created_at",
    "_created_by",
    "_updated_at",
    "_updated_by",
    "_branch",
    "_deleted_at",
    "_deleted_by",
    "_op",
];

/// Maximum length of stash and column names.
pub const MAX_NAME_LEN: usize = 64;

/// Case-fold a name for comparison. All column lookups, reserved-name
/// checks, and order-by resolution compare folded names while storage
/// keeps the original casing.
pub fn fold(name: &str) -> String {
    name.to_lowercase()
}

/// Built-in value validation rules for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidateRule {
    Email,
    Url,
    Number,
    Date,
}

/// A user-defined column in a stash's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: ColumnName,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub added_at: DateTime<Utc>,
    pub added_by: Actor,
    /// Optional built-in validation applied to values on write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<ValidateRule>,
    /// Allowed string values, if restricted
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    #[serde(default)]
    pub required: bool,
}

impl Column {
    /// Create a plain column with no validation rules.
    pub fn new(
        name: impl Into<ColumnName>,
        actor: impl Into<Actor>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            added_at: timestamp,
            added_by: actor.into(),
            validate: None,
            allowed: None,
            required: false,
        }
    }

    /// Validate a field value against this column's rules.
    ///
    /// `None` and JSON null only fail when the column is required.
    pub fn validate_value(&self, value: Option<&serde_json::Value>) -> Result<()> {
        let value = match value {
            None | Some(serde_json::Value::Null) => {
                if self.required {
                    return Err(Error::InvalidValue {
                        column: self.name.clone(),
                        reason: "required field is missing".into(),
                    });
                }
                return Ok(());
            }
            Some(v) => v,
        };

        if let Some(allowed) = &self.allowed {
            let s = value.as_str().unwrap_or_default();
            if !allowed.iter().any(|a| a == s) {
                return Err(Error::InvalidValue {
                    column: self.name.clone(),
                    reason: format!("value must be one of: {}", allowed.join(", ")),
                });
            }
        }

        match self.validate {
            None => Ok(()),
            Some(ValidateRule::Email) => {
                let s = value.as_str().unwrap_or_default();
                if s.contains('@') && s.len() > 2 && !s.starts_with('@') && !s.ends_with('@') {
                    Ok(())
                } else {
                    self.value_error("not a valid email address")
                }
            }
            Some(ValidateRule::Url) => {
                let s = value.as_str().unwrap_or_default();
                if s.starts_with("http://") || s.starts_with("https://") {
                    Ok(())
                } else {
                    self.value_error("not a valid URL")
                }
            }
            Some(ValidateRule::Number) => {
                let ok = value.is_number()
                    || value
                        .as_str()
                        .map(|s| s.parse::<f64>().is_ok())
                        .unwrap_or(false);
                if ok {
                    Ok(())
                } else {
                    self.value_error("not a number")
                }
            }
            Some(ValidateRule::Date) => {
                let s = value.as_str().unwrap_or_default();
                let ok = DateTime::parse_from_rfc3339(s).is_ok()
                    || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok();
                if ok {
                    Ok(())
                } else {
                    self.value_error("not a date (expected RFC 3339 or YYYY-MM-DD)")
                }
            }
        }
    }

    fn value_error(&self, reason: &str) -> Result<()> {
        Err(Error::InvalidValue {
            column: self.name.clone(),
            reason: reason.into(),
        })
    }
}

/// A named collection of records sharing a prefix and a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stash {
    pub name: StashName,
    pub prefix: String,
    #[serde(rename = "created")]
    pub created_at: DateTime<Utc>,
    pub created_by: Actor,
    /// User-defined columns, append-only, in insertion order
    #[serde(default)]
    pub columns: Vec<Column>,
}

impl Stash {
    /// Create a stash after validating its name and prefix.
    pub fn new(
        name: impl Into<StashName>,
        prefix: impl Into<String>,
        actor: impl Into<Actor>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let name = name.into();
        let prefix = prefix.into();
        validate_stash_name(&name)?;
        id::validate_prefix(&prefix)?;
        Ok(Self {
            name,
            prefix,
            created_at: timestamp,
            created_by: actor.into(),
            columns: Vec::new(),
        })
    }

    /// Look up a column case-insensitively.
    pub fn column(&self, name: &str) -> Option<&Column> {
        let folded = fold(name);
        self.columns.iter().find(|c| fold(&c.name) == folded)
    }

    /// Append a column, enforcing name rules and uniqueness.
    pub fn add_column(&mut self, column: Column) -> Result<()> {
        validate_column_name(&column.name)?;
        if self.column(&column.name).is_some() {
            return Err(Error::ColumnExists(column.name));
        }
        self.columns.push(column);
        Ok(())
    }

    /// Validate a user field map against the schema: every key must name
    /// an existing column, required columns must be present, and values
    /// must satisfy the column rules. Returns the map with keys normalized
    /// to the stored column casing.
    pub fn validate_fields(&self, fields: FieldMap) -> Result<FieldMap> {
        let mut normalized = FieldMap::new();
        for (key, value) in fields {
            let column = self
                .column(&key)
                .ok_or_else(|| Error::ColumnNotFound(key.clone()))?;
            column.validate_value(Some(&value))?;
            normalized.insert(column.name.clone(), value);
        }
        for column in &self.columns {
            if column.required && !normalized.contains_key(&column.name) {
                column.validate_value(None)?;
            }
        }
        Ok(normalized)
    }
}

/// Validate a stash name: letter-start, then letters/digits/underscore/
/// hyphen, at most 64 characters.
pub fn validate_stash_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let first_ok = chars.next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false);
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !first_ok || !rest_ok || name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidStashName(name.to_string()));
    }
    Ok(())
}

/// Validate a column name: reserved names are rejected first (any casing),
/// then letter-start, letters/digits/underscore, at most 64 characters.
pub fn validate_column_name(name: &str) -> Result<()> {
    let folded = fold(name);
    if RESERVED_NAMES.contains(&folded.as_str()) {
        return Err(Error::ReservedColumnName(name.to_string()));
    }
    let invalid = |reason: &str| Error::InvalidColumnName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(invalid("must be 1-64 characters"));
    }
    let mut chars = name.chars();
    if !chars.next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false) {
        return Err(invalid("must start with a letter"));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid("may contain only letters, digits, and underscores"));
    }
    Ok(())
}
