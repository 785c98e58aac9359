//! Backend contract shared by the embedded and networked stores
//!
//! Records cross this boundary keyed by attribute name on the way in and by
//! column suffix on the way out. The repository owns the mapping back to
//! definition names; backends only know columns.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tessera_core::{
    column_name, AttributeDefinition, BackendError, EntityAttributeRecord, IdentityId, SqlClass,
    COLUMN_PREFIX,
};

/// Name of the single table holding every identity
pub const TABLE_NAME: &str = "player_information";

/// Which dialect a backend speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Embedded single-file store
    #[default]
    Sqlite,
    /// Networked pooled store
    #[serde(alias = "mariadb")]
    Mysql,
}

impl BackendKind {
    /// Configuration name
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::Mysql => "mysql",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Open connections
    pub size: u32,
    /// Open connections not checked out
    pub idle: usize,
    /// Configured upper bound
    pub max_size: u32,
}

/// Backend health snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendStats {
    /// Dialect
    pub kind: BackendKind,
    /// Rows in the table
    pub player_count: u64,
    /// Attribute columns present
    pub column_count: usize,
    /// Database file size in bytes (embedded, file-backed only)
    pub file_size: Option<u64>,
    /// Pool occupancy (networked only)
    pub pool: Option<PoolStats>,
}

impl fmt::Display for BackendStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} players, {} columns",
            self.kind, self.player_count, self.column_count
        )?;
        if let Some(size) = self.file_size {
            write!(f, ", {} bytes", size)?;
        }
        if let Some(pool) = &self.pool {
            write!(
                f,
                ", pool {}/{} ({} idle)",
                pool.size, pool.max_size, pool.idle
            )?;
        }
        Ok(())
    }
}

/// Relational persistence of attribute records
///
/// Every method is blocking. Implementations must be safe to call from many
/// threads at once; how they serialize access is their own business.
pub trait StorageBackend: Send + Sync {
    /// Dialect of this backend
    fn kind(&self) -> BackendKind;

    /// Connect, create the base table if absent and load the present columns
    fn initialize(&self) -> Result<(), BackendError>;

    /// Release connections; later calls fail with `NotInitialized`
    fn shutdown(&self) -> Result<(), BackendError>;

    /// Add a column for every definition that lacks one
    ///
    /// Strictly additive. Returns the number of columns added, so a repeated
    /// call with the same definitions returns 0.
    fn migrate(&self, definitions: &[Arc<AttributeDefinition>]) -> Result<usize, BackendError>;

    /// Fetch one record; entries are keyed by column suffix and NULLs are omitted
    fn load(&self, id: IdentityId) -> Result<Option<EntityAttributeRecord>, BackendError>;

    /// Fetch every record
    fn load_all(&self) -> Result<Vec<EntityAttributeRecord>, BackendError>;

    /// Upsert the base row, then write every value whose column exists
    fn save(&self, record: &EntityAttributeRecord) -> Result<(), BackendError>;

    /// Save all records in one transaction; nothing is written on failure
    fn save_batch(&self, records: &[EntityAttributeRecord]) -> Result<(), BackendError>;

    /// Remove an identity's row; returns whether one existed
    fn delete(&self, id: IdentityId) -> Result<bool, BackendError>;

    /// Upsert the base row and write one attribute
    fn set_attribute(
        &self,
        id: IdentityId,
        display_name: &str,
        name: &str,
        value: &str,
    ) -> Result<(), BackendError>;

    /// Read one attribute; None when the row or the value is absent
    fn get_attribute(&self, id: IdentityId, name: &str) -> Result<Option<String>, BackendError>;

    /// Set one attribute to NULL
    fn remove_attribute(&self, id: IdentityId, name: &str) -> Result<(), BackendError>;

    /// Whether a row exists for the identity
    fn exists(&self, id: IdentityId) -> Result<bool, BackendError>;

    /// Number of rows
    fn count(&self) -> Result<u64, BackendError>;

    /// Every stored identity
    fn all_identities(&self) -> Result<Vec<IdentityId>, BackendError>;

    /// Rename an identity without touching its attributes
    fn update_display_name(&self, id: IdentityId, display_name: &str) -> Result<(), BackendError>;

    /// Whether a trivial round trip succeeds
    fn is_healthy(&self) -> bool;

    /// Row count, column count and dialect-specific metrics
    fn stats(&self) -> Result<BackendStats, BackendError>;

    /// Attribute columns currently present, sorted
    fn columns(&self) -> Vec<String>;
}

/// Attribute columns present in the table and their storage class
#[derive(Debug, Default)]
pub struct ColumnSet {
    inner: RwLock<BTreeMap<String, SqlClass>>,
}

impl ColumnSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set
    pub fn replace(&self, columns: BTreeMap<String, SqlClass>) {
        *self.inner.write() = columns;
    }

    /// Record a column as present
    pub fn insert(&self, column: impl Into<String>, class: SqlClass) {
        self.inner.write().insert(column.into(), class);
    }

    /// Whether a column is present
    pub fn contains(&self, column: &str) -> bool {
        self.inner.read().contains_key(column)
    }

    /// Storage class of a present column
    pub fn class_of(&self, column: &str) -> Option<SqlClass> {
        self.inner.read().get(column).copied()
    }

    /// Sorted snapshot of (column, class)
    pub fn snapshot(&self) -> Vec<(String, SqlClass)> {
        self.inner
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Sorted column names
    pub fn names(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    /// Number of present columns
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no column is present
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Forget every column
    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

/// A raw attribute string lowered to a typed SQL parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    /// Integer column value
    Integer(i64),
    /// Boolean column value
    Boolean(bool),
    /// Anything stored as text
    Text(String),
}

impl SqlValue {
    /// Lower a raw string for a column of the given class
    ///
    /// Values that do not fit the class stay text and let the database decide.
    pub fn from_raw(class: SqlClass, raw: &str) -> Self {
        match class {
            SqlClass::Numeric => match raw.trim().parse::<i64>() {
                Ok(n) => SqlValue::Integer(n),
                Err(_) => SqlValue::Text(raw.to_string()),
            },
            SqlClass::Boolean => {
                if raw.eq_ignore_ascii_case("true") {
                    SqlValue::Boolean(true)
                } else if raw.eq_ignore_ascii_case("false") {
                    SqlValue::Boolean(false)
                } else {
                    SqlValue::Text(raw.to_string())
                }
            }
            SqlClass::Text => SqlValue::Text(raw.to_string()),
        }
    }
}

/// Storage class used for a definition's column
pub fn class_for(definition: &AttributeDefinition) -> SqlClass {
    definition.attribute_type().sql_class()
}

/// Attribute columns of a record that exist in `columns`, in column order
pub(crate) fn present_values(
    record: &EntityAttributeRecord,
    columns: &ColumnSet,
) -> Vec<(String, SqlValue)> {
    let mut out: Vec<(String, SqlValue)> = record
        .values()
        .iter()
        .filter_map(|(name, raw)| {
            let column = column_name(name);
            columns
                .class_of(&column)
                .map(|class| (column, SqlValue::from_raw(class, raw)))
        })
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

/// Suffix of an attribute column, None for base columns
pub fn column_suffix(column: &str) -> Option<&str> {
    column
        .strip_prefix(COLUMN_PREFIX)
        .filter(|suffix| !suffix.is_empty())
}

/// Build a record from a row's identity, name and (column, value) pairs
pub(crate) fn assemble_record(
    uuid: &str,
    display_name: String,
    cells: impl IntoIterator<Item = (String, Option<String>)>,
) -> Result<EntityAttributeRecord, BackendError> {
    let id = IdentityId::parse(uuid)
        .ok_or_else(|| BackendError::Query(format!("malformed identity in table: {}", uuid)))?;
    let values: HashMap<String, String> = cells
        .into_iter()
        .filter_map(|(column, value)| {
            let suffix = column_suffix(&column)?.to_string();
            value.map(|v| (suffix, v))
        })
        .collect();
    Ok(EntityAttributeRecord::with_values(id, display_name, values))
}

/// Normalize a value read from a boolean column
pub(crate) fn boolean_text(raw: &str) -> String {
    match raw.trim() {
        "1" => "true".to_string(),
        "0" => "false".to_string(),
        other => other.to_string(),
    }
}

/// Resolve a present column for an attribute name or fail
pub(crate) fn require_column(
    columns: &ColumnSet,
    name: &str,
) -> Result<(String, SqlClass), BackendError> {
    let column = column_name(name);
    match columns.class_of(&column) {
        Some(class) => Ok((column, class)),
        None => Err(BackendError::Query(format!(
            "no column {} for attribute {}",
            column, name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_value_lowering() {
        assert_eq!(SqlValue::from_raw(SqlClass::Numeric, "42"), SqlValue::Integer(42));
        assert_eq!(
            SqlValue::from_raw(SqlClass::Boolean, "TRUE"),
            SqlValue::Boolean(true)
        );
        assert_eq!(
            SqlValue::from_raw(SqlClass::Text, "42"),
            SqlValue::Text("42".to_string())
        );
        assert_eq!(
            SqlValue::from_raw(SqlClass::Numeric, "x"),
            SqlValue::Text("x".to_string())
        );
    }

    #[test]
    fn test_column_suffix_skips_base_columns() {
        assert_eq!(column_suffix("info_coins"), Some("coins"));
        assert_eq!(column_suffix("player_name"), None);
        assert_eq!(column_suffix("info_"), None);
    }

    #[test]
    fn test_assemble_record_omits_nulls() {
        let id = IdentityId::new();
        let record = assemble_record(
            &id.to_string(),
            "Steve".to_string(),
            vec![
                ("info_coins".to_string(), Some("5".to_string())),
                ("info_rank".to_string(), None),
            ],
        )
        .unwrap();
        assert_eq!(record.id(), id);
        assert_eq!(record.get("coins"), Some("5"));
        assert!(!record.has("rank"));
    }

    #[test]
    fn test_assemble_record_rejects_bad_identity() {
        let err = assemble_record("nope", String::new(), Vec::new()).unwrap_err();
        assert!(matches!(err, BackendError::Query(_)));
    }

    #[test]
    fn test_column_set_is_sorted() {
        let set = ColumnSet::new();
        set.insert("info_b", SqlClass::Text);
        set.insert("info_a", SqlClass::Numeric);
        assert_eq!(set.names(), vec!["info_a", "info_b"]);
        assert_eq!(set.class_of("info_a"), Some(SqlClass::Numeric));
        assert!(!set.contains("info_c"));
    }

    #[test]
    fn test_present_values_drops_unknown_columns() {
        let set = ColumnSet::new();
        set.insert("info_coins", SqlClass::Numeric);
        let mut record = EntityAttributeRecord::new(IdentityId::new(), "Steve");
        record.set("coins", "3");
        record.set("ghost", "x");
        let values = present_values(&record, &set);
        assert_eq!(
            values,
            vec![("info_coins".to_string(), SqlValue::Integer(3))]
        );
    }

    #[test]
    fn test_stats_display() {
        let stats = BackendStats {
            kind: BackendKind::Sqlite,
            player_count: 2,
            column_count: 3,
            file_size: Some(4096),
            pool: None,
        };
        assert_eq!(stats.to_string(), "sqlite: 2 players, 3 columns, 4096 bytes");
    }
}
