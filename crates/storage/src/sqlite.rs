//! Embedded backend over a single SQLite connection
//!
//! All access goes through one `Connection` behind a mutex, so a batch save
//! holds the lock for its whole transaction and can never interleave with a
//! single-record save.
//!
//! Column affinities: Integer attributes are `INTEGER`, Permission attributes
//! are `BOOLEAN` (stored as 0/1), everything else is `TEXT`.

use crate::backend::{
    assemble_record, boolean_text, class_for, present_values, require_column, BackendKind,
    BackendStats, ColumnSet, SqlValue, StorageBackend, TABLE_NAME,
};
use parking_lot::Mutex;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, ToSql};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tessera_core::{
    column_name, AttributeDefinition, BackendError, EntityAttributeRecord, IdentityId, SqlClass,
};
use tracing::{debug, info, warn};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// SQLite-backed attribute store
pub struct SqliteBackend {
    location: Location,
    conn: Mutex<Option<Connection>>,
    columns: ColumnSet,
}

impl SqliteBackend {
    /// Backend storing its table in `path`; nothing is opened until `initialize`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::File(path.into()),
            conn: Mutex::new(None),
            columns: ColumnSet::new(),
        }
    }

    /// Backend over a private in-memory database
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            conn: Mutex::new(None),
            columns: ColumnSet::new(),
        }
    }

    /// Database file, None when in memory
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::File(path) => Some(path),
            Location::Memory => None,
        }
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T, BackendError> {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or(BackendError::NotInitialized)?;
        f(conn).map_err(sqlite_err)
    }

    fn open(&self) -> Result<Connection, BackendError> {
        let conn = match &self.location {
            Location::File(path) => {
                ensure_parent_dir(path)?;
                let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX;
                let conn = Connection::open_with_flags(path, flags)
                    .map_err(|err| BackendError::Connection(err.to_string()))?;
                conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
                    .map_err(sqlite_err)?;
                conn
            }
            Location::Memory => Connection::open_in_memory()
                .map_err(|err| BackendError::Connection(err.to_string()))?,
        };
        conn.busy_timeout(BUSY_TIMEOUT).map_err(sqlite_err)?;
        Ok(conn)
    }

    fn select_sql(&self, filter: &str) -> (String, Vec<(String, SqlClass)>) {
        let columns = self.columns.snapshot();
        let mut sql = String::from("SELECT uuid, player_name");
        for (column, _) in &columns {
            sql.push_str(", ");
            sql.push_str(column);
        }
        sql.push_str(" FROM ");
        sql.push_str(TABLE_NAME);
        sql.push_str(filter);
        (sql, columns)
    }
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("location", &self.location)
            .field("columns", &self.columns.len())
            .finish()
    }
}

impl StorageBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn initialize(&self) -> Result<(), BackendError> {
        let mut guard = self.conn.lock();
        if guard.is_some() {
            return Ok(());
        }
        let conn = self.open()?;
        conn.execute_batch(&create_table_sql()).map_err(sqlite_err)?;
        let present = read_columns(&conn).map_err(sqlite_err)?;
        info!(
            target: "tessera::sqlite",
            location = ?self.location,
            columns = present.len(),
            "SQLite backend initialized"
        );
        self.columns.replace(present);
        *guard = Some(conn);
        Ok(())
    }

    fn shutdown(&self) -> Result<(), BackendError> {
        let conn = self.conn.lock().take();
        self.columns.clear();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, err)| sqlite_err(err))?;
            info!(target: "tessera::sqlite", "SQLite backend closed");
        }
        Ok(())
    }

    fn migrate(&self, definitions: &[Arc<AttributeDefinition>]) -> Result<usize, BackendError> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(BackendError::NotInitialized)?;
        let mut added = 0;
        for definition in definitions {
            let column = definition.column_name();
            if self.columns.contains(&column) {
                continue;
            }
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                TABLE_NAME,
                column,
                column_type(definition)
            );
            conn.execute_batch(&sql)
                .map_err(|err| BackendError::Migration {
                    column: column.clone(),
                    reason: err.to_string(),
                })?;
            info!(
                target: "tessera::sqlite",
                column = %column,
                attribute = %definition.name(),
                "Added column"
            );
            self.columns.insert(column, class_for(definition));
            added += 1;
        }
        Ok(added)
    }

    fn load(&self, id: IdentityId) -> Result<Option<EntityAttributeRecord>, BackendError> {
        let (sql, columns) = self.select_sql(" WHERE uuid = ?1");
        let row = self.with_conn(|conn| {
            conn.query_row(&sql, params![id.to_string()], |row| read_row(row, &columns))
                .optional()
        })?;
        row.map(|(uuid, name, cells)| assemble_record(&uuid, name, cells))
            .transpose()
    }

    fn load_all(&self) -> Result<Vec<EntityAttributeRecord>, BackendError> {
        let (sql, columns) = self.select_sql("");
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| read_row(row, &columns))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        rows.into_iter()
            .map(|(uuid, name, cells)| assemble_record(&uuid, name, cells))
            .collect()
    }

    fn save(&self, record: &EntityAttributeRecord) -> Result<(), BackendError> {
        let values = present_values(record, &self.columns);
        self.with_conn(|conn| write_record(conn, record, &values))
    }

    fn save_batch(&self, records: &[EntityAttributeRecord]) -> Result<(), BackendError> {
        if records.is_empty() {
            return Ok(());
        }
        let prepared: Vec<_> = records
            .iter()
            .map(|record| (record, present_values(record, &self.columns)))
            .collect();
        let result = self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for (record, values) in &prepared {
                write_record(&tx, record, values)?;
            }
            tx.commit()
        });
        match result {
            Ok(()) => {
                debug!(target: "tessera::sqlite", records = records.len(), "Batch saved");
                Ok(())
            }
            Err(BackendError::Query(reason)) => {
                warn!(target: "tessera::sqlite", error = %reason, "Batch rolled back");
                Err(BackendError::Transaction(reason))
            }
            Err(err) => Err(err),
        }
    }

    fn delete(&self, id: IdentityId) -> Result<bool, BackendError> {
        let sql = format!("DELETE FROM {} WHERE uuid = ?1", TABLE_NAME);
        let changed = self.with_conn(|conn| conn.execute(&sql, params![id.to_string()]))?;
        Ok(changed > 0)
    }

    fn set_attribute(
        &self,
        id: IdentityId,
        display_name: &str,
        name: &str,
        value: &str,
    ) -> Result<(), BackendError> {
        let (column, class) = require_column(&self.columns, name)?;
        let values = [(column, SqlValue::from_raw(class, value))];
        self.with_conn(|conn| {
            upsert_base(conn, id, display_name)?;
            update_values(conn, id, &values)
        })
    }

    fn get_attribute(&self, id: IdentityId, name: &str) -> Result<Option<String>, BackendError> {
        let column = column_name(name);
        let Some(class) = self.columns.class_of(&column) else {
            return Ok(None);
        };
        let sql = format!("SELECT {} FROM {} WHERE uuid = ?1", column, TABLE_NAME);
        let value = self.with_conn(|conn| {
            conn.query_row(&sql, params![id.to_string()], |row| {
                Ok(cell_text(row.get_ref(0)?, class))
            })
            .optional()
        })?;
        Ok(value.flatten())
    }

    fn remove_attribute(&self, id: IdentityId, name: &str) -> Result<(), BackendError> {
        let column = column_name(name);
        if !self.columns.contains(&column) {
            return Ok(());
        }
        let sql = format!("UPDATE {} SET {} = NULL WHERE uuid = ?1", TABLE_NAME, column);
        self.with_conn(|conn| conn.execute(&sql, params![id.to_string()]))?;
        Ok(())
    }

    fn exists(&self, id: IdentityId) -> Result<bool, BackendError> {
        let sql = format!("SELECT 1 FROM {} WHERE uuid = ?1", TABLE_NAME);
        let found = self.with_conn(|conn| {
            conn.query_row(&sql, params![id.to_string()], |row| row.get::<_, i64>(0))
                .optional()
        })?;
        Ok(found.is_some())
    }

    fn count(&self) -> Result<u64, BackendError> {
        let sql = format!("SELECT COUNT(*) FROM {}", TABLE_NAME);
        let n = self.with_conn(|conn| conn.query_row(&sql, [], |row| row.get::<_, i64>(0)))?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    fn all_identities(&self) -> Result<Vec<IdentityId>, BackendError> {
        let sql = format!("SELECT uuid FROM {}", TABLE_NAME);
        let raw = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(raw
            .iter()
            .filter_map(|uuid| {
                let id = IdentityId::parse(uuid);
                if id.is_none() {
                    warn!(target: "tessera::sqlite", uuid = %uuid, "Skipping malformed identity");
                }
                id
            })
            .collect())
    }

    fn update_display_name(&self, id: IdentityId, display_name: &str) -> Result<(), BackendError> {
        let sql = format!(
            "UPDATE {} SET player_name = ?1, last_updated = strftime('%s','now') WHERE uuid = ?2",
            TABLE_NAME
        );
        self.with_conn(|conn| conn.execute(&sql, params![display_name, id.to_string()]))?;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.with_conn(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)))
            .is_ok()
    }

    fn stats(&self) -> Result<BackendStats, BackendError> {
        let player_count = self.count()?;
        let file_size = self
            .path()
            .and_then(|path| std::fs::metadata(path).ok())
            .map(|meta| meta.len());
        Ok(BackendStats {
            kind: BackendKind::Sqlite,
            player_count,
            column_count: self.columns.len(),
            file_size,
            pool: None,
        })
    }

    fn columns(&self) -> Vec<String> {
        self.columns.names()
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Integer(n) => ToSqlOutput::from(*n),
            SqlValue::Boolean(b) => ToSqlOutput::from(i64::from(*b)),
            SqlValue::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

fn sqlite_err(err: rusqlite::Error) -> BackendError {
    BackendError::Query(err.to_string())
}

fn ensure_parent_dir(path: &Path) -> Result<(), BackendError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|err| BackendError::Io(err.to_string()))
        }
        _ => Ok(()),
    }
}

fn create_table_sql() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            uuid TEXT PRIMARY KEY NOT NULL,
            player_name TEXT NOT NULL,
            last_updated INTEGER NOT NULL DEFAULT (strftime('%s','now'))
        );",
        TABLE_NAME
    )
}

/// Column type and default clause for a definition
pub(crate) fn column_type(definition: &AttributeDefinition) -> String {
    let default = definition.default_value();
    match class_for(definition) {
        SqlClass::Numeric => match default.trim().parse::<i64>() {
            Ok(n) => format!("INTEGER DEFAULT {}", n),
            Err(_) => "INTEGER".to_string(),
        },
        SqlClass::Boolean => {
            if default.eq_ignore_ascii_case("true") {
                "BOOLEAN DEFAULT 1".to_string()
            } else {
                "BOOLEAN DEFAULT 0".to_string()
            }
        }
        SqlClass::Text if default.is_empty() => "TEXT".to_string(),
        SqlClass::Text => format!("TEXT DEFAULT '{}'", default.replace('\'', "''")),
    }
}

fn class_from_declared(declared: &str) -> SqlClass {
    let declared = declared.to_ascii_uppercase();
    if declared.contains("INT") {
        SqlClass::Numeric
    } else if declared.contains("BOOL") {
        SqlClass::Boolean
    } else {
        SqlClass::Text
    }
}

fn read_columns(conn: &Connection) -> rusqlite::Result<BTreeMap<String, SqlClass>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", TABLE_NAME))?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?))
    })?;
    let mut present = BTreeMap::new();
    for row in rows {
        let (name, declared) = row?;
        if crate::backend::column_suffix(&name).is_some() {
            present.insert(name, class_from_declared(&declared));
        }
    }
    Ok(present)
}

type RawRow = (String, String, Vec<(String, Option<String>)>);

fn read_row(row: &rusqlite::Row<'_>, columns: &[(String, SqlClass)]) -> rusqlite::Result<RawRow> {
    let uuid: String = row.get(0)?;
    let name: String = row.get(1)?;
    let mut cells = Vec::with_capacity(columns.len());
    for (i, (column, class)) in columns.iter().enumerate() {
        cells.push((column.clone(), cell_text(row.get_ref(i + 2)?, *class)));
    }
    Ok((uuid, name, cells))
}

fn cell_text(value: ValueRef<'_>, class: SqlClass) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(n) => Some(match class {
            SqlClass::Boolean => (n != 0).to_string(),
            _ => n.to_string(),
        }),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            Some(match class {
                SqlClass::Boolean => boolean_text(&text),
                _ => text.into_owned(),
            })
        }
    }
}

fn upsert_base(conn: &Connection, id: IdentityId, display_name: &str) -> rusqlite::Result<()> {
    let sql = format!(
        "INSERT INTO {} (uuid, player_name, last_updated) VALUES (?1, ?2, strftime('%s','now'))
         ON CONFLICT(uuid) DO UPDATE SET player_name = excluded.player_name,
         last_updated = excluded.last_updated",
        TABLE_NAME
    );
    conn.execute(&sql, params![id.to_string(), display_name])?;
    Ok(())
}

fn update_values(
    conn: &Connection,
    id: IdentityId,
    values: &[(String, SqlValue)],
) -> rusqlite::Result<()> {
    if values.is_empty() {
        return Ok(());
    }
    let assignments: Vec<String> = values
        .iter()
        .enumerate()
        .map(|(i, (column, _))| format!("{} = ?{}", column, i + 1))
        .collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE uuid = ?{}",
        TABLE_NAME,
        assignments.join(", "),
        values.len() + 1
    );
    let uuid = id.to_string();
    let mut bound: Vec<&dyn ToSql> = values.iter().map(|(_, v)| v as &dyn ToSql).collect();
    bound.push(&uuid);
    conn.execute(&sql, rusqlite::params_from_iter(bound))?;
    Ok(())
}

fn write_record(
    conn: &Connection,
    record: &EntityAttributeRecord,
    values: &[(String, SqlValue)],
) -> rusqlite::Result<()> {
    upsert_base(conn, record.id(), record.display_name())?;
    update_values(conn, record.id(), values)
}
