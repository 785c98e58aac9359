//! Networked backend over a bounded MySQL connection pool
//!
//! The pool is driven by a small private tokio runtime; every trait method
//! blocks on it. Callers must therefore not invoke this backend from inside
//! another tokio runtime. The engine only calls it from plain threads.
//!
//! Column types: Integer attributes are `BIGINT`, Permission attributes are
//! `BOOLEAN` (`TINYINT(1)`), Identifier/Enum/Ladder are `VARCHAR(255)` and
//! Text/MultiEnum are `TEXT`. Attribute columns are read back through
//! `CAST(.. AS CHAR)` so every class arrives as a string.

use crate::backend::{
    assemble_record, boolean_text, class_for, present_values, require_column, BackendKind,
    BackendStats, ColumnSet, PoolStats, SqlValue, StorageBackend, TABLE_NAME,
};
use crate::config::MySqlConfig;
use parking_lot::RwLock;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{MySql, Row};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tessera_core::{
    column_name, AttributeDefinition, AttributeType, BackendError, EntityAttributeRecord,
    IdentityId, SqlClass,
};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

type MySqlQuery<'q> = sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments>;

/// MySQL-backed attribute store
pub struct MySqlBackend {
    config: MySqlConfig,
    runtime: Runtime,
    pool: RwLock<Option<MySqlPool>>,
    columns: ColumnSet,
}

impl MySqlBackend {
    /// Backend for the given server; nothing connects until `initialize`
    pub fn new(config: MySqlConfig) -> Result<Self, BackendError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("tessera-mysql")
            .enable_all()
            .build()
            .map_err(|err| BackendError::Io(err.to_string()))?;
        Ok(Self {
            config,
            runtime,
            pool: RwLock::new(None),
            columns: ColumnSet::new(),
        })
    }

    /// Connection settings
    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }

    fn pool(&self) -> Result<MySqlPool, BackendError> {
        self.pool.read().clone().ok_or(BackendError::NotInitialized)
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .database(&self.config.database)
            .username(&self.config.username)
            .password(&self.config.password)
    }

    fn select_sql(&self, filter: &str) -> (String, Vec<(String, SqlClass)>) {
        let columns = self.columns.snapshot();
        let mut sql = String::from("SELECT uuid, player_name");
        for (column, _) in &columns {
            sql.push_str(&format!(", CAST({0} AS CHAR) AS {0}", column));
        }
        sql.push_str(" FROM ");
        sql.push_str(TABLE_NAME);
        sql.push_str(filter);
        (sql, columns)
    }

    async fn read_columns(pool: &MySqlPool) -> Result<BTreeMap<String, SqlClass>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT CAST(COLUMN_NAME AS CHAR), CAST(COLUMN_TYPE AS CHAR) \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?",
        )
        .bind(TABLE_NAME)
        .fetch_all(pool)
        .await?;
        let mut present = BTreeMap::new();
        for row in rows {
            let name: String = row.try_get(0)?;
            let declared: String = row.try_get(1)?;
            if crate::backend::column_suffix(&name).is_some() {
                present.insert(name, class_from_declared(&declared));
            }
        }
        Ok(present)
    }
}

impl std::fmt::Debug for MySqlBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlBackend")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .field("columns", &self.columns.len())
            .finish()
    }
}

impl StorageBackend for MySqlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mysql
    }

    fn initialize(&self) -> Result<(), BackendError> {
        if self.pool.read().is_some() {
            return Ok(());
        }
        let pool_cfg = &self.config.pool;
        let options = self.connect_options();
        let pool = self
            .block_on(
                MySqlPoolOptions::new()
                    .max_connections(pool_cfg.maximum_pool_size.max(1))
                    .min_connections(pool_cfg.effective_min_idle())
                    .acquire_timeout(pool_cfg.connection_timeout())
                    .idle_timeout(Some(pool_cfg.idle_timeout()))
                    .max_lifetime(Some(pool_cfg.max_lifetime()))
                    .test_before_acquire(true)
                    .connect_with(options),
            )
            .map_err(|err| BackendError::Connection(err.to_string()))?;

        let ddl = create_table_sql();
        let present = self
            .block_on(async {
                sqlx::query(&ddl).execute(&pool).await?;
                Self::read_columns(&pool).await
            })
            .map_err(mysql_err)?;
        info!(
            target: "tessera::mysql",
            host = %self.config.host,
            port = self.config.port,
            database = %self.config.database,
            max_pool_size = pool_cfg.maximum_pool_size,
            columns = present.len(),
            "MySQL backend initialized"
        );
        self.columns.replace(present);
        *self.pool.write() = Some(pool);
        Ok(())
    }

    fn shutdown(&self) -> Result<(), BackendError> {
        let pool = self.pool.write().take();
        self.columns.clear();
        if let Some(pool) = pool {
            self.block_on(pool.close());
            info!(target: "tessera::mysql", "MySQL pool closed");
        }
        Ok(())
    }

    fn migrate(&self, definitions: &[Arc<AttributeDefinition>]) -> Result<usize, BackendError> {
        let pool = self.pool()?;
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
            self.block_on(sqlx::query(&sql).execute(&pool))
                .map_err(|err| BackendError::Migration {
                    column: column.clone(),
                    reason: err.to_string(),
                })?;
            info!(
                target: "tessera::mysql",
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
        let pool = self.pool()?;
        let (sql, columns) = self.select_sql(" WHERE uuid = ?");
        let row = self
            .block_on(sqlx::query(&sql).bind(id.to_string()).fetch_optional(&pool))
            .map_err(mysql_err)?;
        row.map(|row| record_from_row(&row, &columns)).transpose()
    }

    fn load_all(&self) -> Result<Vec<EntityAttributeRecord>, BackendError> {
        let pool = self.pool()?;
        let (sql, columns) = self.select_sql("");
        let rows = self
            .block_on(sqlx::query(&sql).fetch_all(&pool))
            .map_err(mysql_err)?;
        rows.iter()
            .map(|row| record_from_row(row, &columns))
            .collect()
    }

    fn save(&self, record: &EntityAttributeRecord) -> Result<(), BackendError> {
        let pool = self.pool()?;
        let values = present_values(record, &self.columns);
        let upsert = upsert_sql();
        let update = update_sql(&values);
        self.block_on(async {
            bind_upsert(sqlx::query(&upsert), record.id(), record.display_name())
                .execute(&pool)
                .await?;
            if let Some(update) = &update {
                bind_update(sqlx::query(update), record.id(), &values)
                    .execute(&pool)
                    .await?;
            }
            Ok::<_, sqlx::Error>(())
        })
        .map_err(mysql_err)
    }

    fn save_batch(&self, records: &[EntityAttributeRecord]) -> Result<(), BackendError> {
        if records.is_empty() {
            return Ok(());
        }
        let pool = self.pool()?;
        let upsert = upsert_sql();
        let prepared: Vec<_> = records
            .iter()
            .map(|record| {
                let values = present_values(record, &self.columns);
                let update = update_sql(&values);
                (record, values, update)
            })
            .collect();
        let result = self.block_on(async {
            let mut tx = pool.begin().await?;
            for (record, values, update) in &prepared {
                bind_upsert(sqlx::query(&upsert), record.id(), record.display_name())
                    .execute(&mut *tx)
                    .await?;
                if let Some(update) = update {
                    bind_update(sqlx::query(update), record.id(), values)
                        .execute(&mut *tx)
                        .await?;
                }
            }
            // Dropping an uncommitted transaction rolls it back.
            tx.commit().await
        });
        match result {
            Ok(()) => {
                debug!(target: "tessera::mysql", records = records.len(), "Batch saved");
                Ok(())
            }
            Err(err) => {
                warn!(target: "tessera::mysql", error = %err, "Batch rolled back");
                Err(BackendError::Transaction(err.to_string()))
            }
        }
    }

    fn delete(&self, id: IdentityId) -> Result<bool, BackendError> {
        let pool = self.pool()?;
        let sql = format!("DELETE FROM {} WHERE uuid = ?", TABLE_NAME);
        let done = self
            .block_on(sqlx::query(&sql).bind(id.to_string()).execute(&pool))
            .map_err(mysql_err)?;
        Ok(done.rows_affected() > 0)
    }

    fn set_attribute(
        &self,
        id: IdentityId,
        display_name: &str,
        name: &str,
        value: &str,
    ) -> Result<(), BackendError> {
        let pool = self.pool()?;
        let (column, class) = require_column(&self.columns, name)?;
        let values = [(column, SqlValue::from_raw(class, value))];
        let upsert = upsert_sql();
        let update = update_sql(&values);
        self.block_on(async {
            bind_upsert(sqlx::query(&upsert), id, display_name)
                .execute(&pool)
                .await?;
            if let Some(update) = &update {
                bind_update(sqlx::query(update), id, &values)
                    .execute(&pool)
                    .await?;
            }
            Ok::<_, sqlx::Error>(())
        })
        .map_err(mysql_err)
    }

    fn get_attribute(&self, id: IdentityId, name: &str) -> Result<Option<String>, BackendError> {
        let pool = self.pool()?;
        let column = column_name(name);
        let Some(class) = self.columns.class_of(&column) else {
            return Ok(None);
        };
        let sql = format!(
            "SELECT CAST({} AS CHAR) FROM {} WHERE uuid = ?",
            column, TABLE_NAME
        );
        let row = self
            .block_on(sqlx::query(&sql).bind(id.to_string()).fetch_optional(&pool))
            .map_err(mysql_err)?;
        match row {
            Some(row) => {
                let raw: Option<String> = row.try_get(0).map_err(mysql_err)?;
                Ok(raw.map(|v| normalize(class, v)))
            }
            None => Ok(None),
        }
    }

    fn remove_attribute(&self, id: IdentityId, name: &str) -> Result<(), BackendError> {
        let pool = self.pool()?;
        let column = column_name(name);
        if !self.columns.contains(&column) {
            return Ok(());
        }
        let sql = format!("UPDATE {} SET {} = NULL WHERE uuid = ?", TABLE_NAME, column);
        self.block_on(sqlx::query(&sql).bind(id.to_string()).execute(&pool))
            .map_err(mysql_err)?;
        Ok(())
    }

    fn exists(&self, id: IdentityId) -> Result<bool, BackendError> {
        let pool = self.pool()?;
        let sql = format!("SELECT 1 FROM {} WHERE uuid = ? LIMIT 1", TABLE_NAME);
        let row = self
            .block_on(sqlx::query(&sql).bind(id.to_string()).fetch_optional(&pool))
            .map_err(mysql_err)?;
        Ok(row.is_some())
    }

    fn count(&self) -> Result<u64, BackendError> {
        let pool = self.pool()?;
        let sql = format!("SELECT COUNT(*) FROM {}", TABLE_NAME);
        let n: i64 = self
            .block_on(sqlx::query_scalar::<_, i64>(&sql).fetch_one(&pool))
            .map_err(mysql_err)?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    fn all_identities(&self) -> Result<Vec<IdentityId>, BackendError> {
        let pool = self.pool()?;
        let sql = format!("SELECT uuid FROM {}", TABLE_NAME);
        let raw: Vec<String> = self
            .block_on(sqlx::query_scalar::<_, String>(&sql).fetch_all(&pool))
            .map_err(mysql_err)?;
        Ok(raw
            .iter()
            .filter_map(|uuid| {
                let id = IdentityId::parse(uuid);
                if id.is_none() {
                    warn!(target: "tessera::mysql", uuid = %uuid, "Skipping malformed identity");
                }
                id
            })
            .collect())
    }

    fn update_display_name(&self, id: IdentityId, display_name: &str) -> Result<(), BackendError> {
        let pool = self.pool()?;
        let sql = format!("UPDATE {} SET player_name = ? WHERE uuid = ?", TABLE_NAME);
        self.block_on(
            sqlx::query(&sql)
                .bind(display_name)
                .bind(id.to_string())
                .execute(&pool),
        )
        .map_err(mysql_err)?;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        match self.pool() {
            Ok(pool) => self
                .block_on(sqlx::query("SELECT 1").execute(&pool))
                .is_ok(),
            Err(_) => false,
        }
    }

    fn stats(&self) -> Result<BackendStats, BackendError> {
        let player_count = self.count()?;
        let pool = self.pool()?;
        Ok(BackendStats {
            kind: BackendKind::Mysql,
            player_count,
            column_count: self.columns.len(),
            file_size: None,
            pool: Some(PoolStats {
                size: pool.size(),
                idle: pool.num_idle(),
                max_size: self.config.pool.maximum_pool_size,
            }),
        })
    }

    fn columns(&self) -> Vec<String> {
        self.columns.names()
    }
}

fn mysql_err(err: sqlx::Error) -> BackendError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            BackendError::Connection(err.to_string())
        }
        other => BackendError::Query(other.to_string()),
    }
}

fn create_table_sql() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            uuid VARCHAR(36) NOT NULL PRIMARY KEY,
            player_name VARCHAR(64) NOT NULL,
            last_updated TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
        )",
        TABLE_NAME
    )
}

fn upsert_sql() -> String {
    format!(
        "INSERT INTO {} (uuid, player_name) VALUES (?, ?) \
         ON DUPLICATE KEY UPDATE player_name = ?, last_updated = CURRENT_TIMESTAMP",
        TABLE_NAME
    )
}

fn update_sql(values: &[(String, SqlValue)]) -> Option<String> {
    if values.is_empty() {
        return None;
    }
    let assignments: Vec<String> = values
        .iter()
        .map(|(column, _)| format!("{} = ?", column))
        .collect();
    Some(format!(
        "UPDATE {} SET {} WHERE uuid = ?",
        TABLE_NAME,
        assignments.join(", ")
    ))
}

fn bind_upsert<'q>(query: MySqlQuery<'q>, id: IdentityId, display_name: &str) -> MySqlQuery<'q> {
    let name = display_name.to_string();
    query.bind(id.to_string()).bind(name.clone()).bind(name)
}

fn bind_update<'q>(
    query: MySqlQuery<'q>,
    id: IdentityId,
    values: &[(String, SqlValue)],
) -> MySqlQuery<'q> {
    let mut query = query;
    for (_, value) in values {
        query = match value {
            SqlValue::Integer(n) => query.bind(*n),
            SqlValue::Boolean(b) => query.bind(*b),
            SqlValue::Text(s) => query.bind(s.clone()),
        };
    }
    query.bind(id.to_string())
}

/// Escape a literal for inlining into DDL, where bind parameters are not allowed
fn quote_literal(raw: &str) -> String {
    format!("'{}'", raw.replace('\\', "\\\\").replace('\'', "''"))
}

/// Column type and default clause for a definition
pub(crate) fn column_type(definition: &AttributeDefinition) -> String {
    let default = definition.default_value();
    match definition.attribute_type() {
        AttributeType::Integer => match default.trim().parse::<i64>() {
            Ok(n) => format!("BIGINT DEFAULT {}", n),
            Err(_) => "BIGINT".to_string(),
        },
        AttributeType::Permission => {
            if default.eq_ignore_ascii_case("true") {
                "BOOLEAN DEFAULT TRUE".to_string()
            } else {
                "BOOLEAN DEFAULT FALSE".to_string()
            }
        }
        AttributeType::Identifier | AttributeType::Enum | AttributeType::Ladder => {
            if default.is_empty() {
                "VARCHAR(255)".to_string()
            } else {
                format!("VARCHAR(255) DEFAULT {}", quote_literal(default))
            }
        }
        // TEXT columns only accept expression defaults
        AttributeType::Text | AttributeType::MultiEnum => {
            if default.is_empty() {
                "TEXT".to_string()
            } else {
                format!("TEXT DEFAULT ({})", quote_literal(default))
            }
        }
    }
}

fn class_from_declared(declared: &str) -> SqlClass {
    let declared = declared.to_ascii_lowercase();
    if declared.starts_with("tinyint(1)") || declared.starts_with("bool") {
        SqlClass::Boolean
    } else if declared.contains("int") {
        SqlClass::Numeric
    } else {
        SqlClass::Text
    }
}

fn normalize(class: SqlClass, raw: String) -> String {
    match class {
        SqlClass::Boolean => boolean_text(&raw),
        _ => raw,
    }
}

fn record_from_row(
    row: &MySqlRow,
    columns: &[(String, SqlClass)],
) -> Result<EntityAttributeRecord, BackendError> {
    let uuid: String = row.try_get(0).map_err(mysql_err)?;
    let name: String = row.try_get(1).map_err(mysql_err)?;
    let mut cells = Vec::with_capacity(columns.len());
    for (i, (column, class)) in columns.iter().enumerate() {
        let raw: Option<String> = row.try_get(i + 2).map_err(mysql_err)?;
        cells.push((column.clone(), raw.map(|v| normalize(*class, v))));
    }
    assemble_record(&uuid, name, cells)
}
