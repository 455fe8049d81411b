// SPDX-License-Identifier: Apache-2.0

//! SQLite Handler
//!
//! Implements the BackendHandler trait for SQLite databases using SQLx.
//!
//! ## SQLite Specifics
//!
//! - The profile's `path` is the database file; `:memory:` opens a private
//!   in-memory database that lives as long as the handler
//! - Introspection goes through the `pragma_*` table-valued functions so
//!   table names are bound, never interpolated
//! - One pooled connection per handler, closed on `cleanup()`

use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo};
use tracing::debug;

use super::{
    elapsed_ms, not_open, require_explainable, require_read, require_write, table_not_found,
};
use crate::config::{ConnectionProfile, EngineParams, SqliteParams};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::traits::BackendHandler;
use crate::engine::types::{
    ColumnInfo, ConstraintKind, EngineKind, ForeignKey, QueryResult, Row as QRow, TableColumn,
    TableConstraint, TableIndex, TableInfo, TableSchema, TableStats, Value, WriteOutcome,
};

/// SQLite handler implementation
pub struct SqliteHandler {
    path: String,
    pool: Option<SqlitePool>,
}

impl SqliteHandler {
    pub fn new(params: &SqliteParams) -> Self {
        Self {
            path: params.path.clone(),
            pool: None,
        }
    }

    /// Registry constructor
    pub fn boxed(profile: &ConnectionProfile) -> EngineResult<Box<dyn BackendHandler>> {
        match &profile.engine {
            EngineParams::Sqlite(params) => Ok(Box::new(Self::new(params))),
            other => Err(EngineError::internal(format!(
                "SQLite handler cannot serve a '{}' connection",
                other.kind()
            ))),
        }
    }

    fn pool(&self) -> EngineResult<&SqlitePool> {
        self.pool.as_ref().ok_or_else(not_open)
    }

    fn quote_ident(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Validates the SQLite connection path
    fn validate_path(path: &str) -> EngineResult<()> {
        let path = path.trim();

        if path == ":memory:" {
            return Ok(());
        }
        if path.is_empty() {
            return Err(EngineError::connection_failed("SQLite path cannot be empty."));
        }
        if path.contains("://") {
            return Err(EngineError::connection_failed(format!(
                "Invalid SQLite path format: {path}"
            )));
        }
        Ok(())
    }

    fn connect_options(path: &str) -> EngineResult<SqliteConnectOptions> {
        let path = path.trim();
        let options = if path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| EngineError::connection_failed(e.to_string()))?
        } else {
            SqliteConnectOptions::new().filename(path).create_if_missing(true)
        };
        Ok(options.busy_timeout(Duration::from_secs(30)))
    }

    /// Converts a SQLx row to our universal Row type
    fn convert_row(sqlite_row: &SqliteRow) -> QRow {
        let values: Vec<Value> = sqlite_row
            .columns()
            .iter()
            .map(|col| Self::extract_value(sqlite_row, col.ordinal()))
            .collect();

        QRow { values }
    }

    /// Extracts a value from a SqliteRow at the given index
    ///
    /// SQLite has dynamic typing, so we try multiple types in order of likelihood
    fn extract_value(row: &SqliteRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(Value::Float).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return v.map(Value::Bool).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }

        Value::Null
    }

    fn get_column_info(row: &SqliteRow) -> Vec<ColumnInfo> {
        row.columns()
            .iter()
            .map(|col| ColumnInfo {
                name: col.name().to_string(),
                data_type: col.type_info().name().to_string(),
            })
            .collect()
    }

    async fn table_columns(&self, table: &str) -> EngineResult<Vec<TableColumn>> {
        let rows: Vec<(i64, String, String, i64, Option<String>, i64)> = sqlx::query_as(
            r#"SELECT cid, name, type, "notnull", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid"#,
        )
        .bind(table)
        .fetch_all(self.pool()?)
        .await
        .map_err(EngineError::from_query)?;

        if rows.is_empty() {
            return Err(table_not_found(table));
        }

        Ok(rows
            .into_iter()
            .map(|(_cid, name, data_type, notnull, default_value, pk)| TableColumn {
                name,
                data_type,
                nullable: notnull == 0,
                default_value,
                is_primary_key: pk > 0,
                comment: None,
            })
            .collect())
    }

    async fn foreign_keys(&self, table: &str) -> EngineResult<Vec<ForeignKey>> {
        let rows: Vec<(i64, i64, String, String, Option<String>)> = sqlx::query_as(
            r#"SELECT id, seq, "table", "from", "to" FROM pragma_foreign_key_list(?1) ORDER BY id, seq"#,
        )
        .bind(table)
        .fetch_all(self.pool()?)
        .await
        .map_err(EngineError::from_query)?;

        Ok(rows
            .into_iter()
            .map(|(id, _seq, referenced_table, column, to)| ForeignKey {
                column,
                referenced_table,
                referenced_column: to.unwrap_or_default(),
                constraint_name: Some(format!("fk_{table}_{id}")),
            })
            .collect())
    }

    async fn indexes(&self, table: &str) -> EngineResult<Vec<TableIndex>> {
        let pool = self.pool()?;
        let index_list: Vec<(String, i64, String)> = sqlx::query_as(
            r#"SELECT name, "unique", origin FROM pragma_index_list(?1) ORDER BY name"#,
        )
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(EngineError::from_query)?;

        let mut indexes = Vec::with_capacity(index_list.len());
        for (name, unique, origin) in index_list {
            let columns: Vec<(String,)> = sqlx::query_as(
                "SELECT name FROM pragma_index_info(?1) WHERE name IS NOT NULL ORDER BY seqno",
            )
            .bind(&name)
            .fetch_all(pool)
            .await
            .map_err(EngineError::from_query)?;

            let definition: Option<(Option<String>,)> = sqlx::query_as(
                "SELECT sql FROM sqlite_master WHERE type = 'index' AND name = ?1",
            )
            .bind(&name)
            .fetch_optional(pool)
            .await
            .map_err(EngineError::from_query)?;

            indexes.push(TableIndex {
                is_primary: origin == "pk",
                is_unique: unique != 0,
                columns: columns.into_iter().map(|(c,)| c).collect(),
                definition: definition.and_then(|(sql,)| sql),
                name,
            });
        }
        Ok(indexes)
    }

    async fn index_origins(&self, table: &str) -> EngineResult<Vec<(String, String)>> {
        sqlx::query_as(r#"SELECT name, origin FROM pragma_index_list(?1) ORDER BY name"#)
            .bind(table)
            .fetch_all(self.pool()?)
            .await
            .map_err(EngineError::from_query)
    }
}

#[async_trait]
impl BackendHandler for SqliteHandler {
    fn kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    async fn open(&mut self) -> EngineResult<()> {
        if self.pool.is_some() {
            return Ok(());
        }
        Self::validate_path(&self.path)?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(Self::connect_options(&self.path)?)
            .await
            .map_err(EngineError::from_connect)?;

        debug!("Opened SQLite database {}", self.path);
        self.pool = Some(pool);
        Ok(())
    }

    async fn list_tables(&mut self) -> EngineResult<Vec<TableInfo>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT name
            FROM sqlite_master
            WHERE type = 'table'
              AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#,
        )
        .fetch_all(self.pool()?)
        .await
        .map_err(EngineError::from_query)?;

        Ok(rows
            .into_iter()
            .map(|(name,)| TableInfo {
                name,
                description: None,
            })
            .collect())
    }

    async fn get_schema(&mut self, table: &str) -> EngineResult<TableSchema> {
        let columns = self.table_columns(table).await?;
        let primary_key = columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.clone())
            .collect();
        let foreign_keys = self.foreign_keys(table).await?;
        let indexes = self.indexes(table).await?;

        Ok(TableSchema {
            table: table.to_string(),
            columns,
            primary_key,
            foreign_keys,
            indexes,
        })
    }

    async fn execute_read(&mut self, sql: &str) -> EngineResult<QueryResult> {
        require_read(sql)?;
        let start = Instant::now();

        let sqlite_rows: Vec<SqliteRow> = sqlx::query(sql)
            .fetch_all(self.pool()?)
            .await
            .map_err(EngineError::from_query)?;

        let execution_time_ms = elapsed_ms(start);
        let columns = sqlite_rows
            .first()
            .map(Self::get_column_info)
            .unwrap_or_default();
        let rows = sqlite_rows.iter().map(Self::convert_row).collect();

        Ok(QueryResult {
            columns,
            rows,
            execution_time_ms,
        })
    }

    async fn execute_write(&mut self, sql: &str) -> EngineResult<WriteOutcome> {
        require_write(sql)?;
        let result = sqlx::query(sql)
            .execute(self.pool()?)
            .await
            .map_err(EngineError::from_query)?;

        Ok(WriteOutcome {
            affected_rows: result.rows_affected(),
        })
    }

    async fn table_ddl(&mut self, table: &str) -> EngineResult<String> {
        let pool = self.pool()?;
        let table_sql: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
        )
        .bind(table)
        .fetch_optional(pool)
        .await
        .map_err(EngineError::from_query)?;

        let Some((Some(mut ddl),)) = table_sql else {
            return Err(table_not_found(table));
        };
        ddl.push(';');

        let index_sql: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT sql
            FROM sqlite_master
            WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL
            ORDER BY name
            "#,
        )
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(EngineError::from_query)?;

        for (sql,) in index_sql {
            ddl.push('\n');
            ddl.push_str(&sql);
            ddl.push(';');
        }
        Ok(ddl)
    }

    async fn table_indexes(&mut self, table: &str) -> EngineResult<Vec<TableIndex>> {
        self.table_columns(table).await?;
        self.indexes(table).await
    }

    async fn table_stats(&mut self, table: &str) -> EngineResult<TableStats> {
        let columns = self.table_columns(table).await?;
        let indexes = self.index_origins(table).await?;
        let pool = self.pool()?;

        let count_query = format!("SELECT COUNT(*) FROM {}", Self::quote_ident(table));
        let (row_count,): (i64,) = sqlx::query_as(&count_query)
            .fetch_one(pool)
            .await
            .map_err(EngineError::from_query)?;

        let (page_count,): (i64,) = sqlx::query_as("PRAGMA page_count")
            .fetch_one(pool)
            .await
            .map_err(EngineError::from_query)?;
        let (page_size,): (i64,) = sqlx::query_as("PRAGMA page_size")
            .fetch_one(pool)
            .await
            .map_err(EngineError::from_query)?;

        let mut stats = TableStats {
            table: table.to_string(),
            row_count: Some(row_count.max(0) as u64),
            column_count: columns.len(),
            index_count: indexes.len(),
            size_bytes: None,
            ..Default::default()
        };
        stats.extra.insert(
            "database_size_bytes".into(),
            (page_count.max(0) * page_size.max(0)).to_string(),
        );
        Ok(stats)
    }

    async fn table_constraints(&mut self, table: &str) -> EngineResult<Vec<TableConstraint>> {
        let columns = self.table_columns(table).await?;
        let mut constraints = Vec::new();

        let mut pk: Vec<(i64, String)> = Vec::new();
        let pk_rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT name, pk FROM pragma_table_info(?1) WHERE pk > 0")
                .bind(table)
                .fetch_all(self.pool()?)
                .await
                .map_err(EngineError::from_query)?;
        pk.extend(pk_rows.into_iter().map(|(name, pos)| (pos, name)));
        pk.sort();
        if !pk.is_empty() {
            constraints.push(TableConstraint {
                name: format!("pk_{table}"),
                kind: ConstraintKind::PrimaryKey,
                columns: pk.into_iter().map(|(_, name)| name).collect(),
                definition: None,
            });
        }

        for (name, origin) in self.index_origins(table).await? {
            if origin != "u" {
                continue;
            }
            let cols: Vec<(String,)> = sqlx::query_as(
                "SELECT name FROM pragma_index_info(?1) WHERE name IS NOT NULL ORDER BY seqno",
            )
            .bind(&name)
            .fetch_all(self.pool()?)
            .await
            .map_err(EngineError::from_query)?;
            constraints.push(TableConstraint {
                name,
                kind: ConstraintKind::Unique,
                columns: cols.into_iter().map(|(c,)| c).collect(),
                definition: None,
            });
        }

        for fk in self.foreign_keys(table).await? {
            constraints.push(TableConstraint {
                definition: Some(format!(
                    "FOREIGN KEY ({}) REFERENCES {}({})",
                    fk.column, fk.referenced_table, fk.referenced_column
                )),
                name: fk.constraint_name.unwrap_or_default(),
                kind: ConstraintKind::ForeignKey,
                columns: vec![fk.column],
            });
        }

        for column in columns.iter().filter(|c| !c.nullable && !c.is_primary_key) {
            constraints.push(TableConstraint {
                name: format!("nn_{}", column.name),
                kind: ConstraintKind::Other,
                columns: vec![column.name.clone()],
                definition: Some("NOT NULL".into()),
            });
        }

        Ok(constraints)
    }

    async fn explain(&mut self, sql: &str) -> EngineResult<String> {
        require_explainable(sql)?;
        let rows: Vec<SqliteRow> = sqlx::query(&format!("EXPLAIN QUERY PLAN {sql}"))
            .fetch_all(self.pool()?)
            .await
            .map_err(EngineError::from_query)?;

        let lines: Vec<String> = rows
            .iter()
            .map(|row| {
                let id: i64 = row.try_get("id").unwrap_or_default();
                let parent: i64 = row.try_get("parent").unwrap_or_default();
                let detail: String = row.try_get("detail").unwrap_or_default();
                format!("{id}|{parent}|{detail}")
            })
            .collect();
        Ok(lines.join("\n"))
    }

    async fn cleanup(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            debug!("Closed SQLite database {}", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path() {
        assert!(SqliteHandler::validate_path(":memory:").is_ok());
        assert!(SqliteHandler::validate_path("/tmp/app.db").is_ok());
        assert!(SqliteHandler::validate_path("").is_err());
        assert!(SqliteHandler::validate_path("postgres://x").is_err());
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(SqliteHandler::quote_ident("users"), "\"users\"");
        assert_eq!(SqliteHandler::quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let mut handler = SqliteHandler::new(&SqliteParams {
            path: ":memory:".into(),
        });
        handler.open().await.unwrap();

        sqlx::query("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE)")
            .execute(handler.pool().unwrap())
            .await
            .unwrap();

        let outcome = handler
            .execute_write("INSERT INTO users (name) VALUES ('alice'), ('bob')")
            .await
            .unwrap();
        assert_eq!(outcome.affected_rows, 2);

        let result = handler
            .execute_read("SELECT id, name FROM users ORDER BY id")
            .await
            .unwrap();
        assert_eq!(result.columns.len(), 2);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[1].values[1], Value::Text("bob".into()));

        let schema = handler.get_schema("users").await.unwrap();
        assert_eq!(schema.primary_key, vec!["id".to_string()]);
        assert!(!schema.columns[1].nullable);

        let constraints = handler.table_constraints("users").await.unwrap();
        assert!(constraints.iter().any(|c| c.kind == ConstraintKind::PrimaryKey));
        assert!(constraints.iter().any(|c| c.kind == ConstraintKind::Unique));

        assert!(handler.execute_read("DELETE FROM users").await.is_err());
        assert!(handler.execute_write("SELECT 1").await.is_err());
        assert!(handler.get_schema("missing").await.is_err());

        handler.cleanup().await;
        handler.cleanup().await;
        assert!(handler.list_tables().await.is_err());
    }
}
