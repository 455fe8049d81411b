//! MySQL Handler
//!
//! Implements the BackendHandler trait for MySQL/MariaDB using SQLx.
//! Introspection is scoped to the connection's current database. Catalog
//! columns are cast to CHAR because information_schema reports some of
//! them as binary strings.

use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row, TypeInfo};
use tracing::debug;

use super::{
    elapsed_ms, not_open, require_explainable, require_read, require_write, table_not_found,
};
use crate::config::{ConnectionProfile, EngineParams, ServerParams};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::traits::BackendHandler;
use crate::engine::types::{
    ColumnInfo, ConstraintKind, EngineKind, ForeignKey, QueryResult, Row as QRow, TableColumn,
    TableConstraint, TableIndex, TableInfo, TableSchema, TableStats, Value, WriteOutcome,
};

/// MySQL handler implementation
pub struct MysqlHandler {
    options: MySqlConnectOptions,
    pool: Option<MySqlPool>,
}

impl MysqlHandler {
    pub fn new(params: &ServerParams) -> EngineResult<Self> {
        Ok(Self {
            options: Self::connect_options(params)?,
            pool: None,
        })
    }

    /// Registry constructor
    pub fn boxed(profile: &ConnectionProfile) -> EngineResult<Box<dyn BackendHandler>> {
        match &profile.engine {
            EngineParams::Mysql(params) => Ok(Box::new(Self::new(params)?)),
            other => Err(EngineError::internal(format!(
                "MySQL handler cannot serve a '{}' connection",
                other.kind()
            ))),
        }
    }

    fn connect_options(params: &ServerParams) -> EngineResult<MySqlConnectOptions> {
        if let Some(url) = &params.url {
            return MySqlConnectOptions::from_str(url.expose())
                .map_err(|e| EngineError::connection_failed(format!("Invalid connection URL: {e}")));
        }

        let mut options = MySqlConnectOptions::new()
            .host(params.host.as_deref().unwrap_or("localhost"))
            .port(params.port.unwrap_or(3306));
        if let Some(database) = &params.database {
            options = options.database(database);
        }
        if let Some(user) = &params.user {
            options = options.username(user);
        }
        if let Some(password) = &params.password {
            options = options.password(password.expose());
        }
        Ok(options)
    }

    fn pool(&self) -> EngineResult<&MySqlPool> {
        self.pool.as_ref().ok_or_else(not_open)
    }

    fn quote_ident(name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    /// Converts a SQLx row to our universal Row type
    fn convert_row(mysql_row: &MySqlRow) -> QRow {
        let values: Vec<Value> = mysql_row
            .columns()
            .iter()
            .map(|col| Self::extract_value(mysql_row, col.ordinal()))
            .collect();

        QRow { values }
    }

    /// Extracts a value from a MySqlRow at the given index
    fn extract_value(row: &MySqlRow, idx: usize) -> Value {
        // Try u64 first for BIGINT UNSIGNED columns
        if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
            return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i8>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return v.map(Value::Bool).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(Value::Float).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
            return v.map(|f| Value::Float(f as f64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<rust_decimal::Decimal>, _>(idx) {
            return v.map(|d| Value::Text(d.to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return v
                .map(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
            return v
                .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
            return v
                .map(|t| Value::Text(t.format("%H:%M:%S").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
            return v.map(Value::Json).unwrap_or(Value::Null);
        }

        Value::Null
    }

    fn get_column_info(row: &MySqlRow) -> Vec<ColumnInfo> {
        row.columns()
            .iter()
            .map(|col| ColumnInfo {
                name: col.name().to_string(),
                data_type: col.type_info().name().to_string(),
            })
            .collect()
    }

    async fn table_columns(&self, table: &str) -> EngineResult<Vec<TableColumn>> {
        let rows: Vec<(String, String, String, Option<String>, String, Option<String>)> =
            sqlx::query_as(
                r#"
                SELECT
                    CAST(c.COLUMN_NAME AS CHAR),
                    CAST(c.COLUMN_TYPE AS CHAR),
                    CAST(c.IS_NULLABLE AS CHAR),
                    CAST(c.COLUMN_DEFAULT AS CHAR),
                    CAST(c.COLUMN_KEY AS CHAR),
                    CAST(c.COLUMN_COMMENT AS CHAR)
                FROM information_schema.COLUMNS c
                WHERE c.TABLE_SCHEMA = DATABASE() AND c.TABLE_NAME = ?
                ORDER BY c.ORDINAL_POSITION
                "#,
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
            .map(|(name, data_type, is_nullable, default_value, key, comment)| TableColumn {
                name,
                data_type,
                nullable: is_nullable == "YES",
                default_value,
                is_primary_key: key == "PRI",
                comment: comment.filter(|c| !c.is_empty()),
            })
            .collect())
    }

    async fn foreign_keys(&self, table: &str) -> EngineResult<Vec<ForeignKey>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT
                CAST(COLUMN_NAME AS CHAR),
                CAST(REFERENCED_TABLE_NAME AS CHAR),
                CAST(REFERENCED_COLUMN_NAME AS CHAR),
                CAST(CONSTRAINT_NAME AS CHAR)
            FROM information_schema.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = DATABASE()
              AND TABLE_NAME = ?
              AND REFERENCED_TABLE_NAME IS NOT NULL
            ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION
            "#,
        )
        .bind(table)
        .fetch_all(self.pool()?)
        .await
        .map_err(EngineError::from_query)?;

        Ok(rows
            .into_iter()
            .map(|(column, referenced_table, referenced_column, name)| ForeignKey {
                column,
                referenced_table,
                referenced_column,
                constraint_name: Some(name),
            })
            .collect())
    }

    async fn indexes(&self, table: &str) -> EngineResult<Vec<TableIndex>> {
        let rows: Vec<(String, i64, String)> = sqlx::query_as(
            r#"
            SELECT
                CAST(INDEX_NAME AS CHAR),
                CAST(NON_UNIQUE AS SIGNED),
                CAST(COLUMN_NAME AS CHAR)
            FROM information_schema.STATISTICS
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
            ORDER BY INDEX_NAME, SEQ_IN_INDEX
            "#,
        )
        .bind(table)
        .fetch_all(self.pool()?)
        .await
        .map_err(EngineError::from_query)?;

        let mut indexes: Vec<TableIndex> = Vec::new();
        for (name, non_unique, column) in rows {
            match indexes.last_mut() {
                Some(index) if index.name == name => index.columns.push(column),
                _ => indexes.push(TableIndex {
                    is_primary: name == "PRIMARY",
                    is_unique: non_unique == 0,
                    columns: vec![column],
                    definition: None,
                    name,
                }),
            }
        }
        Ok(indexes)
    }
}

#[async_trait]
impl BackendHandler for MysqlHandler {
    fn kind(&self) -> EngineKind {
        EngineKind::Mysql
    }

    async fn open(&mut self) -> EngineResult<()> {
        if self.pool.is_some() {
            return Ok(());
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(self.options.clone())
            .await
            .map_err(EngineError::from_connect)?;

        debug!("Opened MySQL connection");
        self.pool = Some(pool);
        Ok(())
    }

    async fn list_tables(&mut self) -> EngineResult<Vec<TableInfo>> {
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT CAST(TABLE_NAME AS CHAR), CAST(TABLE_COMMENT AS CHAR)
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
            "#,
        )
        .fetch_all(self.pool()?)
        .await
        .map_err(EngineError::from_query)?;

        Ok(rows
            .into_iter()
            .map(|(name, comment)| TableInfo {
                name,
                description: comment.filter(|c| !c.is_empty()),
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

        let mysql_rows: Vec<MySqlRow> = sqlx::query(sql)
            .fetch_all(self.pool()?)
            .await
            .map_err(EngineError::from_query)?;

        let execution_time_ms = elapsed_ms(start);
        let columns = mysql_rows.first().map(Self::get_column_info).unwrap_or_default();
        let rows = mysql_rows.iter().map(Self::convert_row).collect();

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
        self.table_columns(table).await?;
        let row: MySqlRow = sqlx::query(&format!("SHOW CREATE TABLE {}", Self::quote_ident(table)))
            .fetch_one(self.pool()?)
            .await
            .map_err(EngineError::from_query)?;

        match Self::extract_value(&row, 1) {
            Value::Text(ddl) => Ok(format!("{ddl};")),
            Value::Bytes(bytes) => Ok(format!("{};", String::from_utf8_lossy(&bytes))),
            _ => Err(EngineError::execution_error(format!(
                "SHOW CREATE TABLE returned no definition for '{table}'"
            ))),
        }
    }

    async fn table_indexes(&mut self, table: &str) -> EngineResult<Vec<TableIndex>> {
        self.table_columns(table).await?;
        self.indexes(table).await
    }

    async fn table_stats(&mut self, table: &str) -> EngineResult<TableStats> {
        let columns = self.table_columns(table).await?;
        let index_count = self.indexes(table).await?.len();

        let (rows, data_length, index_length, engine, auto_increment, created): (
            Option<i64>,
            Option<i64>,
            Option<i64>,
            Option<String>,
            Option<i64>,
            Option<String>,
        ) = sqlx::query_as(
            r#"
            SELECT
                CAST(TABLE_ROWS AS SIGNED),
                CAST(DATA_LENGTH AS SIGNED),
                CAST(INDEX_LENGTH AS SIGNED),
                CAST(ENGINE AS CHAR),
                CAST(AUTO_INCREMENT AS SIGNED),
                CAST(CREATE_TIME AS CHAR)
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
            "#,
        )
        .bind(table)
        .fetch_one(self.pool()?)
        .await
        .map_err(EngineError::from_query)?;

        let size = data_length.unwrap_or(0).max(0) + index_length.unwrap_or(0).max(0);
        let mut stats = TableStats {
            table: table.to_string(),
            row_count: rows.map(|n| n.max(0) as u64),
            column_count: columns.len(),
            index_count,
            size_bytes: Some(size as u64),
            ..Default::default()
        };
        if let Some(data_length) = data_length {
            stats.extra.insert("data_length".into(), data_length.to_string());
        }
        if let Some(index_length) = index_length {
            stats.extra.insert("index_length".into(), index_length.to_string());
        }
        if let Some(engine) = engine {
            stats.extra.insert("engine".into(), engine);
        }
        if let Some(next) = auto_increment {
            stats.extra.insert("auto_increment".into(), next.to_string());
        }
        if let Some(created) = created {
            stats.extra.insert("created".into(), created);
        }
        Ok(stats)
    }

    async fn table_constraints(&mut self, table: &str) -> EngineResult<Vec<TableConstraint>> {
        self.table_columns(table).await?;
        let rows: Vec<(String, String, Option<String>, Option<String>, Option<String>)> =
            sqlx::query_as(
                r#"
                SELECT
                    CAST(tc.CONSTRAINT_NAME AS CHAR),
                    CAST(tc.CONSTRAINT_TYPE AS CHAR),
                    CAST(GROUP_CONCAT(k.COLUMN_NAME ORDER BY k.ORDINAL_POSITION) AS CHAR),
                    CAST(MAX(k.REFERENCED_TABLE_NAME) AS CHAR),
                    CAST(GROUP_CONCAT(k.REFERENCED_COLUMN_NAME ORDER BY k.ORDINAL_POSITION) AS CHAR)
                FROM information_schema.TABLE_CONSTRAINTS tc
                LEFT JOIN information_schema.KEY_COLUMN_USAGE k
                  ON k.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA
                 AND k.TABLE_NAME = tc.TABLE_NAME
                 AND k.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
                WHERE tc.TABLE_SCHEMA = DATABASE() AND tc.TABLE_NAME = ?
                GROUP BY tc.CONSTRAINT_NAME, tc.CONSTRAINT_TYPE
                ORDER BY tc.CONSTRAINT_NAME
                "#,
            )
            .bind(table)
            .fetch_all(self.pool()?)
            .await
            .map_err(EngineError::from_query)?;

        Ok(rows
            .into_iter()
            .map(|(name, kind, columns, ref_table, ref_columns)| {
                let columns: Vec<String> = columns
                    .map(|c| c.split(',').map(str::to_string).collect())
                    .unwrap_or_default();
                let kind = match kind.as_str() {
                    "PRIMARY KEY" => ConstraintKind::PrimaryKey,
                    "FOREIGN KEY" => ConstraintKind::ForeignKey,
                    "UNIQUE" => ConstraintKind::Unique,
                    "CHECK" => ConstraintKind::Check,
                    _ => ConstraintKind::Other,
                };
                let definition = match (kind, ref_table, ref_columns) {
                    (ConstraintKind::ForeignKey, Some(t), Some(c)) => Some(format!(
                        "FOREIGN KEY ({}) REFERENCES {}({})",
                        columns.join(", "),
                        t,
                        c.replace(',', ", ")
                    )),
                    _ => None,
                };
                TableConstraint {
                    name,
                    kind,
                    columns,
                    definition,
                }
            })
            .collect())
    }

    async fn explain(&mut self, sql: &str) -> EngineResult<String> {
        require_explainable(sql)?;
        let rows: Vec<MySqlRow> = sqlx::query(&format!("EXPLAIN {sql}"))
            .fetch_all(self.pool()?)
            .await
            .map_err(EngineError::from_query)?;

        let Some(first) = rows.first() else {
            return Ok(String::new());
        };
        let header: Vec<String> = Self::get_column_info(first)
            .into_iter()
            .map(|c| c.name)
            .collect();

        let mut lines = vec![header.join(" | ")];
        for row in &rows {
            let values: Vec<String> = Self::convert_row(row)
                .values
                .iter()
                .map(Value::to_string)
                .collect();
            lines.push(values.join(" | "));
        }
        Ok(lines.join("\n"))
    }

    async fn cleanup(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            debug!("Closed MySQL connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(MysqlHandler::quote_ident("orders"), "`orders`");
        assert_eq!(MysqlHandler::quote_ident("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_builds_from_discrete_fields() {
        let handler = MysqlHandler::new(&ServerParams {
            host: Some("mysql.internal".into()),
            port: Some(3307),
            database: Some("shop".into()),
            user: Some("reader".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(handler.kind(), EngineKind::Mysql);
        assert!(handler.pool().is_err());
    }

    #[test]
    fn test_rejects_foreign_profile() {
        let profile = ConnectionProfile::new("x", EngineParams::Postgres(ServerParams::default()));
        assert!(MysqlHandler::boxed(&profile).is_err());
    }
}
