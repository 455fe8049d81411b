//! PostgreSQL Handler
//!
//! Implements the BackendHandler trait for PostgreSQL databases using SQLx.
//! Introspection is scoped to one schema (`schema` in the profile, default
//! `public`). PostgreSQL has no `SHOW CREATE TABLE`, so DDL is rebuilt from
//! `pg_attribute`, `pg_constraint` and `pg_indexes`.

use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
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

const DEFAULT_SCHEMA: &str = "public";

/// PostgreSQL handler implementation
pub struct PostgresHandler {
    options: PgConnectOptions,
    schema: String,
    pool: Option<PgPool>,
}

impl PostgresHandler {
    pub fn new(params: &ServerParams) -> EngineResult<Self> {
        Ok(Self {
            options: Self::connect_options(params)?,
            schema: params
                .schema
                .clone()
                .unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            pool: None,
        })
    }

    /// Registry constructor
    pub fn boxed(profile: &ConnectionProfile) -> EngineResult<Box<dyn BackendHandler>> {
        match &profile.engine {
            EngineParams::Postgres(params) => Ok(Box::new(Self::new(params)?)),
            other => Err(EngineError::internal(format!(
                "PostgreSQL handler cannot serve a '{}' connection",
                other.kind()
            ))),
        }
    }

    fn connect_options(params: &ServerParams) -> EngineResult<PgConnectOptions> {
        if let Some(url) = &params.url {
            return PgConnectOptions::from_str(url.expose())
                .map_err(|e| EngineError::connection_failed(format!("Invalid connection URL: {e}")));
        }

        let mut options = PgConnectOptions::new()
            .host(params.host.as_deref().unwrap_or("localhost"))
            .port(params.port.unwrap_or(5432))
            .database(params.database.as_deref().unwrap_or("postgres"));
        if let Some(user) = &params.user {
            options = options.username(user);
        }
        if let Some(password) = &params.password {
            options = options.password(password.expose());
        }
        Ok(options)
    }

    fn pool(&self) -> EngineResult<&PgPool> {
        self.pool.as_ref().ok_or_else(not_open)
    }

    /// Converts a SQLx row to our universal Row type
    fn convert_row(pg_row: &PgRow) -> QRow {
        let values: Vec<Value> = pg_row
            .columns()
            .iter()
            .map(|col| Self::extract_value(pg_row, col.ordinal()))
            .collect();

        QRow { values }
    }

    /// Extracts a value from a PgRow at the given index
    fn extract_value(row: &PgRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
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
        if let Ok(v) = row.try_get::<Option<uuid::Uuid>, _>(idx) {
            return v.map(|u| Value::Text(u.to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
            return v.map(Value::Json).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            return v.map(|dt| Value::Text(dt.to_rfc3339())).unwrap_or(Value::Null);
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

        Value::Null
    }

    fn get_column_info(row: &PgRow) -> Vec<ColumnInfo> {
        row.columns()
            .iter()
            .map(|col| ColumnInfo {
                name: col.name().to_string(),
                data_type: col.type_info().name().to_string(),
            })
            .collect()
    }

    async fn table_columns(&self, table: &str) -> EngineResult<Vec<TableColumn>> {
        let pool = self.pool()?;
        let column_rows: Vec<(String, String, String, Option<String>, Option<String>)> =
            sqlx::query_as(
                r#"
                SELECT
                    c.column_name::text,
                    c.data_type::text,
                    c.is_nullable::text,
                    c.column_default::text,
                    pgd.description::text
                FROM information_schema.columns c
                LEFT JOIN pg_catalog.pg_statio_all_tables st
                  ON st.schemaname = c.table_schema AND st.relname = c.table_name
                LEFT JOIN pg_catalog.pg_description pgd
                  ON pgd.objoid = st.relid AND pgd.objsubid = c.ordinal_position
                WHERE c.table_schema = $1 AND c.table_name = $2
                ORDER BY c.ordinal_position
                "#,
            )
            .bind(&self.schema)
            .bind(table)
            .fetch_all(pool)
            .await
            .map_err(EngineError::from_query)?;

        if column_rows.is_empty() {
            return Err(table_not_found(table));
        }

        let pk_columns = self.primary_key(table).await?;
        Ok(column_rows
            .into_iter()
            .map(|(name, data_type, is_nullable, default_value, comment)| TableColumn {
                is_primary_key: pk_columns.contains(&name),
                name,
                data_type,
                nullable: is_nullable == "YES",
                default_value,
                comment,
            })
            .collect())
    }

    async fn primary_key(&self, table: &str) -> EngineResult<Vec<String>> {
        let pk_rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT a.attname::text
            FROM pg_index i
            JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
            JOIN pg_class c ON c.oid = i.indrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE i.indisprimary
              AND n.nspname = $1
              AND c.relname = $2
            ORDER BY array_position(i.indkey, a.attnum)
            "#,
        )
        .bind(&self.schema)
        .bind(table)
        .fetch_all(self.pool()?)
        .await
        .map_err(EngineError::from_query)?;

        Ok(pk_rows.into_iter().map(|(name,)| name).collect())
    }

    async fn foreign_keys(&self, table: &str) -> EngineResult<Vec<ForeignKey>> {
        let fk_rows: Vec<(String, String, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT
                kcu.column_name::text,
                ccu.table_name::text AS foreign_table_name,
                ccu.column_name::text AS foreign_column_name,
                tc.constraint_name::text
            FROM
                information_schema.table_constraints AS tc
                JOIN information_schema.key_column_usage AS kcu
                  ON tc.constraint_name = kcu.constraint_name
                  AND tc.table_schema = kcu.table_schema
                JOIN information_schema.constraint_column_usage AS ccu
                  ON ccu.constraint_name = tc.constraint_name
                  AND ccu.table_schema = tc.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
                AND tc.table_schema = $1
                AND tc.table_name = $2
            "#,
        )
        .bind(&self.schema)
        .bind(table)
        .fetch_all(self.pool()?)
        .await
        .map_err(EngineError::from_query)?;

        Ok(fk_rows
            .into_iter()
            .map(|(column, referenced_table, referenced_column, constraint_name)| ForeignKey {
                column,
                referenced_table,
                referenced_column,
                constraint_name,
            })
            .collect())
    }

    async fn indexes(&self, table: &str) -> EngineResult<Vec<TableIndex>> {
        let rows: Vec<(String, bool, bool, String, Vec<String>)> = sqlx::query_as(
            r#"
            SELECT
                i.relname::text,
                ix.indisunique,
                ix.indisprimary,
                pg_get_indexdef(ix.indexrelid),
                ARRAY(
                    SELECT a.attname::text
                    FROM unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord)
                    JOIN pg_attribute a ON a.attrelid = ix.indrelid AND a.attnum = k.attnum
                    ORDER BY k.ord
                )
            FROM pg_index ix
            JOIN pg_class t ON t.oid = ix.indrelid
            JOIN pg_class i ON i.oid = ix.indexrelid
            JOIN pg_namespace n ON n.oid = t.relnamespace
            WHERE n.nspname = $1 AND t.relname = $2
            ORDER BY i.relname
            "#,
        )
        .bind(&self.schema)
        .bind(table)
        .fetch_all(self.pool()?)
        .await
        .map_err(EngineError::from_query)?;

        Ok(rows
            .into_iter()
            .map(|(name, is_unique, is_primary, definition, columns)| TableIndex {
                name,
                columns,
                is_unique,
                is_primary,
                definition: Some(definition),
            })
            .collect())
    }

    async fn constraints(&self, table: &str) -> EngineResult<Vec<TableConstraint>> {
        let rows: Vec<(String, String, String, Vec<String>)> = sqlx::query_as(
            r#"
            SELECT
                con.conname::text,
                con.contype::text,
                pg_get_constraintdef(con.oid),
                ARRAY(
                    SELECT a.attname::text
                    FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
                    JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
                    ORDER BY k.ord
                )
            FROM pg_constraint con
            JOIN pg_class c ON c.oid = con.conrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relname = $2
            ORDER BY con.contype, con.conname
            "#,
        )
        .bind(&self.schema)
        .bind(table)
        .fetch_all(self.pool()?)
        .await
        .map_err(EngineError::from_query)?;

        Ok(rows
            .into_iter()
            .map(|(name, contype, definition, columns)| TableConstraint {
                name,
                kind: match contype.as_str() {
                    "p" => ConstraintKind::PrimaryKey,
                    "f" => ConstraintKind::ForeignKey,
                    "u" => ConstraintKind::Unique,
                    "c" => ConstraintKind::Check,
                    _ => ConstraintKind::Other,
                },
                columns,
                definition: Some(definition),
            })
            .collect())
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(table))
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl BackendHandler for PostgresHandler {
    fn kind(&self) -> EngineKind {
        EngineKind::Postgres
    }

    async fn open(&mut self) -> EngineResult<()> {
        if self.pool.is_some() {
            return Ok(());
        }

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(self.options.clone())
            .await
            .map_err(EngineError::from_connect)?;

        debug!("Opened PostgreSQL connection");
        self.pool = Some(pool);
        Ok(())
    }

    async fn list_tables(&mut self) -> EngineResult<Vec<TableInfo>> {
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT c.relname::text, obj_description(c.oid, 'pg_class')
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relkind IN ('r', 'p')
            ORDER BY c.relname
            "#,
        )
        .bind(&self.schema)
        .fetch_all(self.pool()?)
        .await
        .map_err(EngineError::from_query)?;

        Ok(rows
            .into_iter()
            .map(|(name, description)| TableInfo { name, description })
            .collect())
    }

    async fn get_schema(&mut self, table: &str) -> EngineResult<TableSchema> {
        let columns = self.table_columns(table).await?;
        let primary_key = self.primary_key(table).await?;
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

        let pg_rows: Vec<PgRow> = sqlx::query(sql)
            .fetch_all(self.pool()?)
            .await
            .map_err(EngineError::from_query)?;

        let execution_time_ms = elapsed_ms(start);
        let columns = pg_rows.first().map(Self::get_column_info).unwrap_or_default();
        let rows = pg_rows.iter().map(Self::convert_row).collect();

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
        let columns: Vec<(String, String, bool, Option<String>)> = sqlx::query_as(
            r#"
            SELECT
                a.attname::text,
                format_type(a.atttypid, a.atttypmod),
                a.attnotnull,
                pg_get_expr(d.adbin, d.adrelid)
            FROM pg_attribute a
            JOIN pg_class c ON c.oid = a.attrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
            WHERE n.nspname = $1 AND c.relname = $2 AND a.attnum > 0 AND NOT a.attisdropped
            ORDER BY a.attnum
            "#,
        )
        .bind(&self.schema)
        .bind(table)
        .fetch_all(self.pool()?)
        .await
        .map_err(EngineError::from_query)?;

        if columns.is_empty() {
            return Err(table_not_found(table));
        }

        let mut lines: Vec<String> = columns
            .into_iter()
            .map(|(name, data_type, not_null, default)| {
                let mut line = format!("    {} {}", quote_ident(&name), data_type);
                if let Some(default) = default {
                    line.push_str(&format!(" DEFAULT {default}"));
                }
                if not_null {
                    line.push_str(" NOT NULL");
                }
                line
            })
            .collect();

        let constraints = self.constraints(table).await?;
        lines.extend(constraints.iter().filter_map(|c| {
            c.definition
                .as_ref()
                .map(|def| format!("    CONSTRAINT {} {}", quote_ident(&c.name), def))
        }));

        let mut ddl = format!(
            "CREATE TABLE {} (\n{}\n);",
            self.qualified(table),
            lines.join(",\n")
        );

        let constraint_names: Vec<&str> = constraints.iter().map(|c| c.name.as_str()).collect();
        for index in self.indexes(table).await? {
            if constraint_names.contains(&index.name.as_str()) {
                continue;
            }
            if let Some(definition) = index.definition {
                ddl.push('\n');
                ddl.push_str(&definition);
                ddl.push(';');
            }
        }
        Ok(ddl)
    }

    async fn table_indexes(&mut self, table: &str) -> EngineResult<Vec<TableIndex>> {
        self.table_columns(table).await?;
        self.indexes(table).await
    }

    async fn table_stats(&mut self, table: &str) -> EngineResult<TableStats> {
        let columns = self.table_columns(table).await?;
        let index_count = self.indexes(table).await?.len();

        let row: (
            Option<i64>,
            Option<i64>,
            i64,
            i64,
            Option<i64>,
            Option<i64>,
            Option<String>,
            Option<String>,
        ) = sqlx::query_as(
            r#"
            SELECT
                s.n_live_tup,
                s.n_dead_tup,
                pg_total_relation_size(c.oid),
                pg_relation_size(c.oid),
                s.seq_scan,
                s.idx_scan,
                GREATEST(s.last_vacuum, s.last_autovacuum)::text,
                GREATEST(s.last_analyze, s.last_autoanalyze)::text
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            LEFT JOIN pg_stat_user_tables s ON s.relid = c.oid
            WHERE n.nspname = $1 AND c.relname = $2
            "#,
        )
        .bind(&self.schema)
        .bind(table)
        .fetch_one(self.pool()?)
        .await
        .map_err(EngineError::from_query)?;

        let (live, dead, total_size, table_size, seq_scan, idx_scan, last_vacuum, last_analyze) =
            row;

        let mut stats = TableStats {
            table: table.to_string(),
            row_count: live.map(|n| n.max(0) as u64),
            column_count: columns.len(),
            index_count,
            size_bytes: Some(total_size.max(0) as u64),
            ..Default::default()
        };
        stats.extra.insert("table_size_bytes".into(), table_size.to_string());
        if let Some(dead) = dead {
            stats.extra.insert("dead_tuples".into(), dead.to_string());
        }
        if let Some(seq_scan) = seq_scan {
            stats.extra.insert("sequential_scans".into(), seq_scan.to_string());
        }
        if let Some(idx_scan) = idx_scan {
            stats.extra.insert("index_scans".into(), idx_scan.to_string());
        }
        if let Some(at) = last_vacuum {
            stats.extra.insert("last_vacuum".into(), at);
        }
        if let Some(at) = last_analyze {
            stats.extra.insert("last_analyze".into(), at);
        }
        Ok(stats)
    }

    async fn table_constraints(&mut self, table: &str) -> EngineResult<Vec<TableConstraint>> {
        self.table_columns(table).await?;
        self.constraints(table).await
    }

    async fn explain(&mut self, sql: &str) -> EngineResult<String> {
        require_explainable(sql)?;
        let rows: Vec<(String,)> = sqlx::query_as(&format!("EXPLAIN {sql}"))
            .fetch_all(self.pool()?)
            .await
            .map_err(EngineError::from_query)?;
        Ok(rows
            .into_iter()
            .map(|(line,)| line)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn cleanup(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            debug!("Closed PostgreSQL connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::Sensitive;

    #[test]
    fn test_defaults_to_public_schema() {
        let handler = PostgresHandler::new(&ServerParams {
            host: Some("db.internal".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(handler.schema, "public");
        assert_eq!(handler.qualified("users"), "\"public\".\"users\"");
        assert!(handler.pool().is_err());
    }

    #[test]
    fn test_invalid_url_is_connection_error() {
        let err = PostgresHandler::new(&ServerParams {
            url: Some(Sensitive::new("not a url".to_string())),
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, EngineError::ConnectionFailed { .. }));
    }

    #[test]
    fn test_rejects_foreign_profile() {
        let profile = ConnectionProfile::new(
            "x",
            EngineParams::Mysql(ServerParams::default()),
        );
        assert!(PostgresHandler::boxed(&profile).is_err());
    }
}
