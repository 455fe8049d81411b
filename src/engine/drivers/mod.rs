// SPDX-License-Identifier: Apache-2.0

// Backend handlers, one per engine, all on sqlx pools

pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use mysql::MysqlHandler;
pub use postgres::PostgresHandler;
pub use sqlite::SqliteHandler;

use std::time::Instant;

use crate::engine::error::{EngineError, EngineResult};
use crate::interceptor::{is_single_statement, statement_kind, StatementKind, MULTIPLE_STATEMENTS};

/// Fails when the input batches more than one statement. sqlx runs every
/// statement of an unprepared query, so classification alone is not enough.
pub(crate) fn require_single_statement(sql: &str) -> EngineResult<()> {
    if is_single_statement(sql) {
        Ok(())
    } else {
        Err(EngineError::validation(MULTIPLE_STATEMENTS))
    }
}

/// Fails unless the statement classifies as SELECT.
pub(crate) fn require_read(sql: &str) -> EngineResult<()> {
    require_single_statement(sql)?;
    match statement_kind(sql) {
        StatementKind::Select => Ok(()),
        other => Err(EngineError::validation(format!(
            "Only SELECT statements can be executed as reads, got {other}"
        ))),
    }
}

/// Fails unless the statement classifies as INSERT, UPDATE or DELETE.
pub(crate) fn require_write(sql: &str) -> EngineResult<StatementKind> {
    require_single_statement(sql)?;
    let kind = statement_kind(sql);
    if kind.is_write() {
        Ok(kind)
    } else {
        Err(EngineError::validation(format!(
            "Only INSERT, UPDATE and DELETE statements can be executed as writes, got {kind}"
        )))
    }
}

/// Plans are only produced for SELECT, INSERT, UPDATE and DELETE. Any
/// other leading keyword could turn the EXPLAIN prefix into an executing
/// form such as PostgreSQL's `EXPLAIN ANALYZE`.
pub(crate) fn require_explainable(sql: &str) -> EngineResult<StatementKind> {
    require_single_statement(sql)?;
    let kind = statement_kind(sql);
    if kind == StatementKind::Select || kind.is_write() {
        Ok(kind)
    } else {
        Err(EngineError::validation(format!(
            "Only SELECT, INSERT, UPDATE and DELETE statements can be explained, got {kind}"
        )))
    }
}

pub(crate) fn table_not_found(table: &str) -> EngineError {
    EngineError::execution_error(format!("Table '{table}' not found"))
}

pub(crate) fn not_open() -> EngineError {
    EngineError::connection_failed("Connection is not open")
}

pub(crate) fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_micros() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_guards() {
        assert!(require_read("  select * from t").is_ok());
        assert!(require_read("DELETE FROM t").is_err());
        assert_eq!(require_write("update t set a = 1").unwrap(), StatementKind::Update);
        let err = require_write("DROP TABLE t").unwrap_err();
        assert!(matches!(err, EngineError::ValidationError { .. }));
        assert!(err.to_string().contains("DROP"));
    }

    #[test]
    fn test_batched_input_is_rejected_by_every_guard() {
        let batch = "SELECT 1; DELETE FROM customers";
        for err in [
            require_read(batch).unwrap_err(),
            require_write("INSERT INTO orders VALUES (1); DELETE FROM customers").unwrap_err(),
            require_explainable(batch).unwrap_err(),
        ] {
            assert!(matches!(err, EngineError::ValidationError { .. }));
            assert!(err.to_string().contains(MULTIPLE_STATEMENTS));
        }
        assert!(require_read("SELECT 1;").is_ok());
    }

    #[test]
    fn test_explain_guard() {
        assert_eq!(require_explainable("select * from t").unwrap(), StatementKind::Select);
        assert_eq!(require_explainable("DELETE FROM t").unwrap(), StatementKind::Delete);
        assert!(require_explainable("ANALYZE DELETE FROM t").is_err());
        assert!(require_explainable("(ANALYZE) DELETE FROM t").is_err());
        assert!(require_explainable("").is_err());
    }
}
