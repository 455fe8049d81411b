//! BackendHandler trait definition
//!
//! This is the capability contract every engine adapter implements. A
//! handler instance is created per tool invocation, used by exactly one
//! caller, and released with `cleanup()` when the invocation ends.

use async_trait::async_trait;

use crate::engine::error::EngineResult;
use crate::engine::types::{
    EngineKind, QueryResult, TableConstraint, TableIndex, TableInfo, TableSchema, TableStats,
    WriteOutcome,
};

/// Core trait that all engine adapters must implement
#[async_trait]
pub trait BackendHandler: Send {
    /// Engine this handler talks to
    fn kind(&self) -> EngineKind;

    /// Opens the underlying connection, or reuses it if already open
    async fn open(&mut self) -> EngineResult<()>;

    /// Lists user tables with their optional comment
    async fn list_tables(&mut self) -> EngineResult<Vec<TableInfo>>;

    /// Structured columns, keys and indexes of one table
    async fn get_schema(&mut self, table: &str) -> EngineResult<TableSchema>;

    /// Runs a SELECT. Must fail for any other statement kind.
    async fn execute_read(&mut self, sql: &str) -> EngineResult<QueryResult>;

    /// Runs an INSERT, UPDATE or DELETE. Must fail for any other statement kind.
    async fn execute_write(&mut self, sql: &str) -> EngineResult<WriteOutcome>;

    /// CREATE statement for the table
    async fn table_ddl(&mut self, table: &str) -> EngineResult<String>;

    async fn table_indexes(&mut self, table: &str) -> EngineResult<Vec<TableIndex>>;

    async fn table_stats(&mut self, table: &str) -> EngineResult<TableStats>;

    async fn table_constraints(&mut self, table: &str) -> EngineResult<Vec<TableConstraint>>;

    /// Execution plan as display text
    async fn explain(&mut self, sql: &str) -> EngineResult<String>;

    /// Releases every resource held by the handler. Must be idempotent.
    async fn cleanup(&mut self);
}
