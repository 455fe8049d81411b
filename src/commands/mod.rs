// Tool Commands Module
//
// One async function per tool. Each takes the gateway plus typed arguments
// and returns a ToolOutput tagged with the engine it ran against.

pub mod connection;
pub mod interceptor;
pub mod mutation;
pub mod query;
pub mod schema;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::EngineError;
use crate::gateway::{Gateway, GatewayResult, ToolResponse, WriteRequest};
use crate::interceptor::AuditFilter;

pub use connection::list_connections;
pub use interceptor::{get_audit_logs, get_performance};
pub use mutation::execute_write;
pub use query::{analyze_query, explain_query, run_query};
pub use schema::{describe_table, get_ddl, get_table_stats, list_constraints, list_indexes, list_tables};

/// A tool invocation as sent by the caller:
/// `{ "tool": "run_query", "arguments": { "connection": "...", "sql": "..." } }`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "tool", content = "arguments", rename_all = "snake_case")]
pub enum ToolCall {
    ListConnections {
        #[serde(default)]
        check_liveness: bool,
    },
    ListTables {
        connection: String,
    },
    RunQuery {
        connection: String,
        sql: String,
    },
    DescribeTable {
        connection: String,
        table: String,
    },
    GetDdl {
        connection: String,
        table: String,
    },
    ListIndexes {
        connection: String,
        table: String,
    },
    GetTableStats {
        connection: String,
        table: String,
    },
    ListConstraints {
        connection: String,
        table: String,
    },
    ExplainQuery {
        connection: String,
        sql: String,
    },
    AnalyzeQuery {
        connection: String,
        sql: String,
    },
    GetPerformance {
        connection: String,
    },
    ExecuteWrite(WriteRequest),
    GetAuditLogs(AuditFilter),
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ListConnections { .. } => "list_connections",
            Self::ListTables { .. } => "list_tables",
            Self::RunQuery { .. } => "run_query",
            Self::DescribeTable { .. } => "describe_table",
            Self::GetDdl { .. } => "get_ddl",
            Self::ListIndexes { .. } => "list_indexes",
            Self::GetTableStats { .. } => "get_table_stats",
            Self::ListConstraints { .. } => "list_constraints",
            Self::ExplainQuery { .. } => "explain_query",
            Self::AnalyzeQuery { .. } => "analyze_query",
            Self::GetPerformance { .. } => "get_performance",
            Self::ExecuteWrite(_) => "execute_write",
            Self::GetAuditLogs(_) => "get_audit_logs",
        }
    }

    /// Connection the call targets, if any
    pub fn connection(&self) -> Option<&str> {
        match self {
            Self::ListConnections { .. } => None,
            Self::ListTables { connection }
            | Self::RunQuery { connection, .. }
            | Self::DescribeTable { connection, .. }
            | Self::GetDdl { connection, .. }
            | Self::ListIndexes { connection, .. }
            | Self::GetTableStats { connection, .. }
            | Self::ListConstraints { connection, .. }
            | Self::ExplainQuery { connection, .. }
            | Self::AnalyzeQuery { connection, .. }
            | Self::GetPerformance { connection } => Some(connection),
            Self::ExecuteWrite(request) => Some(&request.connection),
            Self::GetAuditLogs(filter) => filter.connection_name.as_deref(),
        }
    }
}

/// Runs one tool call and wraps the outcome in the caller-facing envelope.
/// Failures on a resolvable connection are tagged with its engine.
pub async fn invoke(gateway: &Gateway, call: ToolCall) -> ToolResponse {
    let tool = call.name();
    let connection = call.connection().map(str::to_owned);
    let result = match call {
        ToolCall::ListConnections { check_liveness } => list_connections(gateway, check_liveness).await,
        ToolCall::ListTables { connection } => list_tables(gateway, &connection).await,
        ToolCall::RunQuery { connection, sql } => run_query(gateway, &connection, &sql).await,
        ToolCall::DescribeTable { connection, table } => describe_table(gateway, &connection, &table).await,
        ToolCall::GetDdl { connection, table } => get_ddl(gateway, &connection, &table).await,
        ToolCall::ListIndexes { connection, table } => list_indexes(gateway, &connection, &table).await,
        ToolCall::GetTableStats { connection, table } => get_table_stats(gateway, &connection, &table).await,
        ToolCall::ListConstraints { connection, table } => {
            list_constraints(gateway, &connection, &table).await
        }
        ToolCall::ExplainQuery { connection, sql } => explain_query(gateway, &connection, &sql).await,
        ToolCall::AnalyzeQuery { connection, sql } => analyze_query(gateway, &connection, &sql).await,
        ToolCall::GetPerformance { connection } => get_performance(gateway, &connection).await,
        ToolCall::ExecuteWrite(request) => execute_write(gateway, request).await,
        ToolCall::GetAuditLogs(filter) => get_audit_logs(gateway, filter).await,
    };
    let failed = result.as_ref().err().map(|e| e.kind());
    let response = ToolResponse::from(result);
    let Some(error_kind) = failed else {
        return response;
    };
    debug!(tool, error_kind, "Tool call failed");

    let engine = connection
        .and_then(|name| gateway.profile(&name).ok())
        .map(|profile| profile.kind());
    match engine {
        Some(kind) => response.tagged(kind),
        None => response,
    }
}

/// Decodes a JSON tool call and runs it. Malformed calls become a
/// validation error response.
pub async fn invoke_json(gateway: &Gateway, call: serde_json::Value) -> ToolResponse {
    match serde_json::from_value::<ToolCall>(call) {
        Ok(call) => invoke(gateway, call).await,
        Err(e) => ToolResponse::from(Err(crate::gateway::GatewayError::validation(format!(
            "Invalid tool call: {e}"
        )))),
    }
}

pub(crate) fn to_data<T: Serialize>(value: &T) -> GatewayResult<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| EngineError::internal(format!("Failed to serialize result: {e}")).into())
}
