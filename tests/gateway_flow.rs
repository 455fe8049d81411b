//! Gateway flows against a mock backend handler.
//!
//! The mock records every call under its connection name so each test can
//! use its own connections and still run in parallel with the others.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlgate::config::{load_config_from_str, ConnectionProfile, StaticSource};
use sqlgate::engine::{
    BackendHandler, ColumnInfo, EngineError, EngineKind, EngineResult, HandlerRegistry,
    QueryResult, Row, TableConstraint, TableIndex, TableInfo, TableSchema, TableStats, Value,
    WriteOutcome,
};
use sqlgate::interceptor::{AuditFilter, AuditStatus, StatementKind};
use sqlgate::{commands, Gateway, WriteRequest};

static CALLS: Mutex<Vec<(String, &'static str)>> = Mutex::new(Vec::new());

fn record(connection: &str, op: &'static str) {
    CALLS.lock().unwrap().push((connection.to_string(), op));
}

fn calls(connection: &str) -> Vec<&'static str> {
    CALLS
        .lock()
        .unwrap()
        .iter()
        .filter(|(c, _)| c == connection)
        .map(|(_, op)| *op)
        .collect()
}

struct MockHandler {
    connection: String,
}

impl MockHandler {
    fn boxed(profile: &ConnectionProfile) -> EngineResult<Box<dyn BackendHandler>> {
        Ok(Box::new(Self {
            connection: profile.name.clone(),
        }))
    }
}

#[async_trait]
impl BackendHandler for MockHandler {
    fn kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    async fn open(&mut self) -> EngineResult<()> {
        record(&self.connection, "open");
        if self.connection == "slow_open_db" {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Ok(())
    }

    async fn list_tables(&mut self) -> EngineResult<Vec<TableInfo>> {
        record(&self.connection, "list_tables");
        Ok(vec![TableInfo {
            name: "orders".into(),
            description: Some("customer orders".into()),
        }])
    }

    async fn get_schema(&mut self, table: &str) -> EngineResult<TableSchema> {
        record(&self.connection, "get_schema");
        Err(EngineError::execution_error(format!("Table '{table}' not found")))
    }

    async fn execute_read(&mut self, sql: &str) -> EngineResult<QueryResult> {
        record(&self.connection, "execute_read");
        if sql.contains("SLOW") {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Ok(QueryResult {
            columns: vec![ColumnInfo {
                name: "n".into(),
                data_type: "INTEGER".into(),
            }],
            rows: vec![Row {
                values: vec![Value::Int(1)],
            }],
            execution_time_ms: 0.1,
        })
    }

    async fn execute_write(&mut self, sql: &str) -> EngineResult<WriteOutcome> {
        record(&self.connection, "execute_write");
        if sql.contains("SLOW") {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        if sql.contains("boom") {
            return Err(EngineError::execution_error("constraint violated"));
        }
        Ok(WriteOutcome { affected_rows: 1 })
    }

    async fn table_ddl(&mut self, _table: &str) -> EngineResult<String> {
        Ok(String::new())
    }

    async fn table_indexes(&mut self, _table: &str) -> EngineResult<Vec<TableIndex>> {
        Ok(Vec::new())
    }

    async fn table_stats(&mut self, table: &str) -> EngineResult<TableStats> {
        Ok(TableStats {
            table: table.to_string(),
            ..Default::default()
        })
    }

    async fn table_constraints(&mut self, _table: &str) -> EngineResult<Vec<TableConstraint>> {
        Ok(Vec::new())
    }

    async fn explain(&mut self, _sql: &str) -> EngineResult<String> {
        record(&self.connection, "explain");
        Ok("SCAN orders".into())
    }

    async fn cleanup(&mut self) {
        record(&self.connection, "cleanup");
    }
}

const CONFIG: &str = r#"
connections:
  readonly_db:
    type: sqlite
    path: ":memory:"
  guarded_db:
    type: sqlite
    path: ":memory:"
    writable: true
    write_permissions:
      default_policy: read_only
      tables:
        orders:
          operations: [INSERT]
        ledger:
          operations: []
  denied_db:
    type: sqlite
    path: ":memory:"
    writable: true
    write_permissions:
      default_policy: read_only
      tables:
        orders:
          operations: [INSERT]
        ledger:
          operations: []
  open_db:
    type: sqlite
    path: ":memory:"
    writable: true
    write_permissions:
      default_policy: allow_all
  ring_db:
    type: sqlite
    path: ":memory:"
    writable: true
  failing_db:
    type: sqlite
    path: ":memory:"
    writable: true
  slow_db:
    type: sqlite
    path: ":memory:"
    writable: true
  reads_db:
    type: sqlite
    path: ":memory:"
  perf_db:
    type: sqlite
    path: ":memory:"
  schema_db:
    type: sqlite
    path: ":memory:"
  json_db:
    type: sqlite
    path: ":memory:"
    writable: true
    write_permissions:
      default_policy: allow_all
  batch_db:
    type: sqlite
    path: ":memory:"
    writable: true
    write_permissions:
      default_policy: read_only
      tables:
        orders:
          operations: [INSERT]
  batch_read_db:
    type: sqlite
    path: ":memory:"
  cancel_read_db:
    type: sqlite
    path: ":memory:"
  slow_open_db:
    type: sqlite
    path: ":memory:"
  legacy:
    type: oracle
    host: ora.internal
    service_name: ORCL
    writable: true
audit:
  memory_buffer:
    size: 10
"#;

fn gateway() -> Gateway {
    let config = load_config_from_str(CONFIG).unwrap();
    let mut registry = HandlerRegistry::new();
    registry.register(EngineKind::Sqlite, MockHandler::boxed);
    Gateway::new(Arc::new(StaticSource::new(config)), registry).unwrap()
}

#[tokio::test]
async fn test_non_writable_connection_never_reaches_backend() {
    let gateway = gateway();
    let err = gateway
        .execute_write(WriteRequest::confirmed("readonly_db", "DELETE FROM orders"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "ConfigurationError");
    assert!(err.to_string().contains("not configured for write operations"));
    assert!(gateway.audit().is_empty());
    assert!(calls("readonly_db").is_empty());
}

#[tokio::test]
async fn test_policy_denial_names_table_and_operation() {
    let gateway = gateway();
    let err = gateway
        .execute_write(WriteRequest::confirmed("denied_db", "UPDATE orders SET x=1"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "PermissionError");
    let message = err.to_string().to_lowercase();
    assert!(message.contains("orders"));
    assert!(message.contains("update"));
    assert!(gateway.audit().is_empty());

    let err = gateway
        .execute_write(WriteRequest::confirmed("denied_db", "INSERT INTO ledger (a) VALUES (1)"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "PermissionError");
    assert!(calls("denied_db").is_empty());
}

#[tokio::test]
async fn test_allowed_write_is_executed_and_audited() {
    let gateway = gateway();
    let output = commands::execute_write(
        &gateway,
        WriteRequest::confirmed("guarded_db", "insert into Orders (id, total) values (1, 99.5)"),
    )
    .await
    .unwrap();

    assert!(output.text.starts_with("[sqlite] Write executed successfully. Affected rows: 1"));
    let entries = gateway.audit().query(&AuditFilter::default());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, AuditStatus::Success);
    assert_eq!(entries[0].operation, StatementKind::Insert);
    assert_eq!(entries[0].table_name, "ORDERS");
    assert!(!entries[0].sql.contains("99.5"));
}

#[tokio::test]
async fn test_allow_all_permits_unlisted_tables() {
    let gateway = gateway();
    let report = gateway
        .execute_write(WriteRequest::confirmed("open_db", "DELETE FROM sessions WHERE id = 4"))
        .await
        .unwrap();

    assert_eq!(report.affected_rows, 1);
    assert_eq!(report.table, "SESSIONS");
    assert_eq!(calls("open_db"), vec!["open", "execute_write", "cleanup"]);
    let audit = report.audit.unwrap();
    assert_eq!(audit.sql, "DELETE FROM sessions WHERE id = ?");
}

#[tokio::test]
async fn test_ring_buffer_keeps_ten_most_recent_writes() {
    let gateway = gateway();
    for i in 0..12 {
        gateway
            .execute_write(WriteRequest::confirmed(
                "ring_db",
                format!("INSERT INTO t{i} (v) VALUES ({i})"),
            ))
            .await
            .unwrap();
    }

    let entries = gateway.audit().query(&AuditFilter::default());
    assert_eq!(entries.len(), 10);
    let tables: Vec<&str> = entries.iter().map(|e| e.table_name.as_str()).collect();
    assert_eq!(tables.first(), Some(&"T2"));
    assert_eq!(tables.last(), Some(&"T11"));
    assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test]
async fn test_failed_execution_is_audited_once() {
    let gateway = gateway();
    let err = gateway
        .execute_write(WriteRequest::confirmed("failing_db", "UPDATE boom SET a = 1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ExecutionError");

    let filter = AuditFilter {
        connection_name: Some("failing_db".into()),
        ..Default::default()
    };
    let entries = gateway.audit().query(&filter);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, AuditStatus::Failed);
    assert!(entries[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("constraint violated"));
    assert_eq!(calls("failing_db"), vec!["open", "execute_write", "cleanup"]);
}

#[tokio::test]
async fn test_cancelled_caller_does_not_suppress_audit() {
    let gateway = gateway();
    let request = WriteRequest::confirmed("slow_db", "UPDATE SLOW SET a = 1");

    let waited =
        tokio::time::timeout(Duration::from_millis(20), gateway.execute_write(request)).await;
    assert!(waited.is_err());

    tokio::time::sleep(Duration::from_millis(600)).await;
    let entries = gateway.audit().query(&AuditFilter {
        connection_name: Some("slow_db".into()),
        ..Default::default()
    });
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, AuditStatus::Success);
    assert_eq!(calls("slow_db").last(), Some(&"cleanup"));
}

#[tokio::test]
async fn test_read_path_rejects_writes_before_backend() {
    let gateway = gateway();
    let err = commands::run_query(&gateway, "reads_db", "DELETE FROM orders")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ValidationError");
    assert!(calls("reads_db").is_empty());

    let output = commands::run_query(&gateway, "reads_db", "SELECT 1 AS n")
        .await
        .unwrap();
    assert!(output.text.starts_with("[sqlite] n\n"));
    assert_eq!(output.engine, Some(EngineKind::Sqlite));
    assert_eq!(calls("reads_db"), vec!["open", "execute_read", "cleanup"]);
}

#[tokio::test]
async fn test_batched_write_is_rejected_without_backend_or_audit() {
    let gateway = gateway();
    let err = gateway
        .execute_write(WriteRequest::confirmed(
            "batch_db",
            "INSERT INTO orders VALUES (1, 1.0); DELETE FROM customers",
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ValidationError");
    assert!(err.to_string().contains("Multiple statements"));
    assert!(calls("batch_db").is_empty());
    assert!(gateway
        .audit()
        .query(&AuditFilter {
            connection_name: Some("batch_db".into()),
            ..Default::default()
        })
        .is_empty());
}

#[tokio::test]
async fn test_batched_reads_and_plans_are_rejected_before_backend() {
    let gateway = gateway();
    let batch = "SELECT 1; DELETE FROM customers";
    for err in [
        commands::run_query(&gateway, "batch_read_db", batch).await.unwrap_err(),
        commands::explain_query(&gateway, "batch_read_db", batch).await.unwrap_err(),
        commands::analyze_query(&gateway, "batch_read_db", batch).await.unwrap_err(),
        commands::explain_query(&gateway, "batch_read_db", "ANALYZE DELETE FROM t")
            .await
            .unwrap_err(),
    ] {
        assert_eq!(err.kind(), "ValidationError");
    }
    assert!(calls("batch_read_db").is_empty());
}

#[tokio::test]
async fn test_cancelled_read_still_releases_handler() {
    let gateway = gateway();
    let waited = tokio::time::timeout(
        Duration::from_millis(20),
        commands::run_query(&gateway, "cancel_read_db", "SELECT SLOW FROM orders"),
    )
    .await;
    assert!(waited.is_err());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        calls("cancel_read_db"),
        vec!["open", "execute_read", "cleanup"]
    );
}

#[tokio::test]
async fn test_cancelled_open_still_releases_handler() {
    let gateway = gateway();
    let waited = tokio::time::timeout(
        Duration::from_millis(20),
        commands::list_tables(&gateway, "slow_open_db"),
    )
    .await;
    assert!(waited.is_err());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls("slow_open_db"), vec!["open", "cleanup"]);
}

#[tokio::test]
async fn test_introspection_error_still_releases_handler() {
    let gateway = gateway();
    let err = commands::describe_table(&gateway, "schema_db", "missing")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ExecutionError");
    assert!(calls("schema_db").ends_with(&["get_schema", "cleanup"]));
}

#[tokio::test]
async fn test_performance_reports_probe_query() {
    let gateway = gateway();
    let output = commands::get_performance(&gateway, "perf_db").await.unwrap();
    assert_eq!(output.data["query_count"], 1);
    assert_eq!(output.data["active_connections"], 1);
    assert!(output.text.contains("SELECT: 1"));
}

#[tokio::test]
async fn test_unsupported_engine_fails_closed() {
    let gateway = gateway();
    let err = commands::list_tables(&gateway, "legacy").await.unwrap_err();
    assert_eq!(err.kind(), "ConfigurationError");
    assert!(err.to_string().contains("oracle"));

    let err = commands::list_tables(&gateway, "nope").await.unwrap_err();
    assert!(err.to_string().contains("Connection not found: nope"));
}

#[tokio::test]
async fn test_json_tool_calls() {
    let gateway = gateway();
    let response = sqlgate::invoke_json(
        &gateway,
        serde_json::json!({
            "tool": "execute_write",
            "arguments": {
                "connection": "json_db",
                "sql": "UPDATE Accounts SET balance = 0 WHERE owner = 'mallory'",
                "confirmation": "CONFIRM_WRITE",
                "user_context": "nightly-job"
            }
        }),
    )
    .await;
    assert!(response.success, "{:?}", response.error);

    let response = sqlgate::invoke_json(
        &gateway,
        serde_json::json!({
            "tool": "get_audit_logs",
            "arguments": { "table_name": "accounts", "operation": "UPDATE" }
        }),
    )
    .await;
    assert!(response.success);
    assert!(response.text.contains("UPDATE on ACCOUNTS"));
    assert!(!response.text.contains("mallory"));
    assert!(response.text.contains("User context: nightly-job"));

    let response = sqlgate::invoke_json(&gateway, serde_json::json!({ "tool": "drop_everything" })).await;
    assert!(!response.success);
    assert_eq!(response.error_kind.as_deref(), Some("ValidationError"));
    assert!(response.engine.is_none());

    let response = sqlgate::invoke_json(
        &gateway,
        serde_json::json!({
            "tool": "run_query",
            "arguments": { "connection": "json_db", "sql": "DELETE FROM accounts" }
        }),
    )
    .await;
    assert!(!response.success);
    assert_eq!(response.engine, Some(EngineKind::Sqlite));
    assert!(response.text.starts_with("[sqlite] Error: "));
}
