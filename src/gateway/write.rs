//! Write path
//!
//! resolve → writable check → confirmation → single statement → classify →
//! authorize → dispatch → audit. Everything up to authorization runs without a backend;
//! a rejected write is neither executed nor audited. Once authorized, the
//! dispatch runs in its own task, so the outcome is audited even if the
//! caller stops waiting.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{Gateway, GatewayError, GatewayResult};
use crate::config::ConnectionProfile;
use crate::engine::{EngineError, EngineKind, WriteOutcome};
use crate::interceptor::{
    authorize, classify, is_single_statement, AuditEntry, AuditStatus, Classification,
    PermissionDecision, StatementKind, WriteAttempt, MULTIPLE_STATEMENTS, UNKNOWN_TABLE,
};

/// Token the caller must pass to run a write
pub const CONFIRM_WRITE: &str = "CONFIRM_WRITE";

pub const NOT_WRITABLE: &str = "This connection is not configured for write operations. \
Add 'writable: true' to the connection configuration.";

/// Arguments of the execute-write tool
#[derive(Debug, Clone, Deserialize)]
pub struct WriteRequest {
    pub connection: String,
    pub sql: String,
    #[serde(default)]
    pub confirmation: Option<String>,
    /// Free-form caller identity stored with the audit entry
    #[serde(default)]
    pub user_context: Option<String>,
}

impl WriteRequest {
    pub fn confirmed(connection: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            sql: sql.into(),
            confirmation: Some(CONFIRM_WRITE.to_string()),
            user_context: None,
        }
    }
}

/// Result of an executed write
#[derive(Debug, Clone, Serialize)]
pub struct WriteReport {
    pub engine: EngineKind,
    pub operation: StatementKind,
    pub table: String,
    pub affected_rows: u64,
    pub execution_time_ms: f64,
    /// Stored audit entry; `None` when auditing is disabled
    pub audit: Option<AuditEntry>,
}

impl Gateway {
    #[instrument(
        skip(self, request),
        fields(connection = %request.connection, sql_len = request.sql.len())
    )]
    pub async fn execute_write(&self, request: WriteRequest) -> GatewayResult<WriteReport> {
        let profile = self.profile(&request.connection)?;
        if !profile.writable {
            return Err(GatewayError::configuration(NOT_WRITABLE));
        }

        if request.confirmation.as_deref() != Some(CONFIRM_WRITE) {
            return Err(GatewayError::validation(format!(
                "Write operations require explicit confirmation. \
                 Pass confirmation '{CONFIRM_WRITE}' to proceed."
            )));
        }

        // Only the first statement is classified and authorized.
        if !is_single_statement(&request.sql) {
            return Err(GatewayError::validation(MULTIPLE_STATEMENTS));
        }

        let Classification { kind, target_table } = classify(&request.sql);
        if !kind.is_write() {
            return Err(GatewayError::validation(format!(
                "Unsupported statement type {kind}. \
                 Only INSERT, UPDATE and DELETE can be executed as writes."
            )));
        }
        if target_table == UNKNOWN_TABLE {
            debug!("Target table could not be determined");
        }

        if let PermissionDecision::Deny { reason } = authorize(&profile, &target_table, kind) {
            warn!(table = %target_table, operation = %kind, "Write denied: {}", reason);
            return Err(GatewayError::permission(reason));
        }

        let task = tokio::spawn(dispatch(self.clone(), profile, request, kind, target_table));
        task.await
            .map_err(|e| EngineError::internal(format!("Write task failed: {e}")))?
    }
}

async fn dispatch(
    gateway: Gateway,
    profile: ConnectionProfile,
    request: WriteRequest,
    operation: StatementKind,
    table: String,
) -> GatewayResult<WriteReport> {
    let mut execution_time_ms = 0.0;
    let outcome: GatewayResult<WriteOutcome> = match gateway.acquire(&profile).await {
        Ok(mut scoped) => {
            let started = Instant::now();
            let result = scoped.execute_write(&request.sql).await;
            execution_time_ms = started.elapsed().as_micros() as f64 / 1000.0;
            scoped.release().await;
            result
        }
        Err(e) => Err(e),
    };

    let (status, affected_rows, error_message) = match &outcome {
        Ok(done) => (AuditStatus::Success, done.affected_rows, None),
        Err(e) => (AuditStatus::Failed, 0, Some(e.to_string())),
    };
    let audit = gateway.audit().record(WriteAttempt {
        connection_name: profile.name.clone(),
        table_name: table.clone(),
        operation,
        sql: request.sql,
        affected_rows,
        status,
        execution_time_ms,
        error_message,
        user_context: request.user_context,
    });

    let done = outcome?;
    info!(
        table = %table,
        operation = %operation,
        affected_rows = done.affected_rows,
        "Write executed"
    );

    Ok(WriteReport {
        engine: profile.kind(),
        operation,
        table,
        affected_rows: done.affected_rows,
        execution_time_ms,
        audit,
    })
}
