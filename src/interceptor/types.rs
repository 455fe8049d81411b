//! Interceptor Types
//!
//! Type definitions shared by the classifier, permission engine, audit
//! trail and statistics tracker.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel used when the target table of a write cannot be determined
pub const UNKNOWN_TABLE: &str = "unknown_table";

/// Statement kind derived from the leading keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Alter,
    Drop,
    Truncate,
    TransactionStart,
    TransactionCommit,
    TransactionRollback,
    Unknown,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Create => "CREATE",
            Self::Alter => "ALTER",
            Self::Drop => "DROP",
            Self::Truncate => "TRUNCATE",
            Self::TransactionStart => "TRANSACTION_START",
            Self::TransactionCommit => "TRANSACTION_COMMIT",
            Self::TransactionRollback => "TRANSACTION_ROLLBACK",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// INSERT, UPDATE and DELETE are the only write kinds the gateway executes
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }

    /// Parses a write operation name as it appears in policies and filters.
    pub fn parse_write(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind plus best-effort target table of a statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub kind: StatementKind,
    /// Upper-cased table name, or [`UNKNOWN_TABLE`]
    pub target_table: String,
}

/// Outcome of a permission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny { reason: String },
}

impl PermissionDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Success,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A write attempt handed to the audit trail
#[derive(Debug, Clone)]
pub struct WriteAttempt {
    pub connection_name: String,
    pub table_name: String,
    pub operation: StatementKind,
    /// Raw SQL; sanitized before it is stored
    pub sql: String,
    pub affected_rows: u64,
    pub status: AuditStatus,
    pub execution_time_ms: f64,
    pub error_message: Option<String>,
    pub user_context: Option<String>,
}

/// Immutable record of one write attempt's outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// RFC 3339 UTC timestamp, fixed width
    pub timestamp: String,
    pub connection_name: String,
    pub table_name: String,
    pub operation: StatementKind,
    pub sql: String,
    pub affected_rows: u64,
    pub status: AuditStatus,
    pub execution_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_context: Option<String>,
}

/// Filters for [`crate::interceptor::AuditTrail::query`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditFilter {
    #[serde(default)]
    pub connection_name: Option<String>,
    /// Matched case-insensitively
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub operation: Option<StatementKind>,
    #[serde(default)]
    pub status: Option<AuditStatus>,
    /// Inclusive lower bound (RFC 3339)
    #[serde(default)]
    pub start_time: Option<String>,
    /// Exclusive upper bound (RFC 3339)
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            connection_name: None,
            table_name: None,
            operation: None,
            status: None,
            start_time: None,
            end_time: None,
            limit: default_limit(),
        }
    }
}

/// Summary of the retained audit entries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub by_operation: BTreeMap<String, u64>,
    pub by_connection: BTreeMap<String, u64>,
}

/// A query that exceeded the slow threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowQuery {
    /// First 100 characters of the SQL
    pub sql: String,
    pub duration_seconds: f64,
}

/// Min/max/mean/median of recorded query durations, in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

/// Serializable view of one handler's resource statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStatsSnapshot {
    pub active_connections: u64,
    pub total_connections: u64,
    /// RFC 3339 time of the first connection start
    pub connection_start_time: Option<String>,
    pub connection_duration_seconds: f64,
    pub query_count: u64,
    pub last_query_time: Option<String>,
    pub error_count: u64,
    pub last_error_time: Option<String>,
    pub error_types: BTreeMap<String, u64>,
    pub query_types: BTreeMap<String, u64>,
    pub timing: TimingStats,
    pub slow_queries: Vec<SlowQuery>,
    pub current_memory_bytes: u64,
    pub peak_memory_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&StatementKind::TransactionStart).unwrap(),
            "\"TRANSACTION_START\""
        );
        assert_eq!(StatementKind::Delete.to_string(), "DELETE");
        assert_eq!(StatementKind::parse_write("update"), Some(StatementKind::Update));
        assert_eq!(StatementKind::parse_write("SELECT"), None);
    }

    #[test]
    fn only_dml_kinds_are_writes() {
        assert!(StatementKind::Insert.is_write());
        assert!(!StatementKind::Truncate.is_write());
        assert!(!StatementKind::Unknown.is_write());
    }

    #[test]
    fn audit_entry_omits_empty_optionals() {
        let entry = AuditEntry {
            timestamp: "2026-01-01T00:00:00.000000Z".into(),
            connection_name: "c".into(),
            table_name: "USERS".into(),
            operation: StatementKind::Insert,
            sql: "INSERT INTO users VALUES (?)".into(),
            affected_rows: 1,
            status: AuditStatus::Success,
            execution_time_ms: 1.5,
            error_message: None,
            user_context: None,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"status\":\"SUCCESS\""));
        assert!(!json.contains("error_message"));
        let back: AuditEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
