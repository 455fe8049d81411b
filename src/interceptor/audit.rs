// SPDX-License-Identifier: Apache-2.0

//! Audit Trail
//!
//! Process-wide record of write attempts. Entries live in a bounded ring
//! buffer and are optionally mirrored to a rotating JSON Lines file.
//! Appends (and the file write that goes with them) are serialized by a
//! single lock.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::OnceLock;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use regex::Regex;
use tracing::{error, info, warn};

use crate::config::AuditConfig;

use super::sink::RotatingFileSink;
use super::types::{AuditEntry, AuditFilter, AuditStats, AuditStatus, WriteAttempt};

/// Rendering of an empty result
pub const NO_AUDIT_LOGS: &str = "No audit logs found matching the criteria.";

struct AuditState {
    entries: VecDeque<AuditEntry>,
    sink: Option<RotatingFileSink>,
}

/// Audit trail service, shared by every invocation of one gateway
pub struct AuditTrail {
    enabled: bool,
    sanitize_sql: bool,
    include_user_context: bool,
    capacity: usize,
    state: Mutex<AuditState>,
}

impl AuditTrail {
    /// Builds the trail from configuration. When file storage is enabled
    /// the newest entries of the existing file are loaded into memory.
    pub fn new(config: &AuditConfig) -> Self {
        let capacity = config.memory_buffer.size.max(1);
        let mut entries = VecDeque::with_capacity(capacity.min(1024));

        let sink = if config.enabled && config.file_storage.enabled {
            match RotatingFileSink::open(&config.file_storage) {
                Ok(sink) => {
                    match sink.load_recent(capacity) {
                        Ok(recent) => entries.extend(recent),
                        Err(e) => warn!("Failed to load audit log file: {}", e),
                    }
                    Some(sink)
                }
                Err(e) => {
                    error!(
                        "Failed to open audit log directory {}: {}",
                        config.file_storage.path.display(),
                        e
                    );
                    None
                }
            }
        } else {
            None
        };

        Self {
            enabled: config.enabled,
            sanitize_sql: config.content.sanitize_sql,
            include_user_context: config.content.include_user_context,
            capacity,
            state: Mutex::new(AuditState { entries, sink }),
        }
    }

    /// In-memory trail with the given capacity and default content options
    pub fn in_memory(capacity: usize) -> Self {
        let mut config = AuditConfig::default();
        config.memory_buffer.size = capacity;
        Self::new(&config)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends an entry for a write attempt. Returns the stored entry, or
    /// `None` when auditing is disabled.
    pub fn record(&self, attempt: WriteAttempt) -> Option<AuditEntry> {
        if !self.enabled {
            return None;
        }

        let sql = if self.sanitize_sql {
            sanitize_sql(&attempt.sql)
        } else {
            attempt.sql
        };
        let user_context = attempt.user_context.filter(|_| self.include_user_context);

        let mut state = self.state.lock();
        let entry = AuditEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            connection_name: attempt.connection_name,
            table_name: attempt.table_name,
            operation: attempt.operation,
            sql,
            affected_rows: attempt.affected_rows,
            status: attempt.status,
            execution_time_ms: attempt.execution_time_ms,
            error_message: attempt.error_message,
            user_context,
        };

        while state.entries.len() >= self.capacity {
            state.entries.pop_front();
        }
        state.entries.push_back(entry.clone());

        if let Some(sink) = state.sink.as_mut() {
            if let Err(e) = sink.append(&entry) {
                error!("Failed to write audit log entry: {}", e);
            }
        }
        drop(state);

        info!(
            connection = %entry.connection_name,
            table = %entry.table_name,
            operation = %entry.operation,
            status = %entry.status,
            affected_rows = entry.affected_rows,
            "Write audited"
        );
        Some(entry)
    }

    /// Entries matching every filter, oldest first. When more than
    /// `filter.limit` match, the most recent `limit` are returned.
    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let state = self.state.lock();
        let mut matched: Vec<AuditEntry> = state
            .entries
            .iter()
            .filter(|e| matches_filter(e, filter))
            .cloned()
            .collect();
        drop(state);

        if matched.len() > filter.limit {
            matched.drain(..matched.len() - filter.limit);
        }
        matched
    }

    /// Summary of the retained entries
    pub fn stats(&self) -> AuditStats {
        let state = self.state.lock();
        let mut stats = AuditStats::default();

        for entry in state.entries.iter() {
            stats.total += 1;
            match entry.status {
                AuditStatus::Success => stats.successful += 1,
                AuditStatus::Failed => stats.failed += 1,
            }
            *stats
                .by_operation
                .entry(entry.operation.as_str().to_string())
                .or_insert(0) += 1;
            *stats
                .by_connection
                .entry(entry.connection_name.clone())
                .or_insert(0) += 1;
        }

        stats
    }
}

fn matches_filter(entry: &AuditEntry, filter: &AuditFilter) -> bool {
    if let Some(connection) = &filter.connection_name {
        if &entry.connection_name != connection {
            return false;
        }
    }
    if let Some(table) = &filter.table_name {
        if !entry.table_name.eq_ignore_ascii_case(table) {
            return false;
        }
    }
    if let Some(operation) = filter.operation {
        if entry.operation != operation {
            return false;
        }
    }
    if let Some(status) = filter.status {
        if entry.status != status {
            return false;
        }
    }
    if let Some(start) = &filter.start_time {
        if entry.timestamp.as_str() < start.as_str() {
            return false;
        }
    }
    if let Some(end) = &filter.end_time {
        if entry.timestamp.as_str() >= end.as_str() {
            return false;
        }
    }
    true
}

/// Human-readable multi-line rendering
pub fn render(entries: &[AuditEntry]) -> String {
    if entries.is_empty() {
        return NO_AUDIT_LOGS.to_string();
    }

    let mut out = format!("Audit logs ({} entries):\n", entries.len());
    for entry in entries {
        let _ = writeln!(
            out,
            "\n[{}] {} {} on {} (connection: {})",
            entry.timestamp, entry.status, entry.operation, entry.table_name, entry.connection_name
        );
        let _ = writeln!(out, "  SQL: {}", entry.sql);
        let _ = writeln!(
            out,
            "  Affected rows: {}, execution time: {:.2} ms",
            entry.affected_rows, entry.execution_time_ms
        );
        if let Some(message) = &entry.error_message {
            let _ = writeln!(out, "  Error: {}", message);
        }
        if let Some(context) = &entry.user_context {
            let _ = writeln!(out, "  User context: {}", context);
        }
    }
    out
}

fn values_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)\bVALUES\s*\(").ok())
        .as_ref()
}

fn where_literal_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r#"(?i)\b(WHERE|AND|OR)(\s+[\w."`\[\]]+\s*=\s*)('(?:[^']|'')*'|-?\d+(?:\.\d+)?\b|TRUE\b|FALSE\b|NULL\b)"#,
            )
            .ok()
        })
        .as_ref()
}

/// Redacts literal payloads: the value list of `INSERT ... VALUES (...)`
/// becomes `(?)`, and `WHERE col = <literal>` becomes `WHERE col = ?`.
/// Statement structure is left as is.
pub fn sanitize_sql(sql: &str) -> String {
    let redacted = redact_values(sql);
    match where_literal_pattern() {
        Some(re) => re.replace_all(&redacted, "$1$2?").into_owned(),
        None => redacted,
    }
}

fn redact_values(sql: &str) -> String {
    let Some(re) = values_pattern() else {
        return sql.to_string();
    };

    let mut out = String::with_capacity(sql.len());
    let mut cursor = 0;
    while let Some(m) = re.find_at(sql, cursor) {
        // `m.end()` is just past the opening parenthesis
        let Some(mut end) = closing_paren(sql, m.end()) else {
            break;
        };
        // multi-row inserts: `VALUES (..), (..)`
        loop {
            let rest = &sql[end..];
            let trimmed = rest.trim_start();
            let Some(after_comma) = trimmed.strip_prefix(',') else {
                break;
            };
            let next = after_comma.trim_start();
            if !next.starts_with('(') {
                break;
            }
            let open = sql.len() - next.len() + 1;
            match closing_paren(sql, open) {
                Some(close) => end = close,
                None => break,
            }
        }

        out.push_str(&sql[cursor..m.start()]);
        out.push_str(sql[m.start()..m.end()].trim_end_matches('('));
        out.push_str("(?)");
        cursor = end;
    }
    out.push_str(&sql[cursor..]);
    out
}

/// Byte offset just past the parenthesis closing the group opened right
/// before `start`. Quoted strings are skipped.
fn closing_paren(sql: &str, start: usize) -> Option<usize> {
    let bytes = sql.as_bytes();
    let mut depth = 1usize;
    let mut quote: Option<u8> = None;
    let mut i = start;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => {
                // doubled quote is an escaped quote
                if bytes.get(i + 1) == Some(&q) {
                    i += 1;
                } else {
                    quote = None;
                }
            }
            Some(_) => {}
            None => match b {
                b'\'' | b'"' | b'`' => quote = Some(b),
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i + 1);
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::classifier::statement_kind;
    use crate::interceptor::types::StatementKind;

    fn attempt(connection: &str, table: &str, status: AuditStatus) -> WriteAttempt {
        WriteAttempt {
            connection_name: connection.into(),
            table_name: table.into(),
            operation: StatementKind::Insert,
            sql: format!("INSERT INTO {table} (name) VALUES ('secret')"),
            affected_rows: 1,
            status,
            execution_time_ms: 2.5,
            error_message: None,
            user_context: Some("agent-1".into()),
        }
    }

    #[test]
    fn test_ring_buffer_keeps_most_recent() {
        let trail = AuditTrail::in_memory(10);
        for i in 0..12 {
            trail.record(attempt("local", &format!("T{i}"), AuditStatus::Success));
        }
        let entries = trail.query(&AuditFilter::default());
        assert_eq!(entries.len(), 10);
        assert_eq!(entries.first().unwrap().table_name, "T2");
        assert_eq!(entries.last().unwrap().table_name, "T11");
        assert_eq!(trail.len(), trail.capacity());
    }

    #[test]
    fn test_overflow_by_one_evicts_oldest() {
        let trail = AuditTrail::in_memory(3);
        for i in 0..4 {
            trail.record(attempt("c", &format!("T{i}"), AuditStatus::Success));
        }
        let tables: Vec<String> = trail
            .query(&AuditFilter::default())
            .into_iter()
            .map(|e| e.table_name)
            .collect();
        assert_eq!(tables, vec!["T1", "T2", "T3"]);
    }

    #[test]
    fn test_disabled_trail_is_noop() {
        let mut config = AuditConfig::default();
        config.enabled = false;
        let trail = AuditTrail::new(&config);
        assert!(trail.record(attempt("c", "t", AuditStatus::Success)).is_none());
        assert!(trail.is_empty());
    }

    #[test]
    fn test_filters() {
        let trail = AuditTrail::in_memory(100);
        trail.record(attempt("a", "USERS", AuditStatus::Success));
        trail.record(attempt("a", "ORDERS", AuditStatus::Failed));
        trail.record(attempt("b", "USERS", AuditStatus::Success));

        let by_table = trail.query(&AuditFilter {
            table_name: Some("users".into()),
            ..Default::default()
        });
        assert_eq!(by_table.len(), 2);

        let failed_a = trail.query(&AuditFilter {
            connection_name: Some("a".into()),
            status: Some(AuditStatus::Failed),
            ..Default::default()
        });
        assert_eq!(failed_a.len(), 1);
        assert_eq!(failed_a[0].table_name, "ORDERS");

        let deletes = trail.query(&AuditFilter {
            operation: Some(StatementKind::Delete),
            ..Default::default()
        });
        assert!(deletes.is_empty());

        let limited = trail.query(&AuditFilter {
            limit: 2,
            ..Default::default()
        });
        assert_eq!(limited[0].connection_name, "a");
        assert_eq!(limited[0].table_name, "ORDERS");
        assert_eq!(limited[1].connection_name, "b");
    }

    #[test]
    fn test_time_range_is_half_open() {
        let trail = AuditTrail::in_memory(10);
        let first = trail.record(attempt("c", "t", AuditStatus::Success)).unwrap();

        let from_first = trail.query(&AuditFilter {
            start_time: Some(first.timestamp.clone()),
            ..Default::default()
        });
        assert_eq!(from_first.len(), 1);

        let before_first = trail.query(&AuditFilter {
            end_time: Some(first.timestamp.clone()),
            ..Default::default()
        });
        assert!(before_first.is_empty());
    }

    #[test]
    fn test_timestamp_format() {
        let trail = AuditTrail::in_memory(1);
        let entry = trail.record(attempt("c", "t", AuditStatus::Success)).unwrap();
        assert_eq!(entry.timestamp.len(), "2026-01-01T00:00:00.000000Z".len());
        assert!(entry.timestamp.ends_with('Z'));
    }

    #[test]
    fn test_record_sanitizes_and_respects_user_context() {
        let mut config = AuditConfig::default();
        config.content.include_user_context = false;
        let trail = AuditTrail::new(&config);
        let entry = trail.record(attempt("c", "users", AuditStatus::Success)).unwrap();
        assert!(!entry.sql.contains("secret"));
        assert!(entry.user_context.is_none());

        let mut raw = AuditConfig::default();
        raw.content.sanitize_sql = false;
        let trail = AuditTrail::new(&raw);
        let entry = trail.record(attempt("c", "users", AuditStatus::Success)).unwrap();
        assert!(entry.sql.contains("secret"));
        assert_eq!(entry.user_context.as_deref(), Some("agent-1"));
    }

    #[test]
    fn test_stats() {
        let trail = AuditTrail::in_memory(10);
        trail.record(attempt("a", "t", AuditStatus::Success));
        trail.record(attempt("a", "t", AuditStatus::Failed));
        trail.record(attempt("b", "t", AuditStatus::Success));
        let stats = trail.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.by_operation["INSERT"], 3);
        assert_eq!(stats.by_connection["a"], 2);
    }

    #[test]
    fn test_render() {
        assert_eq!(render(&[]), NO_AUDIT_LOGS);
        let trail = AuditTrail::in_memory(10);
        let mut failed = attempt("local", "ORDERS", AuditStatus::Failed);
        failed.error_message = Some("constraint violated".into());
        trail.record(failed);
        let text = render(&trail.query(&AuditFilter::default()));
        assert!(text.contains("FAILED INSERT on ORDERS (connection: local)"));
        assert!(text.contains("Error: constraint violated"));
    }

    #[test]
    fn test_sanitize_values() {
        assert_eq!(
            sanitize_sql("INSERT INTO users (name, age) VALUES ('Alice', 30)"),
            "INSERT INTO users (name, age) VALUES (?)"
        );
        assert_eq!(
            sanitize_sql("insert into t values ('a)b', 1), ('c', 2);"),
            "insert into t values (?);"
        );
        assert_eq!(
            sanitize_sql("INSERT INTO t VALUES ('it''s', (1 + 2))"),
            "INSERT INTO t VALUES (?)"
        );
    }

    #[test]
    fn test_sanitize_where_literals() {
        assert_eq!(
            sanitize_sql("UPDATE users SET active = 0 WHERE email = 'a@b.c' AND id = 42"),
            "UPDATE users SET active = 0 WHERE email = ? AND id = ?"
        );
        assert_eq!(
            sanitize_sql("DELETE FROM t WHERE a.id = b.id"),
            "DELETE FROM t WHERE a.id = b.id"
        );
    }

    #[test]
    fn test_sanitize_preserves_kind() {
        for sql in [
            "INSERT INTO t VALUES (1)",
            "UPDATE t SET x = 1 WHERE id = 2",
            "DELETE FROM t WHERE name = 'x'",
            "INSERT INTO t VALUES (unterminated",
        ] {
            assert_eq!(statement_kind(&sanitize_sql(sql)), statement_kind(sql));
        }
    }
}
