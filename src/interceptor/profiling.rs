//! Resource Statistics
//!
//! Per-handler counters and timing aggregates. One instance is bound to one
//! scoped handler and discarded with it, so nothing here is shared or
//! locked.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

use super::classifier::leading_keyword;
use super::types::{ResourceStatsSnapshot, SlowQuery, TimingStats};

/// Queries slower than this are kept in the slow ring
pub const SLOW_QUERY_THRESHOLD_SECS: f64 = 0.1;
const MAX_SLOW_QUERIES: usize = 10;
/// Maximum number of durations kept for the timing aggregates
const MAX_DURATIONS: usize = 1000;
const SLOW_SQL_PREVIEW_CHARS: usize = 100;

/// Statistics for one handler lifetime
#[derive(Debug, Default)]
pub struct ResourceStats {
    active_connections: u64,
    total_connections: u64,
    connection_started: Option<(DateTime<Utc>, Instant)>,
    query_count: u64,
    last_query_time: Option<DateTime<Utc>>,
    error_count: u64,
    last_error_time: Option<DateTime<Utc>>,
    error_types: BTreeMap<String, u64>,
    query_types: BTreeMap<String, u64>,
    durations: VecDeque<f64>,
    slow_queries: VecDeque<SlowQuery>,
    current_memory_bytes: u64,
    peak_memory_bytes: u64,
}

impl ResourceStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start time is recorded on the first call only.
    pub fn on_connection_start(&mut self) {
        self.active_connections += 1;
        self.total_connections += 1;
        if self.connection_started.is_none() {
            self.connection_started = Some((Utc::now(), Instant::now()));
        }
    }

    pub fn on_connection_end(&mut self) {
        self.active_connections = self.active_connections.saturating_sub(1);
    }

    pub fn on_query(&mut self, sql: &str, duration_secs: f64) {
        self.query_count += 1;
        self.last_query_time = Some(Utc::now());

        if self.durations.len() >= MAX_DURATIONS {
            self.durations.pop_front();
        }
        self.durations.push_back(duration_secs);

        let kind = leading_keyword(sql).unwrap_or_else(|| "UNKNOWN".to_string());
        *self.query_types.entry(kind).or_insert(0) += 1;

        if duration_secs > SLOW_QUERY_THRESHOLD_SECS {
            if self.slow_queries.len() >= MAX_SLOW_QUERIES {
                self.slow_queries.pop_front();
            }
            self.slow_queries.push_back(SlowQuery {
                sql: truncate_sql(sql),
                duration_seconds: duration_secs,
            });
            debug!("Recorded slow query: {:.3}s", duration_secs);
        }
    }

    pub fn on_error(&mut self, kind: &str) {
        self.error_count += 1;
        self.last_error_time = Some(Utc::now());
        *self.error_types.entry(kind.to_string()).or_insert(0) += 1;
    }

    /// Records the approximate size of the latest result set.
    pub fn on_memory(&mut self, bytes: u64) {
        self.current_memory_bytes = bytes;
        self.peak_memory_bytes = self.peak_memory_bytes.max(bytes);
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections
    }

    pub fn query_count(&self) -> u64 {
        self.query_count
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn snapshot(&self) -> ResourceStatsSnapshot {
        ResourceStatsSnapshot {
            active_connections: self.active_connections,
            total_connections: self.total_connections,
            connection_start_time: self.connection_started.map(|(at, _)| rfc3339(at)),
            connection_duration_seconds: self
                .connection_started
                .map(|(_, started)| started.elapsed().as_secs_f64())
                .unwrap_or(0.0),
            query_count: self.query_count,
            last_query_time: self.last_query_time.map(rfc3339),
            error_count: self.error_count,
            last_error_time: self.last_error_time.map(rfc3339),
            error_types: self.error_types.clone(),
            query_types: self.query_types.clone(),
            timing: timing_stats(&self.durations),
            slow_queries: self.slow_queries.iter().cloned().collect(),
            current_memory_bytes: self.current_memory_bytes,
            peak_memory_bytes: self.peak_memory_bytes,
        }
    }
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(SLOW_SQL_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &sql[..cut]),
        None => sql.to_string(),
    }
}

fn timing_stats(durations: &VecDeque<f64>) -> TimingStats {
    if durations.is_empty() {
        return TimingStats::default();
    }

    let mut sorted: Vec<f64> = durations.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let len = sorted.len();
    let mid = len / 2;
    let median = if len % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };

    TimingStats {
        min: sorted[0],
        max: sorted[len - 1],
        mean: sorted.iter().sum::<f64>() / len as f64,
        median,
    }
}

impl ResourceStatsSnapshot {
    /// Text rendering used by the performance tool
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Connection:");
        let _ = writeln!(
            out,
            "  active: {}, total: {}",
            self.active_connections, self.total_connections
        );
        if let Some(start) = &self.connection_start_time {
            let _ = writeln!(out, "  started: {start}");
        }
        let _ = writeln!(out, "  duration: {:.3}s", self.connection_duration_seconds);

        let _ = writeln!(out, "Queries:");
        let _ = writeln!(out, "  count: {}", self.query_count);
        if let Some(last) = &self.last_query_time {
            let _ = writeln!(out, "  last: {last}");
        }
        let _ = writeln!(
            out,
            "  timing (s): min {:.4}, max {:.4}, mean {:.4}, median {:.4}",
            self.timing.min, self.timing.max, self.timing.mean, self.timing.median
        );
        for (kind, count) in &self.query_types {
            let _ = writeln!(out, "  {kind}: {count}");
        }

        let _ = writeln!(out, "Errors:");
        let _ = writeln!(out, "  count: {}", self.error_count);
        for (kind, count) in &self.error_types {
            let _ = writeln!(out, "  {kind}: {count}");
        }

        if !self.slow_queries.is_empty() {
            let _ = writeln!(out, "Slow queries:");
            for slow in &self.slow_queries {
                let _ = writeln!(out, "  {:.3}s  {}", slow.duration_seconds, slow.sql);
            }
        }

        let _ = writeln!(
            out,
            "Memory: current {} bytes, peak {} bytes",
            self.current_memory_bytes, self.peak_memory_bytes
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot_is_all_zero() {
        let snapshot = ResourceStats::new().snapshot();
        assert_eq!(snapshot.timing, TimingStats::default());
        assert_eq!(snapshot.query_count, 0);
        assert!(snapshot.connection_start_time.is_none());
        assert_eq!(snapshot.connection_duration_seconds, 0.0);
    }

    #[test]
    fn test_connection_counts() {
        let mut stats = ResourceStats::new();
        stats.on_connection_start();
        stats.on_connection_start();
        stats.on_connection_end();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.active_connections, 1);
        assert_eq!(snapshot.total_connections, 2);
        assert!(snapshot.connection_start_time.is_some());

        stats.on_connection_end();
        stats.on_connection_end();
        assert_eq!(stats.active_connections(), 0);
    }

    #[test]
    fn test_timing_median_even_and_odd() {
        let mut stats = ResourceStats::new();
        for d in [0.04, 0.01, 0.03] {
            stats.on_query("SELECT 1", d);
        }
        let t = stats.snapshot().timing;
        assert_eq!(t.min, 0.01);
        assert_eq!(t.max, 0.04);
        assert_eq!(t.median, 0.03);

        stats.on_query("select 2", 0.02);
        let t = stats.snapshot().timing;
        assert!((t.median - 0.025).abs() < 1e-12);
        assert!((t.mean - 0.025).abs() < 1e-12);
    }

    #[test]
    fn test_query_type_histogram() {
        let mut stats = ResourceStats::new();
        stats.on_query("select 1", 0.001);
        stats.on_query("  SELECT 2", 0.001);
        stats.on_query("insert into t values (1)", 0.001);
        stats.on_query("", 0.001);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.query_types["SELECT"], 2);
        assert_eq!(snapshot.query_types["INSERT"], 1);
        assert_eq!(snapshot.query_types["UNKNOWN"], 1);
    }

    #[test]
    fn test_slow_ring_is_bounded() {
        let mut stats = ResourceStats::new();
        stats.on_query("SELECT fast", 0.1);
        for i in 0..12 {
            stats.on_query(&format!("SELECT {i}"), 0.5);
        }
        let slow = stats.snapshot().slow_queries;
        assert_eq!(slow.len(), 10);
        assert_eq!(slow[0].sql, "SELECT 2");
        assert_eq!(slow[9].sql, "SELECT 11");
    }

    #[test]
    fn test_slow_sql_is_truncated() {
        let mut stats = ResourceStats::new();
        let long = format!("SELECT {}", "x".repeat(200));
        stats.on_query(&long, 1.0);
        let sql = &stats.snapshot().slow_queries[0].sql;
        assert_eq!(sql.chars().count(), 103);
        assert!(sql.ends_with("..."));
    }

    #[test]
    fn test_duration_series_is_bounded() {
        let mut stats = ResourceStats::new();
        stats.on_query("SELECT 1", 5.0);
        for _ in 0..MAX_DURATIONS {
            stats.on_query("SELECT 1", 0.001);
        }
        assert_eq!(stats.snapshot().timing.max, 0.001);
        assert_eq!(stats.query_count(), MAX_DURATIONS as u64 + 1);
    }

    #[test]
    fn test_errors_and_memory() {
        let mut stats = ResourceStats::new();
        stats.on_error("ExecutionError");
        stats.on_error("ExecutionError");
        stats.on_error("Timeout");
        stats.on_memory(4096);
        stats.on_memory(1024);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.error_count, 3);
        assert_eq!(snapshot.error_types["ExecutionError"], 2);
        assert!(snapshot.last_error_time.is_some());
        assert_eq!(snapshot.current_memory_bytes, 1024);
        assert_eq!(snapshot.peak_memory_bytes, 4096);

        let text = snapshot.render();
        assert!(text.contains("Timeout: 1"));
        assert!(text.contains("peak 4096 bytes"));
    }
}
