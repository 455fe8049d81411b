// SPDX-License-Identifier: Apache-2.0

//! Query Commands
//!
//! Read-only execution, execution plans and query analysis.

use std::fmt::Write as _;
use std::sync::OnceLock;
use std::time::Instant;

use regex::Regex;
use serde::Serialize;
use tracing::{info, instrument};

use super::to_data;
use crate::engine::QueryResult;
use crate::gateway::{Gateway, GatewayError, GatewayResult, ToolOutput};
use crate::interceptor::profiling::SLOW_QUERY_THRESHOLD_SECS;
use crate::interceptor::{is_single_statement, statement_kind, StatementKind, MULTIPLE_STATEMENTS};

/// Rows beyond this are counted but not rendered as text
const MAX_RENDERED_ROWS: usize = 500;

const READ_ONLY_HINT: &str = "Only SELECT queries are allowed here. \
Use execute_write for INSERT, UPDATE or DELETE.";

fn require_single(sql: &str) -> GatewayResult<()> {
    if is_single_statement(sql) {
        Ok(())
    } else {
        Err(GatewayError::validation(MULTIPLE_STATEMENTS))
    }
}

fn require_select(sql: &str) -> GatewayResult<()> {
    require_single(sql)?;
    match statement_kind(sql) {
        StatementKind::Select => Ok(()),
        other => Err(GatewayError::validation(format!("{READ_ONLY_HINT} Got {other}."))),
    }
}

/// Runs a read-only query
#[instrument(skip(gateway, sql), fields(sql_len = sql.len()))]
pub async fn run_query(gateway: &Gateway, connection: &str, sql: &str) -> GatewayResult<ToolOutput> {
    let profile = gateway.profile(connection)?;
    require_select(sql)?;

    let mut scoped = gateway.acquire(&profile).await?;
    let result = scoped.execute_read(sql).await;
    scoped.release().await;
    let result = result?;

    info!(rows = result.rows.len(), "Query executed");
    Ok(ToolOutput::new(
        Some(profile.kind()),
        render_result(&result),
        to_data(&result)?,
    ))
}

/// Returns the execution plan without running the query
#[instrument(skip(gateway, sql), fields(sql_len = sql.len()))]
pub async fn explain_query(
    gateway: &Gateway,
    connection: &str,
    sql: &str,
) -> GatewayResult<ToolOutput> {
    let profile = gateway.profile(connection)?;
    if sql.trim().is_empty() {
        return Err(GatewayError::validation("Query must not be empty"));
    }
    require_single(sql)?;
    let kind = statement_kind(sql);
    if kind != StatementKind::Select && !kind.is_write() {
        return Err(GatewayError::validation(format!(
            "Only SELECT, INSERT, UPDATE and DELETE statements can be explained. Got {kind}."
        )));
    }

    let mut scoped = gateway.acquire(&profile).await?;
    let result = scoped.explain(sql).await;
    scoped.release().await;
    let plan = result?;

    let data = serde_json::json!({ "plan": plan });
    Ok(ToolOutput::new(
        Some(profile.kind()),
        format!("Execution plan:\n{plan}"),
        data,
    ))
}

/// Plan, timing and suggestions for one SELECT
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnalysis {
    pub plan: String,
    pub execution_time_ms: f64,
    pub row_count: usize,
    pub suggestions: Vec<String>,
}

/// Explains and runs a SELECT, then suggests improvements
#[instrument(skip(gateway, sql), fields(sql_len = sql.len()))]
pub async fn analyze_query(
    gateway: &Gateway,
    connection: &str,
    sql: &str,
) -> GatewayResult<ToolOutput> {
    let profile = gateway.profile(connection)?;
    require_select(sql)?;

    let mut scoped = gateway.acquire(&profile).await?;
    let plan = match scoped.explain(sql).await {
        Ok(plan) => plan,
        Err(e) => {
            scoped.release().await;
            return Err(e);
        }
    };
    let started = Instant::now();
    let result = scoped.execute_read(sql).await;
    let elapsed = started.elapsed().as_secs_f64();
    scoped.release().await;
    let result = result?;

    let analysis = QueryAnalysis {
        suggestions: suggestions(sql, &plan, elapsed),
        plan,
        execution_time_ms: elapsed * 1000.0,
        row_count: result.rows.len(),
    };

    let mut text = String::from("Query analysis:\n");
    let _ = writeln!(text, "Execution time: {:.2} ms", analysis.execution_time_ms);
    let _ = writeln!(text, "Rows returned: {}", analysis.row_count);
    let _ = writeln!(text, "\nExecution plan:\n{}", analysis.plan);
    text.push_str("\nSuggestions:\n");
    for suggestion in &analysis.suggestions {
        let _ = writeln!(text, "- {suggestion}");
    }

    Ok(ToolOutput::new(Some(profile.kind()), text, to_data(&analysis)?))
}

fn pattern(cell: &'static OnceLock<Option<Regex>>, source: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(source).ok()).as_ref()
}

fn matches(cell: &'static OnceLock<Option<Regex>>, source: &str, text: &str) -> bool {
    pattern(cell, source).is_some_and(|re| re.is_match(text))
}

fn has_full_scan(plan: &str) -> bool {
    plan.lines().any(|line| {
        let upper = line.to_ascii_uppercase();
        let sqlite_scan = (upper.contains("SCAN ") || upper.trim_end().ends_with("SCAN"))
            && !upper.contains("USING INDEX")
            && !upper.contains("USING COVERING INDEX")
            && !upper.contains("USING INTEGER PRIMARY KEY");
        let postgres_scan = upper.contains("SEQ SCAN");
        let mysql_scan = upper.contains("| ALL |");
        sqlite_scan || postgres_scan || mysql_scan
    })
}

/// Heuristic suggestions from the SQL text, the plan and the elapsed time.
fn suggestions(sql: &str, plan: &str, elapsed_secs: f64) -> Vec<String> {
    static SELECT_STAR: OnceLock<Option<Regex>> = OnceLock::new();
    static WHERE: OnceLock<Option<Regex>> = OnceLock::new();
    static LIMIT: OnceLock<Option<Regex>> = OnceLock::new();
    static LEADING_WILDCARD: OnceLock<Option<Regex>> = OnceLock::new();

    let mut out = Vec::new();

    if has_full_scan(plan) {
        out.push(
            "The plan contains a full table scan. Consider an index on the filtered or joined columns."
                .to_string(),
        );
    }
    if matches(&SELECT_STAR, r"(?i)\bSELECT\s+(DISTINCT\s+)?\*", sql) {
        out.push("Avoid SELECT *; list only the columns you need.".to_string());
    }
    if !matches(&WHERE, r"(?i)\bWHERE\b", sql) {
        out.push("No WHERE clause: the query reads every row of the table.".to_string());
    }
    if !matches(&LIMIT, r"(?i)\bLIMIT\b|\bFETCH\s+FIRST\b|\bTOP\s+\d", sql) {
        out.push("Consider adding LIMIT to bound the result size.".to_string());
    }
    if matches(&LEADING_WILDCARD, r"(?i)\bLIKE\s+'%", sql) {
        out.push("LIKE patterns starting with % cannot use an index.".to_string());
    }
    if elapsed_secs > SLOW_QUERY_THRESHOLD_SECS {
        out.push(format!(
            "Execution took {:.1} ms, above the {:.0} ms slow query threshold.",
            elapsed_secs * 1000.0,
            SLOW_QUERY_THRESHOLD_SECS * 1000.0
        ));
    }

    if out.is_empty() {
        out.push("No obvious issues found.".to_string());
    }
    out
}

/// Pipe-separated table of a result set
pub fn render_result(result: &QueryResult) -> String {
    if result.rows.is_empty() {
        return format!(
            "Query returned no rows ({:.2} ms).",
            result.execution_time_ms
        );
    }

    let mut out = String::new();
    let header: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    let _ = writeln!(out, "{}", header.join(" | "));
    let _ = writeln!(out, "{}", "-".repeat(header.join(" | ").len().max(3)));

    for row in result.rows.iter().take(MAX_RENDERED_ROWS) {
        let values: Vec<String> = row.values.iter().map(|v| v.to_string()).collect();
        let _ = writeln!(out, "{}", values.join(" | "));
    }
    if result.rows.len() > MAX_RENDERED_ROWS {
        let _ = writeln!(
            out,
            "... {} more rows",
            result.rows.len() - MAX_RENDERED_ROWS
        );
    }
    let _ = write!(
        out,
        "\n{} row(s) in {:.2} ms",
        result.rows.len(),
        result.execution_time_ms
    );
    out
}
