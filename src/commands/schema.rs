//! Schema Commands
//!
//! Table listing and per-table introspection. None of these need write
//! authorization; each runs on its own scoped handler.

use std::fmt::Write as _;

use tracing::instrument;

use super::to_data;
use crate::engine::{TableConstraint, TableIndex, TableInfo, TableSchema, TableStats};
use crate::gateway::{Gateway, GatewayError, GatewayResult, ToolOutput};

fn require_table(table: &str) -> GatewayResult<()> {
    if table.trim().is_empty() {
        return Err(GatewayError::validation("Table name must not be empty"));
    }
    Ok(())
}

#[instrument(skip(gateway))]
pub async fn list_tables(gateway: &Gateway, connection: &str) -> GatewayResult<ToolOutput> {
    let profile = gateway.profile(connection)?;
    let mut scoped = gateway.acquire(&profile).await?;
    let result = scoped.list_tables().await;
    scoped.release().await;
    let tables = result?;

    Ok(ToolOutput::new(
        Some(profile.kind()),
        render_tables(&tables),
        to_data(&tables)?,
    ))
}

#[instrument(skip(gateway))]
pub async fn describe_table(
    gateway: &Gateway,
    connection: &str,
    table: &str,
) -> GatewayResult<ToolOutput> {
    require_table(table)?;
    let profile = gateway.profile(connection)?;
    let mut scoped = gateway.acquire(&profile).await?;
    let result = scoped.get_schema(table).await;
    scoped.release().await;
    let schema = result?;

    Ok(ToolOutput::new(
        Some(profile.kind()),
        render_schema(&schema),
        to_data(&schema)?,
    ))
}

#[instrument(skip(gateway))]
pub async fn get_ddl(gateway: &Gateway, connection: &str, table: &str) -> GatewayResult<ToolOutput> {
    require_table(table)?;
    let profile = gateway.profile(connection)?;
    let mut scoped = gateway.acquire(&profile).await?;
    let result = scoped.table_ddl(table).await;
    scoped.release().await;
    let ddl = result?;

    let data = serde_json::json!({ "table": table, "ddl": ddl });
    Ok(ToolOutput::new(Some(profile.kind()), ddl, data))
}

#[instrument(skip(gateway))]
pub async fn list_indexes(
    gateway: &Gateway,
    connection: &str,
    table: &str,
) -> GatewayResult<ToolOutput> {
    require_table(table)?;
    let profile = gateway.profile(connection)?;
    let mut scoped = gateway.acquire(&profile).await?;
    let result = scoped.table_indexes(table).await;
    scoped.release().await;
    let indexes = result?;

    Ok(ToolOutput::new(
        Some(profile.kind()),
        render_indexes(table, &indexes),
        to_data(&indexes)?,
    ))
}

#[instrument(skip(gateway))]
pub async fn get_table_stats(
    gateway: &Gateway,
    connection: &str,
    table: &str,
) -> GatewayResult<ToolOutput> {
    require_table(table)?;
    let profile = gateway.profile(connection)?;
    let mut scoped = gateway.acquire(&profile).await?;
    let result = scoped.table_stats(table).await;
    scoped.release().await;
    let stats = result?;

    Ok(ToolOutput::new(
        Some(profile.kind()),
        render_stats(&stats),
        to_data(&stats)?,
    ))
}

#[instrument(skip(gateway))]
pub async fn list_constraints(
    gateway: &Gateway,
    connection: &str,
    table: &str,
) -> GatewayResult<ToolOutput> {
    require_table(table)?;
    let profile = gateway.profile(connection)?;
    let mut scoped = gateway.acquire(&profile).await?;
    let result = scoped.table_constraints(table).await;
    scoped.release().await;
    let constraints = result?;

    Ok(ToolOutput::new(
        Some(profile.kind()),
        render_constraints(table, &constraints),
        to_data(&constraints)?,
    ))
}

fn render_tables(tables: &[TableInfo]) -> String {
    if tables.is_empty() {
        return "No tables found.".to_string();
    }
    let mut out = format!("Tables ({}):\n", tables.len());
    for table in tables {
        match &table.description {
            Some(description) => {
                let _ = writeln!(out, "- {}: {}", table.name, description);
            }
            None => {
                let _ = writeln!(out, "- {}", table.name);
            }
        }
    }
    out
}

fn render_schema(schema: &TableSchema) -> String {
    let mut out = format!("Table: {}\n\nColumns:\n", schema.table);
    for column in &schema.columns {
        let _ = write!(
            out,
            "  {} {} {}",
            column.name,
            column.data_type,
            if column.nullable { "NULL" } else { "NOT NULL" }
        );
        if let Some(default) = &column.default_value {
            let _ = write!(out, " DEFAULT {default}");
        }
        if column.is_primary_key {
            out.push_str(" PRIMARY KEY");
        }
        if let Some(comment) = &column.comment {
            let _ = write!(out, " -- {comment}");
        }
        out.push('\n');
    }

    if !schema.primary_key.is_empty() {
        let _ = writeln!(out, "\nPrimary key: {}", schema.primary_key.join(", "));
    }
    if !schema.foreign_keys.is_empty() {
        out.push_str("\nForeign keys:\n");
        for fk in &schema.foreign_keys {
            let _ = writeln!(
                out,
                "  {} -> {}({})",
                fk.column, fk.referenced_table, fk.referenced_column
            );
        }
    }
    if !schema.indexes.is_empty() {
        out.push_str("\nIndexes:\n");
        for index in &schema.indexes {
            let _ = writeln!(out, "  {}", index_line(index));
        }
    }
    out
}

fn index_line(index: &TableIndex) -> String {
    let mut line = format!("{} ({})", index.name, index.columns.join(", "));
    if index.is_primary {
        line.push_str(" PRIMARY");
    } else if index.is_unique {
        line.push_str(" UNIQUE");
    }
    line
}

fn render_indexes(table: &str, indexes: &[TableIndex]) -> String {
    if indexes.is_empty() {
        return format!("No indexes on {table}.");
    }
    let mut out = format!("Indexes on {table} ({}):\n", indexes.len());
    for index in indexes {
        let _ = writeln!(out, "- {}", index_line(index));
        if let Some(definition) = &index.definition {
            let _ = writeln!(out, "    {definition}");
        }
    }
    out
}

fn render_stats(stats: &TableStats) -> String {
    let mut out = format!("Statistics for {}:\n", stats.table);
    match stats.row_count {
        Some(rows) => {
            let _ = writeln!(out, "  rows: {rows}");
        }
        None => out.push_str("  rows: unknown\n"),
    }
    let _ = writeln!(out, "  columns: {}", stats.column_count);
    let _ = writeln!(out, "  indexes: {}", stats.index_count);
    if let Some(size) = stats.size_bytes {
        let _ = writeln!(out, "  size: {size} bytes");
    }
    for (key, value) in &stats.extra {
        let _ = writeln!(out, "  {key}: {value}");
    }
    out
}

fn render_constraints(table: &str, constraints: &[TableConstraint]) -> String {
    if constraints.is_empty() {
        return format!("No constraints on {table}.");
    }
    let mut out = format!("Constraints on {table} ({}):\n", constraints.len());
    for constraint in constraints {
        let _ = write!(
            out,
            "- {} {} ({})",
            constraint.name,
            constraint.kind.label(),
            constraint.columns.join(", ")
        );
        if let Some(definition) = &constraint.definition {
            let _ = write!(out, ": {definition}");
        }
        out.push('\n');
    }
    out
}
