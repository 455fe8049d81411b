// SPDX-License-Identifier: Apache-2.0

//! Interceptor Commands
//!
//! Diagnostics backed by the statistics tracker and the audit trail.

use tracing::instrument;

use super::to_data;
use crate::gateway::{Gateway, GatewayResult, ToolOutput};
use crate::interceptor::{render_audit_entries, AuditFilter};

const LIVENESS_PROBE: &str = "SELECT 1";

/// Opens the connection, runs a liveness probe and reports the handler's
/// statistics.
#[instrument(skip(gateway))]
pub async fn get_performance(gateway: &Gateway, connection: &str) -> GatewayResult<ToolOutput> {
    let profile = gateway.profile(connection)?;
    let mut scoped = gateway.acquire(&profile).await?;
    let probe = scoped.execute_read(LIVENESS_PROBE).await;
    let snapshot = scoped.stats();
    scoped.release().await;
    probe?;

    let text = format!("Performance for '{}':\n{}", profile.name, snapshot.render());
    Ok(ToolOutput::new(Some(profile.kind()), text, to_data(&snapshot)?))
}

/// Queries the audit trail. Needs no backend connection.
#[instrument(skip(gateway, filter), fields(connection = ?filter.connection_name, limit = filter.limit))]
pub async fn get_audit_logs(gateway: &Gateway, filter: AuditFilter) -> GatewayResult<ToolOutput> {
    let engine = filter
        .connection_name
        .as_deref()
        .and_then(|name| gateway.profile(name).ok())
        .map(|profile| profile.kind());

    let audit = gateway.audit();
    let entries = audit.query(&filter);
    let data = serde_json::json!({
        "entries": to_data(&entries)?,
        "stats": to_data(&audit.stats())?,
    });
    Ok(ToolOutput::new(engine, render_audit_entries(&entries), data))
}
