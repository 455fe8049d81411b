// SPDX-License-Identifier: Apache-2.0

//! Connection Commands
//!
//! Lists configured connections, optionally probing each one.

use std::fmt::Write as _;

use serde::Serialize;
use tracing::{instrument, warn};

use super::to_data;
use crate::engine::EngineKind;
use crate::gateway::{Gateway, GatewayResult, ToolOutput};

/// One configured connection as reported to the caller
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub name: String,
    pub engine: Option<EngineKind>,
    pub location: Option<String>,
    pub writable: bool,
    /// `ok` or `error`; only set when liveness was checked
    pub status: Option<String>,
    /// Profile or liveness failure for this entry
    pub error: Option<String>,
}

/// Lists every connection in the current configuration.
///
/// A malformed profile or failed probe is reported on its own entry and
/// does not fail the listing.
#[instrument(skip(gateway))]
pub async fn list_connections(gateway: &Gateway, check_liveness: bool) -> GatewayResult<ToolOutput> {
    let config = gateway.config()?;
    let mut summaries = Vec::with_capacity(config.connections.len());

    for name in config.connection_names() {
        let profile = match config.profile(name) {
            Ok(profile) => profile,
            Err(e) => {
                summaries.push(ConnectionSummary {
                    name: name.to_string(),
                    engine: None,
                    location: None,
                    writable: false,
                    status: check_liveness.then(|| "error".to_string()),
                    error: Some(e.to_string()),
                });
                continue;
            }
        };

        let mut summary = ConnectionSummary {
            name: name.to_string(),
            engine: Some(profile.kind()),
            location: Some(profile.engine.location()),
            writable: profile.writable,
            status: None,
            error: None,
        };

        if check_liveness {
            match gateway.acquire(&profile).await {
                Ok(scoped) => {
                    scoped.release().await;
                    summary.status = Some("ok".to_string());
                }
                Err(e) => {
                    warn!(connection = %name, "Liveness check failed: {}", e);
                    summary.status = Some("error".to_string());
                    summary.error = Some(e.to_string());
                }
            }
        }
        summaries.push(summary);
    }

    let text = render(&summaries);
    Ok(ToolOutput::new(None, text, to_data(&summaries)?))
}

fn render(summaries: &[ConnectionSummary]) -> String {
    if summaries.is_empty() {
        return "No connections configured.".to_string();
    }

    let mut out = format!("Connections ({}):\n", summaries.len());
    for summary in summaries {
        let engine = summary.engine.map(|k| k.as_str()).unwrap_or("invalid");
        let _ = write!(out, "- {} ({})", summary.name, engine);
        if let Some(location) = &summary.location {
            let _ = write!(out, " {location}");
        }
        if summary.writable {
            out.push_str(" [writable]");
        }
        if let Some(status) = &summary.status {
            let _ = write!(out, " status: {status}");
        }
        if let Some(error) = &summary.error {
            let _ = write!(out, " ({error})");
        }
        out.push('\n');
    }
    out
}
