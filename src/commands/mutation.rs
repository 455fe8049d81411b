// SPDX-License-Identifier: Apache-2.0

//! Mutation Commands
//!
//! The execute-write tool. Policy, dispatch and auditing live in the
//! gateway's write path; this renders the outcome.

use std::fmt::Write as _;

use tracing::instrument;

use super::to_data;
use crate::gateway::{Gateway, GatewayResult, ToolOutput, WriteRequest};

/// Executes an INSERT, UPDATE or DELETE after confirmation and policy checks
#[instrument(skip(gateway, request), fields(connection = %request.connection))]
pub async fn execute_write(gateway: &Gateway, request: WriteRequest) -> GatewayResult<ToolOutput> {
    let report = gateway.execute_write(request).await?;

    let mut text = format!(
        "Write executed successfully. Affected rows: {}\n",
        report.affected_rows
    );
    let _ = writeln!(text, "Operation: {} on {}", report.operation, report.table);
    let _ = write!(text, "Execution time: {:.2} ms", report.execution_time_ms);
    if report.audit.is_some() {
        text.push_str("\nRecorded in audit log.");
    }

    Ok(ToolOutput::new(Some(report.engine), text, to_data(&report)?))
}
