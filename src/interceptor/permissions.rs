//! Write Permission Engine
//!
//! Evaluates a connection's write policy for one (table, operation) pair.

use crate::config::{ConnectionProfile, DefaultPolicy};

use super::types::{PermissionDecision, StatementKind};

/// Decides whether `operation` on `table` is allowed for this connection.
///
/// Total and side-effect free. Only INSERT, UPDATE and DELETE can ever be
/// allowed.
pub fn authorize(profile: &ConnectionProfile, table: &str, operation: StatementKind) -> PermissionDecision {
    if !profile.writable {
        return PermissionDecision::deny("connection not writable");
    }
    if !operation.is_write() {
        return PermissionDecision::deny(format!(
            "{operation} is not a permitted write operation"
        ));
    }

    let Some(permissions) = &profile.write_permissions else {
        return PermissionDecision::Allow;
    };

    let entry = permissions
        .tables
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(table))
        .map(|(_, permission)| permission);

    match entry {
        Some(permission) => {
            let allowed = permission
                .operations
                .iter()
                .any(|op| op.trim().eq_ignore_ascii_case(operation.as_str()));
            if allowed {
                PermissionDecision::Allow
            } else {
                PermissionDecision::deny(format!("no permission for {operation} on {table}"))
            }
        }
        None => match permissions.default_policy {
            DefaultPolicy::AllowAll => PermissionDecision::Allow,
            DefaultPolicy::ReadOnly | DefaultPolicy::Unrecognized => PermissionDecision::deny(
                format!("no permission for {operation} on {table} (default policy is read-only)"),
            ),
        },
    }
}
