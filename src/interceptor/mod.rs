//! Query Interceptor
//!
//! The policy and bookkeeping layer that sits between tool calls and
//! backend handlers:
//! - **Classifier**: statement kind and target table from SQL text
//! - **Permissions**: per-connection write policy evaluation
//! - **Audit**: bounded, optionally persisted record of every write attempt
//! - **Profiling**: per-handler query timing, error and memory statistics

pub mod audit;
pub mod classifier;
pub mod permissions;
pub mod profiling;
pub mod sink;
pub mod types;

pub use audit::{render as render_audit_entries, sanitize_sql, AuditTrail, NO_AUDIT_LOGS};
pub use classifier::{classify, is_single_statement, statement_kind, MULTIPLE_STATEMENTS};
pub use permissions::authorize;
pub use profiling::ResourceStats;
pub use sink::RotatingFileSink;
pub use types::*;
