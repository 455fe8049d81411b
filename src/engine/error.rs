// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for backend handlers
//!
//! Every engine-specific failure (sqlx errors, unsupported statements,
//! missing tables) is mapped onto these variants so the gateway can render
//! and count them uniformly.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all backend handler operations
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum EngineError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Query syntax error: {message}")]
    SyntaxError { message: String },

    #[error("Query execution error: {message}")]
    ExecutionError { message: String },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Feature not supported: {message}")]
    NotSupported { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: msg.into() }
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::AuthenticationFailed { message: msg.into() }
    }

    pub fn syntax_error(msg: impl Into<String>) -> Self {
        Self::SyntaxError { message: msg.into() }
    }

    pub fn execution_error(msg: impl Into<String>) -> Self {
        Self::ExecutionError { message: msg.into() }
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported { message: msg.into() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError { message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { message: msg.into() }
    }

    /// Stable name of the variant, used as the error histogram key.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionFailed { .. } => "ConnectionFailed",
            Self::AuthenticationFailed { .. } => "AuthenticationFailed",
            Self::SyntaxError { .. } => "SyntaxError",
            Self::ExecutionError { .. } => "ExecutionError",
            Self::Timeout { .. } => "Timeout",
            Self::NotSupported { .. } => "NotSupported",
            Self::ValidationError { .. } => "ValidationError",
            Self::Internal { .. } => "Internal",
        }
    }

    /// Maps a sqlx failure raised while running a statement.
    pub fn from_query(err: sqlx::Error) -> Self {
        let msg = err.to_string();
        if msg.to_ascii_lowercase().contains("syntax") {
            Self::syntax_error(msg)
        } else {
            Self::execution_error(msg)
        }
    }

    /// Maps a sqlx failure raised while opening a connection.
    pub fn from_connect(err: sqlx::Error) -> Self {
        let msg = err.to_string();
        let lower = msg.to_ascii_lowercase();
        if lower.contains("password authentication failed") || lower.contains("access denied") {
            Self::auth_failed(msg)
        } else {
            Self::connection_failed(msg)
        }
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(EngineError::execution_error("x").kind(), "ExecutionError");
        assert_eq!(EngineError::Timeout { timeout_ms: 5 }.kind(), "Timeout");
        assert_eq!(EngineError::validation("x").kind(), "ValidationError");
    }

    #[test]
    fn connect_errors_detect_auth_failures() {
        let err = EngineError::from_connect(sqlx::Error::Protocol(
            "password authentication failed for user \"app\"".to_string(),
        ));
        assert!(matches!(err, EngineError::AuthenticationFailed { .. }));

        let err = EngineError::from_connect(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, EngineError::ConnectionFailed { .. }));
    }
}
