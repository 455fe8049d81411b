// SPDX-License-Identifier: Apache-2.0

//! Errors surfaced by the gateway core to its caller

use thiserror::Error;

use crate::engine::EngineError;

/// Unified error type for tool invocations
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing or malformed connection, unknown engine, bad policy
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Write denied by the connection's policy
    #[error("Permission denied: {message}")]
    Permission { message: String },

    /// The backend raised while running a statement or introspection call
    #[error("Execution error: {source}")]
    Execution {
        #[from]
        source: EngineError,
    },

    /// Tool arguments the gateway refuses before touching a backend
    #[error("Invalid request: {message}")]
    Validation { message: String },
}

impl GatewayError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration { message: msg.into() }
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission { message: msg.into() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation { message: msg.into() }
    }

    /// Error kind name reported to callers alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "ConfigurationError",
            Self::Permission { .. } => "PermissionError",
            Self::Execution { .. } => "ExecutionError",
            Self::Validation { .. } => "ValidationError",
        }
    }
}

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
