// SPDX-License-Identifier: Apache-2.0

//! Gateway Core
//!
//! Owns the configuration source, the handler registry and the audit trail.
//! Every tool invocation re-resolves its connection profile, runs on its own
//! scoped handler and converges on a [`ToolOutput`] or a [`GatewayError`].

pub mod error;
pub mod response;
pub mod scoped;
pub mod write;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::config::{ConfigSource, ConnectionProfile, GatewayConfig, YamlFileSource};
use crate::engine::HandlerRegistry;
use crate::interceptor::AuditTrail;

pub use error::{GatewayError, GatewayResult};
pub use response::{ToolOutput, ToolResponse};
pub use scoped::ScopedHandler;
pub use write::{WriteReport, WriteRequest, CONFIRM_WRITE, NOT_WRITABLE};

/// Gateway service. Cloning is cheap and shares the audit trail.
#[derive(Clone)]
pub struct Gateway {
    source: Arc<dyn ConfigSource>,
    registry: Arc<HandlerRegistry>,
    audit: Arc<AuditTrail>,
}

impl Gateway {
    /// Builds a gateway; the audit section is read once, here.
    pub fn new(source: Arc<dyn ConfigSource>, registry: HandlerRegistry) -> GatewayResult<Self> {
        let config = source.load()?;
        let audit = Arc::new(AuditTrail::new(&config.audit));
        info!(
            connections = config.connections.len(),
            audit_enabled = audit.is_enabled(),
            audit_capacity = audit.capacity(),
            "Gateway initialized"
        );
        Ok(Self::with_audit(source, registry, audit))
    }

    /// Builds a gateway around an existing audit trail
    pub fn with_audit(
        source: Arc<dyn ConfigSource>,
        registry: HandlerRegistry,
        audit: Arc<AuditTrail>,
    ) -> Self {
        Self {
            source,
            registry: Arc::new(registry),
            audit,
        }
    }

    /// YAML file source with the SQLite, PostgreSQL and MySQL handlers
    pub fn from_yaml_file(path: impl Into<PathBuf>) -> GatewayResult<Self> {
        Self::new(
            Arc::new(YamlFileSource::new(path)),
            HandlerRegistry::with_default_drivers(),
        )
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Current configuration, freshly loaded
    pub fn config(&self) -> GatewayResult<GatewayConfig> {
        self.source.load()
    }

    /// Resolves a connection profile from the current configuration.
    pub fn profile(&self, connection: &str) -> GatewayResult<ConnectionProfile> {
        self.config()?.profile(connection)
    }

    /// Opens a scoped handler for a resolved profile.
    pub async fn acquire(&self, profile: &ConnectionProfile) -> GatewayResult<ScopedHandler> {
        ScopedHandler::acquire(&self.registry, profile).await
    }
}
