//! Handler Registry
//!
//! Maps each engine kind to the constructor of its backend handler.
//! Handlers are built per invocation; nothing is cached here.

use std::collections::HashMap;

use crate::config::ConnectionProfile;
use crate::engine::drivers::{MysqlHandler, PostgresHandler, SqliteHandler};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::traits::BackendHandler;
use crate::engine::types::EngineKind;

/// Builds an unopened handler for a resolved profile
pub type HandlerConstructor = fn(&ConnectionProfile) -> EngineResult<Box<dyn BackendHandler>>;

/// Registry that holds the handler constructor for each engine
pub struct HandlerRegistry {
    constructors: HashMap<EngineKind, HandlerConstructor>,
}

impl HandlerRegistry {
    /// Creates a new empty registry
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with the SQLite, PostgreSQL and MySQL handlers.
    ///
    /// Oracle profiles are accepted by the configuration but have no
    /// handler, so acquiring one fails with a configuration error.
    pub fn with_default_drivers() -> Self {
        let mut registry = Self::new();
        registry.register(EngineKind::Sqlite, SqliteHandler::boxed);
        registry.register(EngineKind::Postgres, PostgresHandler::boxed);
        registry.register(EngineKind::Mysql, MysqlHandler::boxed);
        registry
    }

    /// Registers (or replaces) the constructor for an engine
    pub fn register(&mut self, kind: EngineKind, constructor: HandlerConstructor) {
        self.constructors.insert(kind, constructor);
    }

    pub fn supports(&self, kind: EngineKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// Lists registered engines in a stable order
    pub fn list(&self) -> Vec<EngineKind> {
        let mut kinds: Vec<EngineKind> = self.constructors.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Builds the handler for a profile. Does not open a connection.
    pub fn build(&self, profile: &ConnectionProfile) -> EngineResult<Box<dyn BackendHandler>> {
        let kind = profile.kind();
        let constructor = self.constructors.get(&kind).ok_or_else(|| {
            EngineError::not_supported(format!(
                "No handler available for engine '{kind}' (connection '{}')",
                profile.name
            ))
        })?;
        constructor(profile)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_default_drivers()
    }
}
