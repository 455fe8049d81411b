// SPDX-License-Identifier: Apache-2.0

//! Gateway configuration
//!
//! Connection profiles are kept as raw YAML until a tool invocation looks
//! one up by name. A malformed profile therefore only fails the calls that
//! use it, and edits to the file are seen on the next call.

pub mod loader;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;

use crate::engine::EngineKind;
use crate::gateway::error::{GatewayError, GatewayResult};
use crate::observability::Sensitive;

pub use loader::{load_config, load_config_from_str, ConfigSource, StaticSource, YamlFileSource};

/// Parsed configuration file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    /// Raw connection profiles keyed by name (case-sensitive)
    #[serde(default)]
    pub connections: BTreeMap<String, YamlValue>,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl GatewayConfig {
    pub fn connection_names(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }

    /// Resolves and validates one connection profile.
    pub fn profile(&self, name: &str) -> GatewayResult<ConnectionProfile> {
        let raw = self.connections.get(name).ok_or_else(|| {
            GatewayError::configuration(format!("Connection not found: {name}"))
        })?;

        let mut mapping = match raw {
            YamlValue::Mapping(mapping) => mapping.clone(),
            _ => {
                return Err(GatewayError::configuration(format!(
                    "Connection '{name}' must be a mapping"
                )))
            }
        };

        let kind = match mapping.get("type") {
            None | Some(YamlValue::Null) => {
                return Err(GatewayError::configuration(format!(
                    "Connection '{name}' is missing the required 'type' field"
                )))
            }
            Some(YamlValue::String(value)) => EngineKind::parse(value).ok_or_else(|| {
                GatewayError::configuration(format!(
                    "Unsupported database type '{value}' for connection '{name}'"
                ))
            })?,
            Some(_) => {
                return Err(GatewayError::configuration(format!(
                    "Connection '{name}' has a non-string 'type' field"
                )))
            }
        };

        mapping.insert("type".into(), kind.as_str().into());
        loader::resolve_profile_env_vars(&mut mapping);

        let mut profile: ConnectionProfile = serde_yaml::from_value(YamlValue::Mapping(mapping))
            .map_err(|e| {
                GatewayError::configuration(format!("Invalid configuration for connection '{name}': {e}"))
            })?;
        profile.name = name.to_string();
        Ok(profile)
    }
}

/// Named configuration describing how to reach one database and under
/// what write policy
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionProfile {
    #[serde(skip)]
    pub name: String,
    #[serde(flatten)]
    pub engine: EngineParams,
    #[serde(default)]
    pub writable: bool,
    #[serde(default)]
    pub write_permissions: Option<WritePermissions>,
}

impl ConnectionProfile {
    pub fn kind(&self) -> EngineKind {
        self.engine.kind()
    }

    /// Builds an in-memory profile without going through YAML.
    pub fn new(name: impl Into<String>, engine: EngineParams) -> Self {
        Self {
            name: name.into(),
            engine,
            writable: false,
            write_permissions: None,
        }
    }

    pub fn writable(mut self, permissions: Option<WritePermissions>) -> Self {
        self.writable = true;
        self.write_permissions = permissions;
        self
    }
}

/// Engine-specific connection parameters, discriminated by `type`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EngineParams {
    Sqlite(SqliteParams),
    Postgres(ServerParams),
    Mysql(ServerParams),
    Oracle(OracleParams),
}

impl EngineParams {
    pub fn kind(&self) -> EngineKind {
        match self {
            Self::Sqlite(_) => EngineKind::Sqlite,
            Self::Postgres(_) => EngineKind::Postgres,
            Self::Mysql(_) => EngineKind::Mysql,
            Self::Oracle(_) => EngineKind::Oracle,
        }
    }

    /// Short description for connection listings. Never includes secrets.
    pub fn location(&self) -> String {
        match self {
            Self::Sqlite(p) => p.path.clone(),
            Self::Postgres(p) | Self::Mysql(p) => p.location(),
            Self::Oracle(p) => {
                let base = p.server.location();
                match &p.service_name {
                    Some(service) => format!("{base} (service {service})"),
                    None => base,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqliteParams {
    /// Database file path, or `:memory:`
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerParams {
    /// Full connection URL; takes precedence over the discrete fields
    #[serde(default)]
    pub url: Option<Sensitive<String>>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "dbname")]
    pub database: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<Sensitive<String>>,
    /// PostgreSQL schema used for introspection (default `public`)
    #[serde(default)]
    pub schema: Option<String>,
}

impl ServerParams {
    fn location(&self) -> String {
        if self.url.is_some() && self.host.is_none() {
            return "<url>".to_string();
        }
        let host = self.host.as_deref().unwrap_or("localhost");
        let database = self.database.as_deref().unwrap_or("default");
        match self.port {
            Some(port) => format!("{host}:{port}/{database}"),
            None => format!("{host}/{database}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleParams {
    #[serde(flatten)]
    pub server: ServerParams,
    #[serde(default)]
    pub service_name: Option<String>,
}

/// Table/operation allow-list plus a default rule for unconfigured tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WritePermissions {
    #[serde(default)]
    pub default_policy: DefaultPolicy,
    /// Table name (matched case-insensitively) to allowed operations
    #[serde(default)]
    pub tables: BTreeMap<String, TablePermission>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultPolicy {
    #[default]
    ReadOnly,
    AllowAll,
    /// Any value other than the two above; treated as read-only
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TablePermission {
    #[serde(default)]
    pub operations: Vec<String>,
}

/// Audit trail settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub file_storage: FileStorageConfig,
    #[serde(default)]
    pub content: AuditContentConfig,
    #[serde(default)]
    pub memory_buffer: MemoryBufferConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file_storage: FileStorageConfig::default(),
            content: AuditContentConfig::default(),
            memory_buffer: MemoryBufferConfig::default(),
        }
    }
}

/// Durable JSON Lines sink with size-based rotation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStorageConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_backup_count")]
    pub backup_count: usize,
}

impl Default for FileStorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_audit_path(),
            max_file_size: default_max_file_size(),
            backup_count: default_backup_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditContentConfig {
    #[serde(default = "default_true")]
    pub sanitize_sql: bool,
    #[serde(default = "default_true")]
    pub include_user_context: bool,
}

impl Default for AuditContentConfig {
    fn default() -> Self {
        Self {
            sanitize_sql: true,
            include_user_context: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryBufferConfig {
    #[serde(default = "default_buffer_size")]
    pub size: usize,
}

impl Default for MemoryBufferConfig {
    fn default() -> Self {
        Self {
            size: default_buffer_size(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("logs/audit")
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_backup_count() -> usize {
    10
}

fn default_buffer_size() -> usize {
    1000
}
