//! Configuration loader

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value as YamlValue};
use tracing::debug;

use super::GatewayConfig;
use crate::gateway::error::{GatewayError, GatewayResult};

/// Source of the current configuration, consulted on every tool invocation
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> GatewayResult<GatewayConfig>;
}

/// Re-reads a YAML file on every `load()`, so edits apply to the next call
#[derive(Debug, Clone)]
pub struct YamlFileSource {
    path: PathBuf,
}

impl YamlFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for YamlFileSource {
    fn load(&self) -> GatewayResult<GatewayConfig> {
        load_config(&self.path)
    }
}

/// Fixed in-memory configuration
#[derive(Debug, Clone)]
pub struct StaticSource {
    config: GatewayConfig,
}

impl StaticSource {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }
}

impl ConfigSource for StaticSource {
    fn load(&self) -> GatewayResult<GatewayConfig> {
        Ok(self.config.clone())
    }
}

/// Load configuration from a YAML file
pub fn load_config(path: &Path) -> GatewayResult<GatewayConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        GatewayError::configuration(format!(
            "Failed to read configuration file {}: {e}",
            path.display()
        ))
    })?;
    load_config_from_str(&contents)
}

/// Load configuration from a YAML string
pub fn load_config_from_str(yaml: &str) -> GatewayResult<GatewayConfig> {
    let config: GatewayConfig = serde_yaml::from_str(yaml)
        .map_err(|e| GatewayError::configuration(format!("Failed to parse configuration: {e}")))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &GatewayConfig) -> GatewayResult<()> {
    if config.audit.memory_buffer.size == 0 {
        return Err(GatewayError::configuration(
            "audit.memory_buffer.size must be greater than zero",
        ));
    }
    if config.audit.file_storage.enabled && config.audit.file_storage.max_file_size == 0 {
        return Err(GatewayError::configuration(
            "audit.file_storage.max_file_size must be greater than zero",
        ));
    }
    Ok(())
}

/// Resolve environment variable references in a config value.
///
/// Supports:
/// - `${VAR_NAME}` - standard syntax
/// - `$VAR_NAME` - simple syntax (whole value must be the variable reference)
///
/// If the environment variable is not set, the original value is preserved.
fn resolve_env_var(value: &str) -> String {
    let var_name = if value.starts_with("${") && value.ends_with('}') && value.len() > 3 {
        &value[2..value.len() - 1]
    } else if value.starts_with('$') && value.len() > 1 && !value.contains(char::is_whitespace) {
        &value[1..]
    } else {
        return value.to_string();
    };

    match std::env::var(var_name) {
        Ok(env_value) => {
            debug!("Resolved env var {} from config", var_name);
            env_value
        }
        Err(_) => {
            debug!("Env var {} not set, keeping original value", var_name);
            value.to_string()
        }
    }
}

/// Resolves env references in the top-level string fields of a profile.
pub(crate) fn resolve_profile_env_vars(profile: &mut Mapping) {
    for (key, value) in profile.iter_mut() {
        if key.as_str() == Some("type") {
            continue;
        }
        if let YamlValue::String(s) = value {
            *s = resolve_env_var(s);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal_config() {
        let config = load_config_from_str("connections: {}\n").unwrap();
        assert!(config.connections.is_empty());
        assert!(config.audit.enabled);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = load_config_from_str("{}").unwrap();
        assert_eq!(config.connection_names().count(), 0);
    }

    #[test]
    fn test_rejects_zero_buffer() {
        let yaml = "audit:\n  memory_buffer:\n    size: 0\n";
        let err = load_config_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("memory_buffer.size"));
    }

    #[test]
    fn test_invalid_yaml_is_configuration_error() {
        let err = load_config_from_str("connections: [unclosed").unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
    }

    #[test]
    fn test_resolve_env_var_syntaxes() {
        std::env::set_var("SQLGATE_TEST_LOADER_PW", "s3cret");
        assert_eq!(resolve_env_var("${SQLGATE_TEST_LOADER_PW}"), "s3cret");
        assert_eq!(resolve_env_var("$SQLGATE_TEST_LOADER_PW"), "s3cret");
        assert_eq!(resolve_env_var("plain"), "plain");
        assert_eq!(
            resolve_env_var("${SQLGATE_TEST_LOADER_UNSET}"),
            "${SQLGATE_TEST_LOADER_UNSET}"
        );
    }

    #[test]
    fn test_profile_lookup_resolves_env() {
        std::env::set_var("SQLGATE_TEST_LOADER_HOST", "pg.internal");
        let yaml = r#"
connections:
  pg:
    type: postgres
    host: ${SQLGATE_TEST_LOADER_HOST}
    port: 5432
    dbname: app
"#;
        let profile = load_config_from_str(yaml).unwrap().profile("pg").unwrap();
        assert_eq!(profile.engine.location(), "pg.internal:5432/app");
    }

    #[test]
    fn test_file_source_rereads_on_every_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "connections:\n  a:\n    type: sqlite\n    path: a.db\n").unwrap();

        let source = YamlFileSource::new(&path);
        assert_eq!(source.load().unwrap().connection_names().count(), 1);

        std::fs::write(
            &path,
            "connections:\n  a:\n    type: sqlite\n    path: a.db\n  b:\n    type: sqlite\n    path: b.db\n",
        )
        .unwrap();
        assert_eq!(source.load().unwrap().connection_names().count(), 2);
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/sqlgate.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read configuration file"));
    }
}
