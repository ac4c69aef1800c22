use crate::error::RelgraphError;
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::PathBuf,
};

/// Tunables for [crate::graph::Graph] and [crate::cache::Cache].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Reject non-polymorphic assignments of an unrelated type instead of warning and registering
    /// the pair as polymorphic equivalents.
    pub strict_polymorphism: bool,
    /// Emit an advisory when a sync relationship receives links without data.
    pub warn_on_link_only_sync: bool,
    /// Tombstoned resources are cleared once more than this many accumulate.
    pub tombstone_capacity: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            strict_polymorphism: false,
            warn_on_link_only_sync: true,
            tombstone_capacity: 256,
        }
    }
}

impl GraphConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, RelgraphError> {
        let config: GraphConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RelgraphError> {
        if self.tombstone_capacity == 0 {
            return Err(RelgraphError::Config(
                "tombstone_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

pub trait ConfigProvider: Send + Sync {
    fn get_config(&self) -> Result<GraphConfig, RelgraphError>;
    fn set_config(&self, config: &GraphConfig) -> Result<(), RelgraphError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn get_config(&self) -> Result<GraphConfig, RelgraphError> {
        tracing::debug!("Attempting to read graph config from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(GraphConfig::default());
        }
        GraphConfig::from_toml_str(&read_to_string(&self.path)?)
    }

    fn set_config(&self, config: &GraphConfig) -> Result<(), RelgraphError> {
        tracing::debug!("Attempting to write graph config to: {:?}", &self.path);
        config.validate()?;
        let toml_string = toml::to_string(config)?;
        write(&self.path, toml_string)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let provider = TomlConfigProvider::new(dir.path().join("relgraph.toml"));
        assert_eq!(provider.get_config().unwrap(), GraphConfig::default());
    }

    #[test]
    fn test_config_persists() {
        let dir = TempDir::new().unwrap();
        let provider = TomlConfigProvider::new(dir.path().join("relgraph.toml"));
        let config = GraphConfig {
            strict_polymorphism: true,
            warn_on_link_only_sync: false,
            tombstone_capacity: 8,
        };
        provider.set_config(&config).unwrap();
        assert_eq!(provider.get_config().unwrap(), config);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config = GraphConfig::from_toml_str("strict_polymorphism = true").unwrap();
        assert!(config.strict_polymorphism);
        assert_eq!(config.tombstone_capacity, 256);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = GraphConfig::from_toml_str("tombstone_capacity = 0").unwrap_err();
        assert!(err.is_configuration());
    }
}
