//! Gateway configuration
//!
//! Sources, lowest precedence first: built-in defaults, an optional file
//! (`rebac.toml`, `.yaml` or `.json`, or an explicit path), then environment
//! variables such as `REBAC_ENGINE__ENDPOINT` or `REBAC_HIERARCHY__MAX_NODES`.

use crate::{
    error::{RebacError, Result},
    models::{CaveatPolicy, ResourceType},
};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL of the engine's HTTP API
    pub endpoint: String,
    /// Pre-shared bearer token
    pub token: String,
    /// Upper bound for a single engine call
    pub call_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8443".to_string(),
            token: String::new(),
            call_timeout_ms: 5_000,
        }
    }
}

impl EngineConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    /// Resources of this type never look for parents
    pub root_resource_type: ResourceType,
    /// Most nodes one traversal may expand
    pub max_nodes: usize,
    /// Wall-clock budget for one hierarchy query
    pub deadline_ms: u64,
    /// Concurrent `read` checks on sibling children
    pub check_concurrency: usize,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            root_resource_type: ResourceType::Dataverse,
            max_nodes: 10_000,
            deadline_ms: 30_000,
            check_concurrency: 8,
        }
    }
}

impl HierarchyConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub engine: EngineConfig,
    pub hierarchy: HierarchyConfig,
    pub caveats: Vec<CaveatPolicy>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            hierarchy: HierarchyConfig::default(),
            caveats: CaveatPolicy::builtin(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("rebac").required(false),
        };

        let config: GatewayConfig = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("REBAC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.endpoint.trim().is_empty() {
            return Err(RebacError::Config("engine.endpoint is empty".to_string()));
        }
        if self.engine.call_timeout_ms == 0 {
            return Err(RebacError::Config("engine.call_timeout_ms must be positive".to_string()));
        }
        if self.hierarchy.max_nodes == 0 || self.hierarchy.deadline_ms == 0 {
            return Err(RebacError::Config(
                "hierarchy limits must be positive".to_string(),
            ));
        }
        if self.hierarchy.check_concurrency == 0 {
            return Err(RebacError::Config(
                "hierarchy.check_concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.hierarchy.root_resource_type, ResourceType::Dataverse);
        assert!(config.caveats.iter().any(|policy| policy.name == "password_match"));
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config: GatewayConfig = serde_json::from_value(serde_json::json!({
            "engine": {"endpoint": "http://spicedb:8443"},
            "hierarchy": {"root_resource_type": "folder"}
        }))
        .unwrap();

        assert_eq!(config.engine.endpoint, "http://spicedb:8443");
        assert_eq!(config.engine.call_timeout_ms, 5_000);
        assert_eq!(config.hierarchy.root_resource_type, ResourceType::Folder);
        assert_eq!(config.hierarchy.max_nodes, 10_000);
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = GatewayConfig::default();
        config.hierarchy.max_nodes = 0;
        assert!(matches!(config.validate(), Err(RebacError::Config(_))));
    }
}
