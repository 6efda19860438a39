//! Engine configuration.
//!
//! Layered: built-in defaults, then an optional YAML file, then
//! `STEPWISE_*` environment variables, later layers winning.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::models::SubtaskBlueprint;
use crate::services::engine::EngineSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root directory task folders are created under.
    pub workspace_root: PathBuf,
    /// Marker a user message must contain to count as an approval.
    pub approval_marker: String,
    /// Plan applied to CreateTask commands that carry none.
    #[serde(default)]
    pub default_plan: Vec<SubtaskBlueprint>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("./workspace"),
            approval_marker: "APPROVE".to_string(),
            default_plan: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with environment variables only.
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = Self::figment(None).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then the YAML file, then environment variables.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(Some(path.as_ref())).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed("STEPWISE_"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.approval_marker.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "approval_marker must not be empty".to_string(),
            ));
        }
        if self.workspace_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "workspace_root must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            approval_marker: self.approval_marker.clone(),
            default_plan: self.default_plan.clone(),
        }
    }
}
