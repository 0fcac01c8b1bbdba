//! `modelgrid.toml` configuration.
//!
//! ```toml
//! [daemon]
//! port = 7400
//! data_dir = "/var/lib/modelgrid"
//!
//! [collaborators]
//! embedding_url = "http://embed:8501"
//! webhook_url = "http://chat/hooks/abc"
//!
//! [[service]]
//! name = "support-intent"
//! [service.drift]
//! threshold = 0.12
//! [service.canary]
//! stages = [10, 50, 100]
//! ```
//!
//! Every section and field has a default; only `service.name` is required.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use modelgrid_core::RetryPolicy;
use modelgrid_drift::DriftConfig;
use modelgrid_eval::PromotionPolicy;
use modelgrid_remote::RemoteConfig;
use modelgrid_retrain::RetrainConfig;
use modelgrid_rollout::CanaryConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelgridConfig {
    pub daemon: DaemonConfig,
    pub collaborators: RemoteConfig,
    #[serde(rename = "service")]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// REST API port.
    pub port: u16,
    /// Directory holding the state database.
    pub data_dir: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: 7400,
            data_dir: PathBuf::from("./modelgrid-data"),
        }
    }
}

/// One managed service and the settings of its control loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default)]
    pub drift: DriftConfig,
    #[serde(default)]
    pub retrain: RetrainConfig,
    #[serde(default)]
    pub policy: PromotionPolicy,
    #[serde(default)]
    pub canary: CanaryConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl ServiceConfig {
    /// A service with every setting at its default.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            drift: DriftConfig::default(),
            retrain: RetrainConfig::default(),
            policy: PromotionPolicy::default(),
            canary: CanaryConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let name = &self.name;
        let invalid = |msg: String| ConfigError::Invalid(format!("service {name:?}: {msg}"));

        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::Invalid(format!(
                "service name {name:?} must be non-empty and use only [A-Za-z0-9_-]"
            )));
        }
        if !(self.drift.threshold.is_finite() && self.drift.threshold > 0.0) {
            return Err(invalid(format!(
                "drift threshold must be > 0, got {}",
                self.drift.threshold
            )));
        }
        if self.drift.batch_size == 0 {
            return Err(invalid("drift batch_size must be > 0".into()));
        }
        if self.drift.interval.as_duration().is_zero() {
            return Err(invalid("drift interval must be > 0".into()));
        }
        if self.retry.attempts == 0 {
            return Err(invalid("retry attempts must be >= 1".into()));
        }
        self.retrain.validate().map_err(|e| invalid(e.to_string()))?;
        self.policy.validate().map_err(|e| invalid(e.to_string()))?;
        self.canary.validate().map_err(|e| invalid(e.to_string()))?;
        Ok(())
    }
}

impl ModelgridConfig {
    /// Read, parse and validate a configuration file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse and validate configuration text.
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: ModelgridConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.services.is_empty() {
            return Err(ConfigError::Invalid("no [[service]] configured".into()));
        }
        let mut seen = HashSet::new();
        for service in &self.services {
            if !seen.insert(service.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate service name {:?}",
                    service.name
                )));
            }
            service.validate()?;
        }
        Ok(())
    }

    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }
}
