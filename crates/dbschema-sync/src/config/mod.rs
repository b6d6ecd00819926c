//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 hash of the configuration, logged at startup.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl TargetConfig {
    /// Connection string for tokio-postgres.
    pub fn postgres_connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={}",
            self.host,
            self.port_or_default(),
            self.database,
            self.user,
            self.password
        )
    }

    /// Human-readable target description without credentials.
    pub fn describe(&self) -> String {
        match (&self.path, &self.connection_string) {
            (Some(path), _) => format!("{} at {}", self.r#type, path),
            (None, Some(_)) => format!("{} via ODBC", self.r#type),
            (None, None) => format!(
                "{} at {}:{}/{}",
                self.r#type,
                self.host,
                self.port_or_default(),
                self.database
            ),
        }
    }
}
