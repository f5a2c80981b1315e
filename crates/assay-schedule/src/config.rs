//! Configuration for scheduling and manifest conductors
//!
//! [`AssayConfig`] is read from TOML:
//!
//! ```toml
//! [scheduler]
//! max_concurrency = 4
//! resource_timeout_ms = 2000
//!
//! [environment.shared]
//! clock = "utc"
//!
//! [environment.exclusive]
//! stage = { axes = 2 }
//!
//! [[conductors]]
//! id = "chamber"
//! prepares = [{ id = "vacuum", evaluation = "ordered" }]
//!
//! [[conductors]]
//! id = "acquire"
//! requires = { production = "vacuum" }
//! resources = ["stage"]
//! observes = [{ id = "spectrum" }]
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use assay_declaration::Evaluation;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum instructions conducted at the same time
    pub max_concurrency: usize,
    /// Time allowed to acquire a step's exclusive resources
    pub resource_timeout_ms: u64,
    /// Capacity of each event subscription
    pub event_buffer: usize,
}

impl SchedulerConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With max concurrency
    #[inline]
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// With resource acquisition timeout
    #[inline]
    #[must_use]
    pub fn with_resource_timeout(mut self, timeout: Duration) -> Self {
        self.resource_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With event subscription capacity
    #[inline]
    #[must_use]
    pub fn with_event_buffer(mut self, buffer: usize) -> Self {
        self.event_buffer = buffer;
        self
    }

    /// Resource acquisition timeout
    #[inline]
    #[must_use]
    pub fn resource_timeout(&self) -> Duration {
        Duration::from_millis(self.resource_timeout_ms)
    }

    /// Check limits
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if concurrency or event buffer is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be at least 1".into()));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid("event_buffer must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            resource_timeout_ms: 2000,
            event_buffer: 256,
        }
    }
}

/// Resources offered by the environment, by provision id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub shared: BTreeMap<String, Value>,
    pub exclusive: BTreeMap<String, Value>,
}

/// Condition prepared by a manifest conductor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedCondition {
    pub id: String,
    #[serde(default)]
    pub evaluation: Evaluation,
}

/// Result observed by a manifest conductor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedResult {
    pub id: String,
    #[serde(default)]
    pub multiple: bool,
}

/// Requirement of a manifest conductor on its parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRequirement {
    pub production: String,
    #[serde(default)]
    pub multiple: bool,
}

/// Lazily resolved requirement of a manifest conductor
///
/// The dependency paths are read from the named instruction variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalManifest {
    pub production: String,
    pub variable: String,
}

/// Conductor declared in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConductorManifest {
    pub id: String,
    #[serde(default)]
    pub prepares: Vec<PreparedCondition>,
    #[serde(default)]
    pub observes: Vec<ObservedResult>,
    #[serde(default)]
    pub requires: Option<ParentRequirement>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub additional: Vec<AdditionalManifest>,
}

/// Complete assay configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssayConfig {
    pub scheduler: SchedulerConfig,
    pub environment: EnvironmentConfig,
    pub conductors: Vec<ConductorManifest>,
}

impl AssayConfig {
    /// Parse from TOML text
    ///
    /// # Errors
    /// - [`ConfigError::Parse`] for malformed TOML
    /// - [`ConfigError::Invalid`] for out-of-range scheduler settings
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.scheduler.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise see
    /// [`AssayConfig::from_toml_str`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), conductors = config.conductors.len(), "loaded configuration");
        Ok(config)
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed TOML
    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Inconsistent settings
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"
        [scheduler]
        max_concurrency = 2

        [environment.shared]
        clock = "utc"

        [environment.exclusive]
        stage = { axes = 2 }

        [[conductors]]
        id = "chamber"
        prepares = [{ id = "vacuum", evaluation = "ordered" }]

        [[conductors]]
        id = "acquire"
        requires = { production = "vacuum" }
        resources = ["stage"]
        observes = [{ id = "spectrum", multiple = true }]
        additional = [{ production = "spectrum", variable = "references" }]
    "#;

    #[test]
    fn defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.resource_timeout(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder() {
        let config = SchedulerConfig::new()
            .with_max_concurrency(1)
            .with_resource_timeout(Duration::from_millis(150))
            .with_event_buffer(8);
        assert_eq!(config.resource_timeout_ms, 150);
        assert_eq!(config.event_buffer, 8);
    }

    #[test]
    fn parse_sample() {
        let config = AssayConfig::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.scheduler.max_concurrency, 2);
        assert_eq!(config.scheduler.resource_timeout_ms, 2000);
        assert_eq!(config.environment.exclusive["stage"], json!({ "axes": 2 }));
        assert_eq!(config.conductors.len(), 2);
        assert_eq!(config.conductors[0].prepares[0].evaluation, Evaluation::Ordered);
        assert!(config.conductors[1].observes[0].multiple);
        assert_eq!(config.conductors[1].additional[0].variable, "references");
    }

    #[test]
    fn zero_concurrency_rejected() {
        let result = AssayConfig::from_toml_str("[scheduler]\nmax_concurrency = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn malformed_rejected() {
        assert!(matches!(
            AssayConfig::from_toml_str("[scheduler"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_missing_file() {
        let result = AssayConfig::load("/definitely/not/here.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
