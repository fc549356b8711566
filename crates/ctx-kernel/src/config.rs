//! Engine configuration

use std::path::Path;

use ctx_props::MergePolicy;
use serde::{Deserialize, Serialize};

/// Root property that overrides [`EngineConfig::service_group_timeout_ms`]
pub const TIMEOUT_PROPERTY: &str = "ConfigContextTimeoutInterval";

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid TOML for this schema
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Idle time after which a session-scoped group context is evicted
    pub service_group_timeout_ms: u64,
    /// How restored properties combine with a live node's
    pub merge_policy: MergePolicy,
    /// Keep a reference to each service context's latest operation context
    pub cache_last_operation_context: bool,
    /// `tracing` filter used when no `RUST_LOG` is set
    pub log_filter: String,
    /// Emit JSON log lines
    pub log_json: bool,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With idle timeout
    #[inline]
    #[must_use]
    pub fn with_service_group_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.service_group_timeout_ms = timeout_ms;
        self
    }

    /// With merge policy
    #[inline]
    #[must_use]
    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    /// With last-operation caching
    #[inline]
    #[must_use]
    pub fn with_last_operation_cache(mut self, enabled: bool) -> Self {
        self.cache_last_operation_context = enabled;
        self
    }

    /// With log filter
    #[inline]
    #[must_use]
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// With JSON log lines
    #[inline]
    #[must_use]
    pub fn with_log_json(mut self, enabled: bool) -> Self {
        self.log_json = enabled;
        self
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// Returns [`ConfigError::Toml`] for malformed input
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service_group_timeout_ms: 30_000,
            merge_policy: MergePolicy::KeepExisting,
            cache_last_operation_context: false,
            log_filter: "info".to_string(),
            log_json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            service_group_timeout_ms = 500
            merge_policy = "overwrite"
            "#,
        )
        .unwrap();
        assert_eq!(config.service_group_timeout_ms, 500);
        assert_eq!(config.merge_policy, MergePolicy::Overwrite);
        assert_eq!(config.log_filter, "info");
        assert!(!config.cache_last_operation_context);
    }

    #[test]
    fn test_unknown_policy_rejected() {
        assert!(matches!(
            EngineConfig::from_toml_str("merge_policy = \"sometimes\""),
            Err(ConfigError::Toml(_))
        ));
    }
}
