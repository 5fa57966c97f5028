//! Lifecycle configuration
//!
//! Durations are stored as whole seconds so the file format stays plain
//! TOML. Missing keys fall back to the defaults.

use crate::error::PreviewError;
use crate::types::is_identifier;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Longest duration any setting may hold: ten years
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Preview lifecycle configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Hard TTL from creation, never extended
    pub session_ttl_secs: u64,
    /// Inactivity after which a ready schema is dropped
    pub idle_timeout_secs: u64,
    /// Time in provisioning after which a session counts as stuck
    pub stuck_threshold_secs: u64,
    /// Period of the cleanup sweeper
    pub sweep_interval_secs: u64,
    /// Upper bound on features per session
    pub max_features: usize,
    /// Prefix of generated schema names
    pub schema_prefix: String,
}

impl PreviewConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With session TTL
    #[inline]
    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl_secs = ttl.as_secs();
        self
    }

    /// With idle timeout
    #[inline]
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_secs = timeout.as_secs();
        self
    }

    /// With stuck-provisioning threshold
    #[inline]
    #[must_use]
    pub fn with_stuck_threshold(mut self, threshold: Duration) -> Self {
        self.stuck_threshold_secs = threshold.as_secs();
        self
    }

    /// With sweep interval
    #[inline]
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_secs = interval.as_secs();
        self
    }

    /// With max features per session
    #[inline]
    #[must_use]
    pub fn with_max_features(mut self, max: usize) -> Self {
        self.max_features = max;
        self
    }

    /// With schema name prefix
    #[inline]
    #[must_use]
    pub fn with_schema_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.schema_prefix = prefix.into();
        self
    }

    /// Session TTL as chrono duration
    #[must_use]
    pub fn session_ttl(&self) -> chrono::Duration {
        secs(self.session_ttl_secs)
    }

    /// Idle timeout as chrono duration
    #[must_use]
    pub fn idle_timeout(&self) -> chrono::Duration {
        secs(self.idle_timeout_secs)
    }

    /// Stuck threshold as chrono duration
    #[must_use]
    pub fn stuck_threshold(&self) -> chrono::Duration {
        secs(self.stuck_threshold_secs)
    }

    /// Sweep interval
    #[inline]
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.min(MAX_DURATION_SECS))
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    /// `PreviewError::Config` describing the first problem found
    pub fn validate(&self) -> Result<(), PreviewError> {
        let durations = [
            ("session_ttl_secs", self.session_ttl_secs),
            ("idle_timeout_secs", self.idle_timeout_secs),
            ("stuck_threshold_secs", self.stuck_threshold_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
        ];
        for (key, value) in durations {
            if value == 0 {
                return Err(PreviewError::Config(format!("{key} must be positive")));
            }
            if value > MAX_DURATION_SECS {
                return Err(PreviewError::Config(format!(
                    "{key} ({value}) exceeds the maximum of {MAX_DURATION_SECS}"
                )));
            }
        }

        if self.idle_timeout_secs >= self.session_ttl_secs {
            return Err(PreviewError::Config(format!(
                "idle_timeout_secs ({}) must be shorter than session_ttl_secs ({})",
                self.idle_timeout_secs, self.session_ttl_secs
            )));
        }

        if self.max_features == 0 {
            return Err(PreviewError::Config("max_features must be positive".into()));
        }

        // Leave room for the 26-char ULID suffix.
        if !is_identifier(&format!("{}{}", self.schema_prefix, "0".repeat(26))) {
            return Err(PreviewError::Config(format!(
                "schema_prefix '{}' does not form a valid schema identifier",
                self.schema_prefix
            )));
        }

        Ok(())
    }

    /// Parse and validate TOML text
    ///
    /// # Errors
    /// `PreviewError::Config` on syntax or validation failure
    pub fn from_toml_str(text: &str) -> Result<Self, PreviewError> {
        let config: Self =
            toml::from_str(text).map_err(|e| PreviewError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// `PreviewError::Config` if the file cannot be read or is invalid
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PreviewError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PreviewError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// `PreviewError::Config` if serialization fails
    pub fn to_toml_string(&self) -> Result<String, PreviewError> {
        toml::to_string_pretty(self).map_err(|e| PreviewError::Config(e.to_string()))
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 2 * 60 * 60,
            idle_timeout_secs: 30 * 60,
            stuck_threshold_secs: 5 * 60,
            sweep_interval_secs: 60 * 60,
            max_features: 32,
            schema_prefix: "preview_".to_string(),
        }
    }
}

// Unvalidated configs are clamped rather than overflowing chrono.
fn secs(value: u64) -> chrono::Duration {
    let clamped = i64::try_from(value.min(MAX_DURATION_SECS)).unwrap_or(i64::MAX);
    chrono::Duration::seconds(clamped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PreviewConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.idle_timeout(), chrono::Duration::minutes(30));
        assert_eq!(config.stuck_threshold(), chrono::Duration::minutes(5));
        assert_eq!(config.sweep_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn rejects_zero_durations() {
        let config = PreviewConfig::new().with_stuck_threshold(Duration::ZERO);
        assert!(matches!(config.validate(), Err(PreviewError::Config(_))));
    }

    #[test]
    fn rejects_durations_beyond_ten_years() {
        for ttl in ["9000000000000000000", "1000000000000000"] {
            let err = PreviewConfig::from_toml_str(&format!("session_ttl_secs = {ttl}\n"))
                .unwrap_err();
            assert!(err.to_string().contains("session_ttl_secs"), "{err}");
        }
        let err = PreviewConfig::from_toml_str("sweep_interval_secs = 1000000000000000\n")
            .unwrap_err();
        assert!(matches!(err, PreviewError::Config(_)));

        let at_limit = format!("session_ttl_secs = {MAX_DURATION_SECS}\n");
        assert!(PreviewConfig::from_toml_str(&at_limit).is_ok());
    }

    #[test]
    fn accessors_clamp_unvalidated_durations() {
        let config = PreviewConfig {
            session_ttl_secs: u64::MAX,
            stuck_threshold_secs: 9_000_000_000_000_000_000,
            sweep_interval_secs: u64::MAX,
            ..PreviewConfig::default()
        };
        let limit = i64::try_from(MAX_DURATION_SECS).unwrap();
        assert_eq!(config.session_ttl(), chrono::Duration::seconds(limit));
        assert_eq!(config.stuck_threshold(), chrono::Duration::seconds(limit));
        assert_eq!(config.sweep_interval(), Duration::from_secs(MAX_DURATION_SECS));
    }

    #[test]
    fn rejects_idle_not_shorter_than_ttl() {
        let config = PreviewConfig::new()
            .with_session_ttl(Duration::from_secs(600))
            .with_idle_timeout(Duration::from_secs(600));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("idle_timeout_secs"));
    }

    #[test]
    fn rejects_bad_prefix() {
        let config = PreviewConfig::new().with_schema_prefix("Preview-");
        assert!(config.validate().is_err());
        let config = PreviewConfig::new().with_schema_prefix("p".repeat(40));
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config = PreviewConfig::from_toml_str("max_features = 4\n").unwrap();
        assert_eq!(config.max_features, 4);
        assert_eq!(config.session_ttl_secs, 7200);
    }

    #[test]
    fn toml_round_trip_keeps_values() {
        let config = PreviewConfig::new().with_max_features(12);
        let text = config.to_toml_string().unwrap();
        assert_eq!(PreviewConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.toml");
        std::fs::write(&path, "idle_timeout_secs = 900\n").unwrap();
        let config = PreviewConfig::load(&path).unwrap();
        assert_eq!(config.idle_timeout_secs, 900);

        assert!(PreviewConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
