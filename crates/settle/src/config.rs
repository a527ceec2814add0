//! Harness Configuration
//!
//! Numeric bounds and behavior switches for the fake-async harness. Values
//! can come from code (builder), a YAML or JSON file, or `SETTLE_*`
//! environment variables.

use crate::result::SettleResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default wall-clock timeout for a spec
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Maximum drain passes for `flush_pending_work`
pub const DEFAULT_FLUSH_LIMIT: usize = 20;
/// Maximum one-shot timers fired by the bootstrap flush
pub const DEFAULT_BOOTSTRAP_FLUSH_LIMIT: usize = 1000;
/// Maximum microtask turns in a single drain
pub const DEFAULT_MICROTASK_LIMIT: usize = 10_000;
/// Delay used for animation-frame callbacks
pub const DEFAULT_ANIMATION_FRAME_MS: u64 = 16;

/// Configuration for a `TestContext`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    /// Wall-clock timeout for a spec (milliseconds)
    pub default_timeout_ms: u64,
    /// Drain-pass bound of `flush_pending_work`
    pub flush_limit: usize,
    /// One-shot bound of the flush that follows bootstrap
    pub bootstrap_flush_limit: usize,
    /// Turn bound of a microtask drain
    pub microtask_limit: usize,
    /// Animation frame delay (milliseconds)
    pub animation_frame_ms: u64,
    /// Emit the broken-spec unsettled warning once per context
    pub warn_unsettled_once: bool,
    /// Run change detection after platform tasks
    pub auto_detect_changes: bool,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            flush_limit: DEFAULT_FLUSH_LIMIT,
            bootstrap_flush_limit: DEFAULT_BOOTSTRAP_FLUSH_LIMIT,
            microtask_limit: DEFAULT_MICROTASK_LIMIT,
            animation_frame_ms: DEFAULT_ANIMATION_FRAME_MS,
            warn_unsettled_once: true,
            auto_detect_changes: true,
        }
    }
}

impl SettleConfig {
    /// Create a new builder
    #[must_use]
    pub fn builder() -> SettleConfigBuilder {
        SettleConfigBuilder::default()
    }

    /// Parse from YAML text; missing keys keep their defaults
    ///
    /// # Errors
    ///
    /// Returns error if the YAML is malformed
    pub fn from_yaml_str(text: &str) -> SettleResult<Self> {
        Ok(serde_yaml_ng::from_str(text)?)
    }

    /// Parse from JSON text; missing keys keep their defaults
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed
    pub fn from_json_str(text: &str) -> SettleResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> SettleResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text)?,
            _ => Self::from_yaml_str(&text)?,
        };
        tracing::debug!(path = %path.display(), "loaded settle config");
        Ok(config)
    }

    /// Apply `SETTLE_FLUSH_LIMIT` and `SETTLE_TIMEOUT_MS` overrides
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(limit) = lookup("SETTLE_FLUSH_LIMIT").and_then(|v| v.parse().ok()) {
            self.flush_limit = limit;
        }
        if let Some(ms) = lookup("SETTLE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.default_timeout_ms = ms;
        }
        if let Some(once) = lookup("SETTLE_WARN_ONCE").and_then(|v| v.parse().ok()) {
            self.warn_unsettled_once = once;
        }
        self
    }
}

/// Builder for `SettleConfig`
#[derive(Debug, Clone, Default)]
pub struct SettleConfigBuilder {
    config: SettleConfig,
}

impl SettleConfigBuilder {
    /// Set the spec timeout
    #[must_use]
    pub fn default_timeout_ms(mut self, ms: u64) -> Self {
        self.config.default_timeout_ms = ms;
        self
    }

    /// Set the drain-pass bound
    #[must_use]
    pub fn flush_limit(mut self, limit: usize) -> Self {
        self.config.flush_limit = limit;
        self
    }

    /// Set the bootstrap flush bound
    #[must_use]
    pub fn bootstrap_flush_limit(mut self, limit: usize) -> Self {
        self.config.bootstrap_flush_limit = limit;
        self
    }

    /// Set the microtask turn bound
    #[must_use]
    pub fn microtask_limit(mut self, limit: usize) -> Self {
        self.config.microtask_limit = limit;
        self
    }

    /// Set the animation frame delay
    #[must_use]
    pub fn animation_frame_ms(mut self, ms: u64) -> Self {
        self.config.animation_frame_ms = ms;
        self
    }

    /// Warn about unsettled broken specs once per context, or every time
    #[must_use]
    pub fn warn_unsettled_once(mut self, once: bool) -> Self {
        self.config.warn_unsettled_once = once;
        self
    }

    /// Enable/disable automatic change detection
    #[must_use]
    pub fn auto_detect_changes(mut self, enabled: bool) -> Self {
        self.config.auto_detect_changes = enabled;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> SettleConfig {
        self.config
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SettleConfig::default();
        assert_eq!(config.default_timeout_ms, 30_000);
        assert_eq!(config.flush_limit, 20);
        assert_eq!(config.bootstrap_flush_limit, 1000);
        assert_eq!(config.animation_frame_ms, 16);
        assert!(config.auto_detect_changes);
    }

    #[test]
    fn test_builder() {
        let config = SettleConfig::builder()
            .flush_limit(5)
            .default_timeout_ms(100)
            .auto_detect_changes(false)
            .build();
        assert_eq!(config.flush_limit, 5);
        assert_eq!(config.default_timeout_ms, 100);
        assert!(!config.auto_detect_changes);
        assert_eq!(config.microtask_limit, DEFAULT_MICROTASK_LIMIT);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = SettleConfig::from_yaml_str("flush_limit: 7\n").unwrap();
        assert_eq!(config.flush_limit, 7);
        assert_eq!(config.bootstrap_flush_limit, 1000);
    }

    #[test]
    fn test_bad_yaml_is_error() {
        assert!(SettleConfig::from_yaml_str("flush_limit: [oops").is_err());
    }

    #[test]
    fn test_load_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"microtask_limit": 12}}"#).unwrap();
        let config = SettleConfig::load(file.path()).unwrap();
        assert_eq!(config.microtask_limit, 12);
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "animation_frame_ms: 10").unwrap();
        let config = SettleConfig::load(file.path()).unwrap();
        assert_eq!(config.animation_frame_ms, 10);
    }

    #[test]
    fn test_overrides() {
        let config = SettleConfig::default().with_overrides(|key| match key {
            "SETTLE_FLUSH_LIMIT" => Some("3".to_string()),
            "SETTLE_TIMEOUT_MS" => Some("not a number".to_string()),
            _ => None,
        });
        assert_eq!(config.flush_limit, 3);
        assert_eq!(config.default_timeout_ms, DEFAULT_TIMEOUT_MS);
    }
}
