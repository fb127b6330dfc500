//! Orchestrator configuration
//!
//! Layered: defaults, then an optional TOML file, then `MENDER_*`
//! environment variables.
//!
//! ```toml
//! max_iterations = 5
//!
//! [sandbox]
//! timeout_secs = 5
//! isolation = "container"
//!
//! [pipeline]
//! validator_retries = 1
//! ```

use crate::error::MenderError;
use mender_ledger::cache::DEFAULT_CAPACITY;
use mender_repair::PipelineConfig;
use mender_sandbox::{IsolationKind, NetworkPolicy, SandboxConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Default iteration budget per session
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MenderConfig {
    /// Iteration budget when `submit` gets none
    pub max_iterations: u32,
    /// Executor limits
    pub sandbox: SandboxConfig,
    /// Generative pipeline settings
    pub pipeline: PipelineConfig,
    /// Capacity of the on-demand diff cache
    pub diff_cache_capacity: u64,
}

impl Default for MenderConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            sandbox: SandboxConfig::default(),
            pipeline: PipelineConfig::default(),
            diff_cache_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl MenderConfig {
    /// Set default iteration budget
    #[inline]
    #[must_use]
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Set sandbox limits
    #[inline]
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Set pipeline settings
    #[inline]
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Parse TOML; missing keys keep their defaults
    ///
    /// # Errors
    /// `MenderError::Config` on malformed TOML
    pub fn from_toml_str(text: &str) -> Result<Self, MenderError> {
        toml::from_str(text).map_err(|e| MenderError::Config(e.to_string()))
    }

    /// Load a TOML file
    ///
    /// # Errors
    /// `MenderError::Config` if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MenderError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| MenderError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Apply `MENDER_*` overrides from the process environment
    ///
    /// # Errors
    /// `MenderError::Config` for unparsable values
    pub fn with_env(self) -> Result<Self, MenderError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `MENDER_*` overrides from `lookup`
    ///
    /// # Errors
    /// `MenderError::Config` for unparsable values
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, MenderError> {
        fn parsed<T: FromStr>(key: &str, value: &str) -> Result<T, MenderError>
        where
            T::Err: std::fmt::Display,
        {
            value
                .trim()
                .parse()
                .map_err(|e| MenderError::Config(format!("{key}={value}: {e}")))
        }

        if let Some(v) = lookup("MENDER_MAX_ITERATIONS") {
            self.max_iterations = parsed("MENDER_MAX_ITERATIONS", &v)?;
        }
        if let Some(v) = lookup("MENDER_TIMEOUT_SECS") {
            self.sandbox.timeout_secs = parsed("MENDER_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("MENDER_MEMORY_MB") {
            self.sandbox.memory_mb = parsed("MENDER_MEMORY_MB", &v)?;
        }
        if let Some(v) = lookup("MENDER_MAX_CONCURRENT") {
            self.sandbox.max_concurrent = parsed("MENDER_MAX_CONCURRENT", &v)?;
        }
        if let Some(v) = lookup("MENDER_ISOLATION") {
            self.sandbox.isolation = match v.trim().to_ascii_lowercase().as_str() {
                "process" => IsolationKind::Process,
                "container" => IsolationKind::Container,
                other => return Err(MenderError::Config(format!("MENDER_ISOLATION={other}: expected process or container"))),
            };
        }
        if let Some(v) = lookup("MENDER_NETWORK") {
            self.sandbox.network = match v.trim().to_ascii_lowercase().as_str() {
                "deny" => NetworkPolicy::Deny,
                "host" => NetworkPolicy::Host,
                other => return Err(MenderError::Config(format!("MENDER_NETWORK={other}: expected deny or host"))),
            };
        }
        if let Some(v) = lookup("MENDER_CONTAINER_IMAGE") {
            self.sandbox.container_image = v;
        }
        if let Some(v) = lookup("MENDER_MODEL_TIMEOUT_SECS") {
            self.pipeline.model_timeout_secs = parsed("MENDER_MODEL_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("MENDER_VALIDATOR_RETRIES") {
            self.pipeline.validator_retries = parsed("MENDER_VALIDATOR_RETRIES", &v)?;
        }
        Ok(self)
    }

    /// Validate all sections
    ///
    /// # Errors
    /// `MenderError::Config` for zero iterations, zero model timeout, zero
    /// cache capacity or invalid sandbox limits
    pub fn validate(&self) -> Result<(), MenderError> {
        if self.max_iterations == 0 {
            return Err(MenderError::Config("max_iterations must be > 0".into()));
        }
        if self.pipeline.model_timeout_secs == 0 {
            return Err(MenderError::Config("pipeline.model_timeout_secs must be > 0".into()));
        }
        if self.diff_cache_capacity == 0 {
            return Err(MenderError::Config("diff_cache_capacity must be > 0".into()));
        }
        self.sandbox
            .validate()
            .map_err(|e| MenderError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = MenderConfig::default();
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.sandbox.timeout_secs, 10);
        assert_eq!(config.sandbox.max_concurrent, 4);
        assert_eq!(config.pipeline.model_timeout_secs, 60);
        assert_eq!(config.pipeline.validator_retries, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = MenderConfig::from_toml_str(
            "max_iterations = 3\n[sandbox]\ntimeout_secs = 2\nisolation = \"container\"\n[pipeline]\nrefactor = true\n",
        )
        .unwrap();
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.sandbox.timeout_secs, 2);
        assert_eq!(config.sandbox.isolation, IsolationKind::Container);
        assert_eq!(config.sandbox.memory_mb, 512);
        assert!(config.pipeline.refactor);
        assert_eq!(config.pipeline.validator_retries, 2);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("MENDER_MAX_ITERATIONS", "4"),
            ("MENDER_ISOLATION", "Container"),
            ("MENDER_MODEL_TIMEOUT_SECS", "15"),
        ]
        .into_iter()
        .collect();
        let config = MenderConfig::default()
            .with_overrides(|k| env.get(k).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.max_iterations, 4);
        assert_eq!(config.sandbox.isolation, IsolationKind::Container);
        assert_eq!(config.pipeline.model_timeout_secs, 15);

        let bad = MenderConfig::default().with_overrides(|k| (k == "MENDER_TIMEOUT_SECS").then(|| "soon".to_string()));
        assert!(matches!(bad, Err(MenderError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zeroes() {
        assert!(MenderConfig::default().with_max_iterations(0).validate().is_err());
        assert!(MenderConfig::default()
            .with_sandbox(SandboxConfig::default().with_max_concurrent(0))
            .validate()
            .is_err());
        assert!(MenderConfig::default()
            .with_pipeline(PipelineConfig::default().with_model_timeout_secs(0))
            .validate()
            .is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mender.toml");
        std::fs::write(&path, "max_iterations = 7\n").unwrap();
        assert_eq!(MenderConfig::load(&path).unwrap().max_iterations, 7);
        assert!(MenderConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
