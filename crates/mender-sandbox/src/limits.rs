//! Sandbox configuration and resource limits

use crate::error::SandboxError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default per-execution time budget (seconds)
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
/// Default container image for the container backend
pub const DEFAULT_CONTAINER_IMAGE: &str = "multi-lang-executor:latest";

/// Isolation backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationKind {
    /// Local runtimes under rlimits, cleared environment and a private temp dir
    #[default]
    Process,
    /// One throwaway docker container per run
    Container,
}

/// Network policy for the process backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPolicy {
    /// Run inside a fresh network namespace when `unshare` is available
    #[default]
    Deny,
    /// Share the host network (tests and trusted local use only)
    Host,
}

/// Sandbox limits and admission settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Per-execution time budget
    pub timeout_secs: u64,
    /// Extra wall-clock allowed for compile steps and container start
    pub compile_overhead_secs: u64,
    /// Memory ceiling
    pub memory_mb: u64,
    /// CPU quota (container backend)
    pub cpus: f64,
    /// Capture cap per stream
    pub max_output_bytes: usize,
    /// Isolation backend
    pub isolation: IsolationKind,
    /// Network policy (process backend; containers always run without network)
    pub network: NetworkPolicy,
    /// Image for the container backend
    pub container_image: String,
    /// Admission limit on simultaneous executions
    pub max_concurrent: usize,
    /// How long a bounded admission may queue before saturation is reported
    pub admission_wait_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            compile_overhead_secs: 10,
            memory_mb: 512,
            cpus: 1.0,
            max_output_bytes: 1024 * 1024,
            isolation: IsolationKind::Process,
            network: NetworkPolicy::Deny,
            container_image: DEFAULT_CONTAINER_IMAGE.to_string(),
            max_concurrent: 4,
            admission_wait_ms: 5_000,
        }
    }
}

impl SandboxConfig {
    /// Create config with defaults
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set time budget
    #[inline]
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set memory ceiling
    #[inline]
    #[must_use]
    pub fn with_memory_mb(mut self, mb: u64) -> Self {
        self.memory_mb = mb;
        self
    }

    /// Set isolation backend
    #[inline]
    #[must_use]
    pub fn with_isolation(mut self, isolation: IsolationKind) -> Self {
        self.isolation = isolation;
        self
    }

    /// Set network policy
    #[inline]
    #[must_use]
    pub fn with_network(mut self, network: NetworkPolicy) -> Self {
        self.network = network;
        self
    }

    /// Set admission limit
    #[inline]
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set bounded admission wait
    #[inline]
    #[must_use]
    pub fn with_admission_wait_ms(mut self, ms: u64) -> Self {
        self.admission_wait_ms = ms;
        self
    }

    /// Set output capture cap
    #[inline]
    #[must_use]
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Per-execution time budget
    #[inline]
    #[must_use]
    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Compile/start overhead
    #[inline]
    #[must_use]
    pub fn overhead(&self) -> Duration {
        Duration::from_secs(self.compile_overhead_secs)
    }

    /// Upper bound on one execution's wall-clock time
    #[inline]
    #[must_use]
    pub fn wall_clock_bound(&self) -> Duration {
        self.time_budget() + self.overhead()
    }

    /// Bounded admission wait
    #[inline]
    #[must_use]
    pub fn admission_wait(&self) -> Duration {
        Duration::from_millis(self.admission_wait_ms)
    }

    /// Validate limits
    ///
    /// # Errors
    /// `SandboxError::Config` for zero timeouts, memory, concurrency or
    /// output cap, a non-positive CPU quota, or an empty container image.
    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.timeout_secs == 0 {
            return Err(SandboxError::Config("timeout_secs must be > 0".into()));
        }
        if self.memory_mb == 0 {
            return Err(SandboxError::Config("memory_mb must be > 0".into()));
        }
        if self.max_concurrent == 0 {
            return Err(SandboxError::Config("max_concurrent must be > 0".into()));
        }
        if self.max_output_bytes == 0 {
            return Err(SandboxError::Config("max_output_bytes must be > 0".into()));
        }
        if self.cpus.is_nan() || self.cpus <= 0.0 {
            return Err(SandboxError::Config("cpus must be > 0".into()));
        }
        if self.isolation == IsolationKind::Container && self.container_image.trim().is_empty() {
            return Err(SandboxError::Config("container_image must be set".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.memory_mb, 512);
        assert_eq!(config.container_image, "multi-lang-executor:latest");
        assert_eq!(config.wall_clock_bound(), Duration::from_secs(20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(SandboxConfig::new().with_timeout_secs(0).validate().is_err());
        assert!(SandboxConfig::new().with_max_concurrent(0).validate().is_err());
        assert!(SandboxConfig::new().with_max_output_bytes(0).validate().is_err());
        let mut config = SandboxConfig::new();
        config.cpus = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: SandboxConfig =
            serde_json::from_str(r#"{"timeout_secs": 3, "isolation": "container"}"#).unwrap();
        assert_eq!(config.timeout_secs, 3);
        assert_eq!(config.isolation, IsolationKind::Container);
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.network, NetworkPolicy::Deny);
    }
}
