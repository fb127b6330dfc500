//! Sandbox facade: admission + runtime + wall-clock guard

use crate::error::{AdmissionError, SandboxError};
use crate::isolation::{ContainerRuntime, ExecutionRequest, ProcessRuntime, Runtime};
use crate::language::Language;
use crate::limits::{IsolationKind, SandboxConfig};
use crate::outcome::ExecutionOutcome;
use crate::pool::{Admission, ExecutionPool, PoolStats};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Slack on top of the wall-clock bound before the guard gives up on a runtime
const GUARD_SLACK: Duration = Duration::from_secs(5);

/// Sandboxed executor shared by every session
pub struct Sandbox {
    runtime: Arc<dyn Runtime>,
    pool: ExecutionPool,
    config: SandboxConfig,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("runtime", &self.runtime.name())
            .field("pool", &self.pool)
            .field("config", &self.config)
            .finish()
    }
}

impl Sandbox {
    /// Create a sandbox with the backend named in `config`
    ///
    /// # Errors
    /// `SandboxError::Config` if the limits are invalid
    pub fn from_config(config: SandboxConfig) -> Result<Self, SandboxError> {
        config.validate()?;
        let runtime: Arc<dyn Runtime> = match config.isolation {
            IsolationKind::Process => Arc::new(ProcessRuntime::new(config.clone())),
            IsolationKind::Container => Arc::new(ContainerRuntime::new(config.clone())),
        };
        Ok(Self::with_runtime(config, runtime))
    }

    /// Create with a custom runtime
    #[must_use]
    pub fn with_runtime(config: SandboxConfig, runtime: Arc<dyn Runtime>) -> Self {
        Self {
            pool: ExecutionPool::new(config.max_concurrent.max(1)),
            runtime,
            config,
        }
    }

    /// Active limits
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Admission pool statistics
    #[inline]
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Run `code` under the configured limits.
    ///
    /// Program failures, timeouts and infrastructure faults come back as an
    /// outcome. The call returns within `admission wait + timeout + overhead`
    /// plus a small guard slack.
    ///
    /// # Errors
    /// `AdmissionError` if no slot was granted
    pub async fn execute(
        &self,
        code: &str,
        language: Language,
        admission: Admission,
        cancel: Option<&CancellationToken>,
    ) -> Result<ExecutionOutcome, AdmissionError> {
        let _permit = self.pool.admit(admission, cancel).await?;
        let request = ExecutionRequest::new(code, language, self.config.time_budget());
        let started = Instant::now();

        let guard = self.config.wall_clock_bound() + GUARD_SLACK;
        let outcome = match tokio::time::timeout(guard, self.runtime.run(&request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(runtime = self.runtime.name(), %language, "runtime exceeded wall-clock guard");
                ExecutionOutcome::timed_out("", "")
                    .with_duration_ms(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX))
            }
        };

        metrics::counter!("mender_executions_total", "classification" => outcome.classification.as_str())
            .increment(1);
        tracing::debug!(
            runtime = self.runtime.name(),
            %language,
            classification = %outcome.classification,
            duration_ms = outcome.duration_ms,
            "execution finished"
        );
        Ok(outcome)
    }

    /// Ad-hoc single execution with bounded admission
    ///
    /// # Errors
    /// `AdmissionError::Saturated` if the pool stays full for `admission_wait_ms`
    pub async fn execute_once(
        &self,
        code: &str,
        language: Language,
    ) -> Result<ExecutionOutcome, AdmissionError> {
        self.execute(code, language, Admission::Bounded(self.config.admission_wait()), None)
            .await
    }
}
