//! Session orchestrator
//!
//! Drives one task per session through the repair loop:
//! 1. execute the current version and record its outcome
//! 2. success ends the session as `succeeded`
//! 3. a used-up iteration budget ends it as `exhausted`
//! 4. the rule stage is tried first, then the generative pipeline
//! 5. a patch creates the next version and consumes one iteration;
//!    no patch ends the session as `failed`
//!
//! Only the session's own task writes to it, and every write is a short
//! critical section that never spans an await. Readers get cloned snapshots.

use crate::config::MenderConfig;
use crate::error::MenderError;
use crate::session::{Session, SessionId, SessionSummary};
use crate::state_machine::SessionStatus;
use crate::store::{SessionHandle, SessionStore};
use mender_ledger::{diff, DiffCache, LedgerError, Patch, PatchSource, TraceEvent, TraceRecord, TraceStatus, Version};
use mender_repair::{GenerativePipeline, PatternRules, RepairContext, RepairModel, RuleStage};
use mender_sandbox::{Admission, AdmissionError, ErrorKind, ExecutionOutcome, Language, Sandbox};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;

const STAGE: &str = "orchestrator";

/// Why the loop stopped
struct Exit {
    status: SessionStatus,
    message: String,
}

impl Exit {
    fn new(status: SessionStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn cancelled() -> Self {
        Self::new(SessionStatus::Failed, "session cancelled")
    }
}

/// A repair that will become the next version
struct Fix {
    code: String,
    source: PatchSource,
    reasoning: String,
    category: Option<ErrorKind>,
    analysis: Option<String>,
    fix_strategy: Option<String>,
    explanation: Option<String>,
    generated_tests: Option<String>,
    validation: Option<ExecutionOutcome>,
}

impl Fix {
    fn into_patch(self, from: u32, from_code: &str) -> (String, Patch) {
        let patch = Patch::new(from, from_code, &self.code, self.source, self.reasoning)
            .with_applied(true)
            .with_error_category(self.category)
            .with_error_analysis(self.analysis)
            .with_fix_strategy(self.fix_strategy)
            .with_explanation(self.explanation)
            .with_generated_tests(self.generated_tests)
            .with_validation(self.validation);
        (self.code, patch)
    }
}

/// Debug-session orchestrator
///
/// Cheap to clone; clones share the session store, sandbox and diff cache.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<MenderConfig>,
    sandbox: Arc<Sandbox>,
    rules: Arc<dyn RuleStage>,
    model: Option<Arc<dyn RepairModel>>,
    store: Arc<SessionStore>,
    diffs: DiffCache,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("sessions", &self.store.len())
            .field("generative", &self.model.is_some())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create orchestrator with the default rule table and no model
    ///
    /// # Errors
    /// `MenderError::Config` for invalid settings, `MenderError::Sandbox` if
    /// the isolation backend cannot be set up
    pub fn new(config: MenderConfig) -> Result<Self, MenderError> {
        config.validate()?;
        let sandbox = Sandbox::from_config(config.sandbox.clone())?;
        Ok(Self {
            diffs: DiffCache::new(config.diff_cache_capacity),
            config: Arc::new(config),
            sandbox: Arc::new(sandbox),
            rules: Arc::new(PatternRules::default()),
            model: None,
            store: Arc::new(SessionStore::new()),
        })
    }

    /// Use a specific sandbox (e.g. one with a custom runtime)
    #[inline]
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: Arc<Sandbox>) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Replace the rule stage
    #[inline]
    #[must_use]
    pub fn with_rules(mut self, rules: Arc<dyn RuleStage>) -> Self {
        self.rules = rules;
        self
    }

    /// Enable the generative pipeline with `model`
    #[inline]
    #[must_use]
    pub fn with_model(mut self, model: Arc<dyn RepairModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &MenderConfig {
        &self.config
    }

    /// Create a session and start its loop in the background
    ///
    /// # Errors
    /// - `MenderError::Config` for a zero iteration budget
    /// - `MenderError::Runtime` when called outside a tokio runtime
    pub fn submit(
        &self,
        code: impl Into<String>,
        language: Language,
        max_iterations: Option<u32>,
    ) -> Result<SessionId, MenderError> {
        let max_iterations = max_iterations.unwrap_or(self.config.max_iterations);
        if max_iterations == 0 {
            return Err(MenderError::Config("max_iterations must be > 0".into()));
        }
        let runtime = Handle::try_current().map_err(|e| MenderError::Runtime(e.to_string()))?;

        let session = Session::new(code, language, max_iterations)?;
        let id = session.id;
        let handle = self.store.insert(session);
        handle.mutate(|s| {
            s.trace(TraceEvent::new(
                STAGE,
                TraceStatus::Started,
                format!("session started: {language}, max {max_iterations} iterations"),
            ));
        });
        tracing::info!(session_id = %id, %language, max_iterations, "session submitted");

        let this = self.clone();
        let worker = Arc::clone(&handle);
        let task = runtime.spawn(async move { this.drive(&worker).await });
        runtime.spawn(async move {
            if let Err(e) = task.await {
                tracing::error!(session_id = %id, error = %e, "session task aborted");
                finish(
                    &handle,
                    Exit::new(SessionStatus::Failed, format!("session task aborted: {e}")),
                );
            }
        });
        Ok(id)
    }

    /// Full snapshot of a session
    ///
    /// # Errors
    /// `MenderError::UnknownSession`
    pub fn get_session(&self, id: SessionId) -> Result<Session, MenderError> {
        Ok(self.handle(id)?.snapshot())
    }

    /// Versions of a session, in order
    ///
    /// # Errors
    /// `MenderError::UnknownSession`
    pub fn list_versions(&self, id: SessionId) -> Result<Vec<Version>, MenderError> {
        Ok(self.handle(id)?.read(|s| s.ledger.versions().to_vec()))
    }

    /// Patches of a session, in order
    ///
    /// # Errors
    /// `MenderError::UnknownSession`
    pub fn list_patches(&self, id: SessionId) -> Result<Vec<Patch>, MenderError> {
        Ok(self.handle(id)?.read(|s| s.ledger.patches().to_vec()))
    }

    /// Trace records of a session, in order
    ///
    /// # Errors
    /// `MenderError::UnknownSession`
    pub fn list_traces(&self, id: SessionId) -> Result<Vec<TraceRecord>, MenderError> {
        Ok(self.handle(id)?.read(|s| s.ledger.traces().to_vec()))
    }

    /// Compact status view
    ///
    /// # Errors
    /// `MenderError::UnknownSession`
    pub fn status(&self, id: SessionId) -> Result<SessionSummary, MenderError> {
        Ok(self.handle(id)?.read(Session::summary))
    }

    /// Summaries of all sessions, oldest first
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.store
            .ids()
            .into_iter()
            .filter_map(|id| self.store.get(id))
            .map(|h| h.read(Session::summary))
            .collect()
    }

    /// Unified diff between two versions of a session
    ///
    /// # Errors
    /// `MenderError::UnknownSession`, `MenderError::UnknownVersion`
    pub fn diff(&self, id: SessionId, from: u32, to: u32) -> Result<Arc<str>, MenderError> {
        let (old, new) = self.handle(id)?.read(|s| {
            let pick = |n: u32| {
                s.ledger
                    .version(n)
                    .cloned()
                    .ok_or(MenderError::UnknownVersion { session: id, version: n })
            };
            Ok::<_, MenderError>((pick(from)?, pick(to)?))
        })?;
        Ok(self.diffs.between(&old, &new))
    }

    /// Verify a session's trace chain
    ///
    /// # Errors
    /// `MenderError::UnknownSession`, or `MenderError::Ledger` on a broken chain
    pub fn verify_traces(&self, id: SessionId) -> Result<(), MenderError> {
        self.handle(id)?.read(|s| s.ledger.verify_traces())?;
        Ok(())
    }

    /// Request cancellation; takes effect at the next step boundary
    ///
    /// # Errors
    /// `MenderError::UnknownSession`
    pub fn cancel(&self, id: SessionId) -> Result<(), MenderError> {
        let handle = self.handle(id)?;
        if !handle.cancel_token().is_cancelled() {
            handle.cancel_token().cancel();
            handle.mutate(|s| {
                s.trace(TraceEvent::new(STAGE, TraceStatus::Info, "cancellation requested"));
            });
        }
        Ok(())
    }

    /// Wait until the session is terminal and return its final snapshot
    ///
    /// # Errors
    /// `MenderError::UnknownSession`
    pub async fn wait(&self, id: SessionId) -> Result<Session, MenderError> {
        let handle = self.handle(id)?;
        let mut rx = handle.subscribe();
        rx.wait_for(SessionStatus::is_terminal)
            .await
            .map_err(|e| MenderError::Runtime(e.to_string()))?;
        Ok(handle.snapshot())
    }

    /// Drop a session from the store, cancelling it if still running
    ///
    /// # Errors
    /// `MenderError::UnknownSession`
    pub fn discard(&self, id: SessionId) -> Result<Session, MenderError> {
        let handle = self.store.remove(id).ok_or(MenderError::UnknownSession(id))?;
        handle.cancel_token().cancel();
        Ok(handle.snapshot())
    }

    /// Run code once outside any session, under the same limits
    ///
    /// # Errors
    /// `MenderError::Admission` if the pool stays saturated for the
    /// configured admission wait
    pub async fn execute_once(&self, code: &str, language: Language) -> Result<ExecutionOutcome, MenderError> {
        Ok(self.sandbox.execute_once(code, language).await?)
    }

    fn handle(&self, id: SessionId) -> Result<Arc<SessionHandle>, MenderError> {
        self.store.get(id).ok_or(MenderError::UnknownSession(id))
    }

    async fn drive(&self, handle: &SessionHandle) {
        let exit = match self.run_loop(handle).await {
            Ok(exit) => exit,
            Err(e) if e.is_invariant_violation() => {
                tracing::error!(session_id = %handle.id(), error = %e, "invariant violation");
                Exit::new(SessionStatus::Failed, format!("invariant violation: {e}"))
            }
            Err(e) => Exit::new(SessionStatus::Failed, e.to_string()),
        };
        finish(handle, exit);
    }

    async fn run_loop(&self, handle: &SessionHandle) -> Result<Exit, MenderError> {
        let cancel = handle.cancel_token().clone();
        loop {
            if cancel.is_cancelled() {
                return Ok(Exit::cancelled());
            }
            let (number, code, language, iteration, max_iterations) = handle.read(|s| {
                let current = s.ledger.current();
                (
                    current.map_or(0, |v| v.number),
                    current.map(|v| v.code.clone()).unwrap_or_default(),
                    s.language,
                    s.current_iteration,
                    s.max_iterations,
                )
            });

            let outcome = match self
                .sandbox
                .execute(&code, language, Admission::Queue, Some(&cancel))
                .await
            {
                Ok(outcome) => outcome,
                Err(AdmissionError::Cancelled) => return Ok(Exit::cancelled()),
                Err(e) => return Ok(Exit::new(SessionStatus::Failed, format!("sandbox unavailable: {e}"))),
            };
            handle.mutate(|s| {
                s.ledger.record_outcome(number, outcome.clone())?;
                let status = if outcome.is_success() {
                    TraceStatus::Completed
                } else {
                    TraceStatus::Failed
                };
                s.trace(
                    TraceEvent::new("sandbox", status, format!("version {number}: {}", outcome.summary()))
                        .with_iteration(iteration)
                        .with_duration_ms(outcome.duration_ms),
                );
                Ok::<_, LedgerError>(())
            })?;

            if outcome.is_success() {
                return Ok(Exit::new(
                    SessionStatus::Succeeded,
                    format!("version {number} ran successfully"),
                ));
            }
            if iteration >= max_iterations {
                return Ok(Exit::new(
                    SessionStatus::Exhausted,
                    format!("iteration budget of {max_iterations} used up"),
                ));
            }
            if cancel.is_cancelled() {
                return Ok(Exit::cancelled());
            }

            if let Some(fix) = self.rule_fix(handle, &code, language, &outcome, iteration) {
                if cancel.is_cancelled() {
                    shelve(handle, number, &code, fix, iteration)?;
                    return Ok(Exit::cancelled());
                }
                apply(handle, number, &code, fix)?;
                continue;
            }

            match self.generative_fix(handle, number, &code, language, &outcome, iteration).await? {
                Ok(fix) if cancel.is_cancelled() => {
                    shelve(handle, number, &code, fix, iteration)?;
                    return Ok(Exit::cancelled());
                }
                Ok(fix) => apply(handle, number, &code, fix)?,
                Err(_) if cancel.is_cancelled() => return Ok(Exit::cancelled()),
                Err(reason) => {
                    return Ok(Exit::new(
                        SessionStatus::Failed,
                        format!("no patch produced: {reason}"),
                    ))
                }
            }
        }
    }

    fn rule_fix(
        &self,
        handle: &SessionHandle,
        code: &str,
        language: Language,
        outcome: &ExecutionOutcome,
        iteration: u32,
    ) -> Option<Fix> {
        let (status, message, fix) = match self.rules.propose(code, language, outcome) {
            Ok(Some(fix)) => (
                TraceStatus::Completed,
                format!("rule {} matched: {}", fix.rule, fix.reasoning),
                Some(fix),
            ),
            Ok(None) => (TraceStatus::Info, "no rule matched".to_string(), None),
            Err(e) => (TraceStatus::Failed, format!("rule stage error: {e}"), None),
        };
        handle.mutate(|s| {
            s.trace(TraceEvent::new("rule_stage", status, message).with_iteration(iteration));
        });
        fix.map(|fix| Fix {
            code: fix.code,
            source: PatchSource::RuleBased,
            reasoning: fix.reasoning,
            category: Some(fix.category),
            analysis: None,
            fix_strategy: None,
            explanation: None,
            generated_tests: None,
            validation: None,
        })
    }

    /// Outer error: a ledger violation while recording rejected candidates.
    /// Inner error: why no patch was produced.
    async fn generative_fix(
        &self,
        handle: &SessionHandle,
        number: u32,
        code: &str,
        language: Language,
        outcome: &ExecutionOutcome,
        iteration: u32,
    ) -> Result<Result<Fix, String>, MenderError> {
        let Some(model) = &self.model else {
            handle.mutate(|s| {
                s.trace(
                    TraceEvent::new("generative_pipeline", TraceStatus::Info, "no model configured")
                        .with_iteration(iteration),
                );
            });
            return Ok(Err("no rule matched and no model configured".to_string()));
        };

        let history: Vec<String> = handle.read(|s| {
            s.ledger
                .patches()
                .iter()
                .filter(|p| p.applied)
                .map(|p| p.reasoning.clone())
                .collect()
        });
        let pipeline = GenerativePipeline::new(Arc::clone(model), Arc::clone(&self.sandbox), self.config.pipeline.clone());
        let ctx = RepairContext {
            code,
            language,
            outcome,
            iteration,
            history: &history,
        };
        let sink = |event: TraceEvent| {
            handle.mutate(|s| {
                s.trace(event);
            });
        };
        let report = pipeline.run(&ctx, &sink, handle.cancel_token()).await;

        handle.mutate(|s| {
            for candidate in &report.rejected {
                let patch = Patch::new(number, code, &candidate.code, candidate.source, candidate.reasoning.clone())
                    .with_error_category(report.category)
                    .with_error_analysis(report.analysis.clone())
                    .with_fix_strategy(report.fix_strategy.clone())
                    .with_validation(Some(candidate.validation.clone()));
                s.ledger.record_patch(patch)?;
                count_patch(candidate.source, false);
            }
            Ok::<_, LedgerError>(())
        })?;

        let Some(accepted) = report.accepted else {
            let reason = report
                .failure
                .map_or_else(|| "pipeline produced no candidate".to_string(), |e| e.to_string());
            return Ok(Err(reason));
        };
        Ok(Ok(Fix {
            code: accepted.code,
            source: accepted.source,
            reasoning: accepted.reasoning,
            category: report.category,
            analysis: report.analysis,
            fix_strategy: report.fix_strategy,
            explanation: report.explanation,
            generated_tests: report.generated_tests,
            validation: Some(accepted.validation),
        }))
    }
}

/// Append the next version and its applied patch in one critical section
fn apply(handle: &SessionHandle, from: u32, from_code: &str, fix: Fix) -> Result<(), MenderError> {
    let source = fix.source;
    let (code, patch) = fix.into_patch(from, from_code);
    let mismatch = |reason: String| LedgerError::DiffMismatch {
        from,
        to: from + 1,
        reason,
    };
    let rebuilt = diff::apply(from_code, &patch.diff).map_err(|e| mismatch(e.to_string()))?;
    if rebuilt != code {
        return Err(mismatch("diff does not reproduce the candidate".to_string()).into());
    }

    handle.mutate(|s| {
        let to = s.ledger.create_version(code)?.number;
        s.ledger.record_patch(patch)?;
        s.current_iteration += 1;
        let iteration = s.current_iteration;
        s.trace(
            TraceEvent::new(STAGE, TraceStatus::Completed, format!("applied {source} patch: v{from} -> v{to}"))
                .with_iteration(iteration),
        );
        if let Some(earlier) = s.ledger.earlier_duplicate(to).map(|v| v.number) {
            s.trace(
                TraceEvent::new(
                    STAGE,
                    TraceStatus::Warning,
                    format!("version {to} repeats the code of version {earlier}"),
                )
                .with_iteration(iteration),
            );
        }
        Ok::<_, LedgerError>(())
    })?;
    count_patch(source, true);
    Ok(())
}

/// Record a fix that arrived after cancellation as an unapplied patch
fn shelve(handle: &SessionHandle, from: u32, from_code: &str, fix: Fix, iteration: u32) -> Result<(), MenderError> {
    let source = fix.source;
    let (_, patch) = fix.into_patch(from, from_code);
    handle.mutate(|s| {
        s.ledger.record_patch(patch.with_applied(false))?;
        s.trace(
            TraceEvent::new(
                STAGE,
                TraceStatus::Info,
                format!("{source} patch for v{from} not applied: session cancelled"),
            )
            .with_iteration(iteration),
        );
        Ok::<_, LedgerError>(())
    })?;
    count_patch(source, false);
    Ok(())
}

/// Move the session to its terminal status; a no-op if it already is terminal
fn finish(handle: &SessionHandle, exit: Exit) {
    let status = exit.status;
    let changed = handle.mutate(|s| {
        if s.is_terminal() {
            return false;
        }
        let trace_status = if status == SessionStatus::Succeeded {
            TraceStatus::Completed
        } else {
            TraceStatus::Failed
        };
        let iteration = s.current_iteration;
        s.trace(TraceEvent::new(STAGE, trace_status, exit.message).with_iteration(iteration));
        match s.transition(status) {
            Ok(()) => true,
            Err(e) => {
                s.trace(TraceEvent::new(STAGE, TraceStatus::Failed, e.to_string()));
                false
            }
        }
    });
    if changed {
        metrics::counter!("mender_sessions_total", "status" => status.as_str()).increment(1);
        tracing::info!(session_id = %handle.id(), %status, "session finished");
    }
}

fn count_patch(source: PatchSource, applied: bool) {
    metrics::counter!(
        "mender_patches_total",
        "source" => source.as_str(),
        "applied" => if applied { "true" } else { "false" }
    )
    .increment(1);
}
