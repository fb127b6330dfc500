//! Generative repair pipeline
//!
//! A fixed, ordered [`StagePlan`] replaces a free-form agent graph:
//!
//! 1. `error_interpreter` (required): category + analysis
//! 2. `patch_generator` (required): full replacement code
//! 3. `validator`: runs the candidate in the sandbox; a rejection sends the
//!    generator back with the failing outcome, up to `validator_retries` times
//! 4. `test_creator` (optional): auxiliary tests, never affects acceptance
//! 5. `refactor` (optional): substituted only if it validates too
//! 6. `explainer`: summary of the accepted fix, never blocks acceptance
//!
//! Every stage emits `started` and `completed`/`failed` trace events with
//! durations through a [`TraceSink`]. The pipeline never errors: failures end
//! up in [`PipelineReport::failure`] and mean "no patch".

use crate::error::RepairError;
use crate::extract::{extract_code, labelled_field, parse_category, prose_outside_fence};
use crate::model::{ModelRequest, ModelTask, RepairModel};
use crate::prompts;
use mender_ledger::{PatchSource, TraceEvent, TraceStatus};
use mender_sandbox::{Admission, CancellationToken, ErrorKind, ExecutionOutcome, Language, Sandbox};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pipeline settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Timeout for one model call
    pub model_timeout_secs: u64,
    /// Extra generator attempts after a validator rejection
    pub validator_retries: u32,
    /// Run the test creator
    pub generate_tests: bool,
    /// Run the refactor stage
    pub refactor: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_timeout_secs: 60,
            validator_retries: 2,
            generate_tests: false,
            refactor: false,
        }
    }
}

impl PipelineConfig {
    /// Set model timeout
    #[inline]
    #[must_use]
    pub fn with_model_timeout_secs(mut self, secs: u64) -> Self {
        self.model_timeout_secs = secs;
        self
    }

    /// Set validator retries
    #[inline]
    #[must_use]
    pub fn with_validator_retries(mut self, retries: u32) -> Self {
        self.validator_retries = retries;
        self
    }

    /// Enable or disable the test creator
    #[inline]
    #[must_use]
    pub fn with_generate_tests(mut self, enabled: bool) -> Self {
        self.generate_tests = enabled;
        self
    }

    /// Enable or disable the refactor stage
    #[inline]
    #[must_use]
    pub fn with_refactor(mut self, enabled: bool) -> Self {
        self.refactor = enabled;
        self
    }

    /// Model timeout as a duration
    #[inline]
    #[must_use]
    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }
}

/// Named pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Classify and analyse the failure
    ErrorInterpreter,
    /// Propose replacement code
    PatchGenerator,
    /// Execute the candidate
    Validator,
    /// Generate auxiliary tests
    TestCreator,
    /// Tidy the accepted code
    Refactor,
    /// Summarize the fix
    Explainer,
}

impl Stage {
    /// All stages in execution order
    pub const ALL: [Self; 6] = [
        Self::ErrorInterpreter,
        Self::PatchGenerator,
        Self::Validator,
        Self::TestCreator,
        Self::Refactor,
        Self::Explainer,
    ];

    /// Stage name used in traces
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ErrorInterpreter => "error_interpreter",
            Self::PatchGenerator => "patch_generator",
            Self::Validator => "validator",
            Self::TestCreator => "test_creator",
            Self::Refactor => "refactor",
            Self::Explainer => "explainer",
        }
    }

    /// Model task behind this stage, if it calls the model
    #[inline]
    #[must_use]
    pub const fn task(&self) -> Option<ModelTask> {
        match self {
            Self::ErrorInterpreter => Some(ModelTask::Interpret),
            Self::PatchGenerator => Some(ModelTask::Generate),
            Self::Validator => None,
            Self::TestCreator => Some(ModelTask::CreateTests),
            Self::Refactor => Some(ModelTask::Refactor),
            Self::Explainer => Some(ModelTask::Explain),
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enablement and attempt bound of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stage
    pub stage: Stage,
    /// Whether the stage runs
    pub enabled: bool,
    /// Failure aborts the pipeline with no patch
    pub required: bool,
    /// Maximum attempts per pipeline run
    pub max_attempts: u32,
}

/// Ordered stage list derived from [`PipelineConfig`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePlan {
    stages: Vec<StageSpec>,
}

impl StagePlan {
    /// Build the plan for `config`
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        let candidates = config.validator_retries.saturating_add(1);
        let stages = Stage::ALL
            .into_iter()
            .map(|stage| {
                let (enabled, required, max_attempts) = match stage {
                    Stage::ErrorInterpreter => (true, true, 1),
                    Stage::PatchGenerator | Stage::Validator => (true, true, candidates),
                    Stage::TestCreator => (config.generate_tests, false, 1),
                    Stage::Refactor => (config.refactor, false, 1),
                    Stage::Explainer => (true, false, 1),
                };
                StageSpec {
                    stage,
                    enabled,
                    required,
                    max_attempts,
                }
            })
            .collect();
        Self { stages }
    }

    /// Stages in order
    #[inline]
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Spec of one stage
    #[must_use]
    pub fn get(&self, stage: Stage) -> StageSpec {
        self.stages
            .iter()
            .copied()
            .find(|s| s.stage == stage)
            .unwrap_or(StageSpec {
                stage,
                enabled: false,
                required: false,
                max_attempts: 0,
            })
    }

    /// Whether `stage` runs
    #[inline]
    #[must_use]
    pub fn is_enabled(&self, stage: Stage) -> bool {
        self.get(stage).enabled
    }
}

/// Receives the pipeline's trace events
pub trait TraceSink: Send + Sync {
    /// Record one event
    fn emit(&self, event: TraceEvent);
}

impl<F> TraceSink for F
where
    F: Fn(TraceEvent) + Send + Sync,
{
    fn emit(&self, event: TraceEvent) {
        self(event);
    }
}

/// Input of one pipeline run
#[derive(Debug, Clone, Copy)]
pub struct RepairContext<'a> {
    /// Failing code
    pub code: &'a str,
    /// Language tag
    pub language: Language,
    /// Outcome that failed
    pub outcome: &'a ExecutionOutcome,
    /// Session iteration, for trace events
    pub iteration: u32,
    /// Rationales of earlier patches in the session
    pub history: &'a [String],
}

/// One generated candidate and its validator verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Full replacement code
    pub code: String,
    /// `generated` for the first attempt, `generated_validator` after a rejection
    pub source: PatchSource,
    /// Generator rationale
    pub reasoning: String,
    /// Validator outcome
    pub validation: ExecutionOutcome,
}

/// Result of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Candidate that passed validation
    pub accepted: Option<Candidate>,
    /// Candidates the validator rejected, in order
    pub rejected: Vec<Candidate>,
    /// Interpreter category, falling back to the classifier's
    pub category: Option<ErrorKind>,
    /// Interpreter analysis
    pub analysis: Option<String>,
    /// Fix strategy named by the interpreter
    pub fix_strategy: Option<String>,
    /// Test creator output
    pub generated_tests: Option<String>,
    /// Explainer output
    pub explanation: Option<String>,
    /// Why no candidate was accepted
    pub failure: Option<RepairError>,
}

impl PipelineReport {
    fn failed(mut self, error: RepairError) -> Self {
        self.failure = Some(error);
        self
    }
}

/// Model-backed repair stages
pub struct GenerativePipeline {
    model: Arc<dyn RepairModel>,
    sandbox: Arc<Sandbox>,
    config: PipelineConfig,
    plan: StagePlan,
}

impl fmt::Debug for GenerativePipeline {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerativePipeline")
            .field("sandbox", &self.sandbox)
            .field("config", &self.config)
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}

impl GenerativePipeline {
    /// Create pipeline
    #[must_use]
    pub fn new(model: Arc<dyn RepairModel>, sandbox: Arc<Sandbox>, config: PipelineConfig) -> Self {
        let plan = StagePlan::from_config(&config);
        Self {
            model,
            sandbox,
            config,
            plan,
        }
    }

    /// Active settings
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stage plan
    #[inline]
    #[must_use]
    pub fn plan(&self) -> &StagePlan {
        &self.plan
    }

    /// Run every enabled stage once for `ctx`.
    ///
    /// Cancellation is honored between stages; an in-flight model call or
    /// sandbox run is allowed to finish.
    pub async fn run(
        &self,
        ctx: &RepairContext<'_>,
        sink: &dyn TraceSink,
        cancel: &CancellationToken,
    ) -> PipelineReport {
        let mut report = PipelineReport::default();

        let analysis = match self
            .ask(
                Stage::ErrorInterpreter,
                prompts::interpret(ctx.code, ctx.language, ctx.outcome),
                ctx,
                sink,
                cancel,
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => return report.failed(e),
        };
        report.category = parse_category(&analysis).or_else(|| ctx.outcome.error_kind());
        report.fix_strategy = labelled_field(&analysis, "fix");
        report.analysis = Some(analysis.clone());

        let attempts = self.plan.get(Stage::PatchGenerator).max_attempts;
        let mut rejection: Option<(String, ExecutionOutcome)> = None;
        for attempt in 0..attempts {
            let source = if attempt == 0 {
                PatchSource::Generated
            } else {
                PatchSource::GeneratedValidator
            };
            let prompt = prompts::generate(
                ctx.code,
                ctx.language,
                ctx.outcome,
                &analysis,
                ctx.history,
                rejection.as_ref().map(|(code, outcome)| (code.as_str(), outcome)),
            );
            let reply = match self.ask(Stage::PatchGenerator, prompt, ctx, sink, cancel).await {
                Ok(reply) => reply,
                Err(e) => return report.failed(e),
            };
            let Some(code) = extract_code(&reply, ctx.code) else {
                self.trace(sink, ctx, Stage::PatchGenerator, TraceStatus::Failed, "reply contained no new code", None);
                return report.failed(RepairError::Malformed("reply contained no new code".into()));
            };
            let reasoning = prose_outside_fence(&reply)
                .unwrap_or_else(|| "generated fix based on error analysis".to_string());

            let validation = match self.validate(&code, ctx, sink, cancel).await {
                Ok(outcome) => outcome,
                Err(e) => return report.failed(e),
            };
            let candidate = Candidate {
                code,
                source,
                reasoning,
                validation,
            };
            if candidate.validation.is_success() {
                report.accepted = Some(candidate);
                break;
            }
            rejection = Some((candidate.code.clone(), candidate.validation.clone()));
            report.rejected.push(candidate);
        }

        let Some(mut accepted) = report.accepted.take() else {
            return report.failed(RepairError::Rejected { attempts });
        };

        if self.plan.is_enabled(Stage::TestCreator) {
            if let Ok(reply) = self
                .ask(Stage::TestCreator, prompts::create_tests(&accepted.code, ctx.language), ctx, sink, cancel)
                .await
            {
                report.generated_tests = Some(extract_code(&reply, "").unwrap_or(reply));
            }
        }

        if self.plan.is_enabled(Stage::Refactor) {
            self.refactor(&mut accepted, ctx, sink, cancel).await;
        }

        if self.plan.is_enabled(Stage::Explainer) {
            let prompt = prompts::explain(ctx.code, &accepted.code, ctx.language, ctx.outcome, &analysis);
            if let Ok(reply) = self.ask(Stage::Explainer, prompt, ctx, sink, cancel).await {
                report.explanation = Some(reply.trim().to_string());
            }
        }

        report.accepted = Some(accepted);
        report
    }

    /// Substitute a refactored version only if it validates
    async fn refactor(
        &self,
        accepted: &mut Candidate,
        ctx: &RepairContext<'_>,
        sink: &dyn TraceSink,
        cancel: &CancellationToken,
    ) {
        let Ok(reply) = self
            .ask(Stage::Refactor, prompts::refactor(&accepted.code, ctx.language), ctx, sink, cancel)
            .await
        else {
            return;
        };
        let Some(code) = extract_code(&reply, &accepted.code) else {
            return;
        };
        match self.validate(&code, ctx, sink, cancel).await {
            Ok(outcome) if outcome.is_success() => {
                accepted.code = code;
                accepted.reasoning.push_str(" (refactored)");
                accepted.validation = outcome;
            }
            Ok(outcome) => self.trace(
                sink,
                ctx,
                Stage::Refactor,
                TraceStatus::Warning,
                format!("refactor discarded: {}", outcome.summary()),
                None,
            ),
            Err(_) => {}
        }
    }

    /// One model call with timeout and traces
    async fn ask(
        &self,
        stage: Stage,
        prompt: String,
        ctx: &RepairContext<'_>,
        sink: &dyn TraceSink,
        cancel: &CancellationToken,
    ) -> Result<String, RepairError> {
        if cancel.is_cancelled() {
            return Err(RepairError::Cancelled);
        }
        let task = stage
            .task()
            .ok_or_else(|| RepairError::Model(format!("{stage} does not call the model")))?;
        self.trace(sink, ctx, stage, TraceStatus::Started, format!("{task} request"), None);
        let started = Instant::now();

        let result = match tokio::time::timeout(
            self.config.model_timeout(),
            self.model.complete(ModelRequest::new(task, prompt)),
        )
        .await
        {
            Ok(Ok(reply)) if reply.trim().is_empty() => Err(RepairError::Malformed("empty reply".into())),
            Ok(result) => result,
            Err(_) => Err(RepairError::Timeout {
                secs: self.config.model_timeout_secs,
            }),
        };

        let elapsed = elapsed_ms(started);
        match &result {
            Ok(_) => self.trace(sink, ctx, stage, TraceStatus::Completed, "ok", Some(elapsed)),
            Err(e) => {
                tracing::warn!(stage = stage.as_str(), iteration = ctx.iteration, error = %e, "model stage failed");
                self.trace(sink, ctx, stage, TraceStatus::Failed, e.to_string(), Some(elapsed));
            }
        }
        result
    }

    /// Run a candidate through the sandbox
    async fn validate(
        &self,
        code: &str,
        ctx: &RepairContext<'_>,
        sink: &dyn TraceSink,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, RepairError> {
        if cancel.is_cancelled() {
            return Err(RepairError::Cancelled);
        }
        self.trace(sink, ctx, Stage::Validator, TraceStatus::Started, "executing candidate", None);
        let started = Instant::now();
        let outcome = self
            .sandbox
            .execute(code, ctx.language, Admission::Queue, Some(cancel))
            .await;
        let elapsed = elapsed_ms(started);
        match outcome {
            Ok(outcome) => {
                let verdict = if outcome.is_success() { "passed" } else { "rejected" };
                self.trace(
                    sink,
                    ctx,
                    Stage::Validator,
                    TraceStatus::Completed,
                    format!("{verdict}: {}", outcome.summary()),
                    Some(elapsed),
                );
                Ok(outcome)
            }
            Err(e) => {
                self.trace(sink, ctx, Stage::Validator, TraceStatus::Failed, e.to_string(), Some(elapsed));
                Err(e.into())
            }
        }
    }

    fn trace(
        &self,
        sink: &dyn TraceSink,
        ctx: &RepairContext<'_>,
        stage: Stage,
        status: TraceStatus,
        message: impl Into<String>,
        duration_ms: Option<u64>,
    ) {
        let mut event = TraceEvent::new(stage.as_str(), status, message).with_iteration(ctx.iteration);
        if let Some(ms) = duration_ms {
            event = event.with_duration_ms(ms);
        }
        sink.emit(event);
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MockRepairModel;
    use mender_sandbox::{ExecutionRequest, Runtime, SandboxConfig};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    /// Succeeds for code containing `ok`, fails otherwise
    struct KeywordRuntime;

    #[async_trait::async_trait]
    impl Runtime for KeywordRuntime {
        fn name(&self) -> &'static str {
            "keyword"
        }

        async fn run(&self, request: &ExecutionRequest) -> ExecutionOutcome {
            if request.code.contains("ok") {
                ExecutionOutcome::success("fine\n")
            } else {
                ExecutionOutcome::failure(ErrorKind::Value, "ValueError: still broken")
            }
        }
    }

    fn sandbox() -> Arc<Sandbox> {
        Arc::new(Sandbox::with_runtime(SandboxConfig::default(), Arc::new(KeywordRuntime)))
    }

    fn pipeline(model: MockRepairModel, config: PipelineConfig) -> GenerativePipeline {
        GenerativePipeline::new(Arc::new(model), sandbox(), config)
    }

    fn failing() -> ExecutionOutcome {
        ExecutionOutcome::failure(ErrorKind::Name, "NameError: name 'x' is not defined")
    }

    fn interpreter(model: &mut MockRepairModel) {
        model
            .expect_complete()
            .withf(|r| r.task == ModelTask::Interpret)
            .times(1)
            .returning(|_| Ok("Category: name\nFix: define x\n".to_string()));
    }

    /// Generator replies in order
    fn generator(model: &mut MockRepairModel, replies: &'static [&'static str]) {
        let mut next = 0usize;
        model
            .expect_complete()
            .withf(|r| r.task == ModelTask::Generate)
            .times(replies.len())
            .returning(move |_| {
                let reply = replies[next];
                next += 1;
                Ok(reply.to_string())
            });
    }

    fn explainer(model: &mut MockRepairModel) {
        model
            .expect_complete()
            .withf(|r| r.task == ModelTask::Explain)
            .returning(|_| Ok("Defined x before use.".to_string()));
    }

    async fn run(pipeline: &GenerativePipeline) -> (PipelineReport, Vec<TraceEvent>) {
        let events = Mutex::new(Vec::new());
        let sink = |event: TraceEvent| events.lock().push(event);
        let outcome = failing();
        let ctx = RepairContext {
            code: "print(x)\n",
            language: Language::Python,
            outcome: &outcome,
            iteration: 0,
            history: &[],
        };
        let report = pipeline.run(&ctx, &sink, &CancellationToken::new()).await;
        (report, events.into_inner())
    }

    #[test]
    fn test_plan_order_and_bounds() {
        let plan = StagePlan::from_config(&PipelineConfig::default().with_refactor(true));
        let names: Vec<_> = plan.stages().iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(
            names,
            vec!["error_interpreter", "patch_generator", "validator", "test_creator", "refactor", "explainer"]
        );
        assert_eq!(plan.get(Stage::PatchGenerator).max_attempts, 3);
        assert!(!plan.is_enabled(Stage::TestCreator));
        assert!(plan.is_enabled(Stage::Refactor));
        assert!(plan.get(Stage::ErrorInterpreter).required);
    }

    #[tokio::test]
    async fn test_first_candidate_accepted() {
        let mut model = MockRepairModel::new();
        interpreter(&mut model);
        generator(&mut model, &["Define x.\n```python\nx = 'ok'\nprint(x)\n```"]);
        explainer(&mut model);

        let (report, events) = run(&pipeline(model, PipelineConfig::default())).await;
        let accepted = report.accepted.unwrap();
        assert_eq!(accepted.code, "x = 'ok'\nprint(x)\n");
        assert_eq!(accepted.source, PatchSource::Generated);
        assert_eq!(accepted.reasoning, "Define x.");
        assert!(report.rejected.is_empty());
        assert_eq!(report.category, Some(ErrorKind::Name));
        assert_eq!(report.fix_strategy.as_deref(), Some("define x"));
        assert_eq!(report.explanation.as_deref(), Some("Defined x before use."));
        assert!(report.failure.is_none());

        let stages: Vec<_> = events
            .iter()
            .filter(|e| e.status == TraceStatus::Started)
            .map(|e| e.stage.as_str())
            .collect();
        assert_eq!(stages, vec!["error_interpreter", "patch_generator", "validator", "explainer"]);
        assert!(events
            .iter()
            .filter(|e| e.status == TraceStatus::Completed)
            .all(|e| e.duration_ms.is_some()));
    }

    #[tokio::test]
    async fn test_validator_retries_then_accepts() {
        let mut model = MockRepairModel::new();
        interpreter(&mut model);
        generator(
            &mut model,
            &[
                "```python\nx = 1\nprint(x)\n```",
                "```python\nx = 2\nprint(x)\n```",
                "```python\nx = 'ok'\nprint(x)\n```",
            ],
        );
        explainer(&mut model);

        let (report, _) = run(&pipeline(model, PipelineConfig::default())).await;
        let sources: Vec<_> = report.rejected.iter().map(|c| c.source).collect();
        assert_eq!(sources, vec![PatchSource::Generated, PatchSource::GeneratedValidator]);
        assert!(report.rejected.iter().all(|c| !c.validation.is_success()));
        let accepted = report.accepted.unwrap();
        assert_eq!(accepted.source, PatchSource::GeneratedValidator);
        assert!(accepted.validation.is_success());
    }

    #[tokio::test]
    async fn test_retries_exhausted_is_no_patch() {
        let mut model = MockRepairModel::new();
        interpreter(&mut model);
        generator(
            &mut model,
            &[
                "```python\nx = 1\n```",
                "```python\nx = 2\n```",
                "```python\nx = 3\n```",
            ],
        );

        let (report, _) = run(&pipeline(model, PipelineConfig::default())).await;
        assert!(report.accepted.is_none());
        assert_eq!(report.rejected.len(), 3);
        assert_eq!(report.failure, Some(RepairError::Rejected { attempts: 3 }));
    }

    #[tokio::test]
    async fn test_interpreter_failure_aborts() {
        let mut model = MockRepairModel::new();
        model
            .expect_complete()
            .times(1)
            .returning(|_| Err(RepairError::Model("backend down".into())));

        let (report, events) = run(&pipeline(model, PipelineConfig::default())).await;
        assert!(report.accepted.is_none());
        assert!(report.rejected.is_empty());
        assert_eq!(report.failure, Some(RepairError::Model("backend down".into())));
        assert_eq!(events.last().map(|e| e.status), Some(TraceStatus::Failed));
    }

    #[tokio::test]
    async fn test_unchanged_reply_is_no_patch() {
        let mut model = MockRepairModel::new();
        interpreter(&mut model);
        generator(&mut model, &["```python\nprint(x)\n```"]);

        let (report, _) = run(&pipeline(model, PipelineConfig::default())).await;
        assert!(matches!(report.failure, Some(RepairError::Malformed(_))));
        assert!(report.rejected.is_empty());
    }

    #[tokio::test]
    async fn test_failed_refactor_keeps_fix() {
        let mut model = MockRepairModel::new();
        interpreter(&mut model);
        generator(&mut model, &["```python\nx = 'ok'\nprint(x)\n```"]);
        model
            .expect_complete()
            .withf(|r| r.task == ModelTask::Refactor)
            .times(1)
            .returning(|_| Ok("```python\nprint(y)\n```".to_string()));
        explainer(&mut model);

        let config = PipelineConfig::default().with_refactor(true);
        let (report, events) = run(&pipeline(model, config)).await;
        assert_eq!(report.accepted.unwrap().code, "x = 'ok'\nprint(x)\n");
        assert!(events
            .iter()
            .any(|e| e.stage == "refactor" && e.status == TraceStatus::Warning));
    }

    #[tokio::test]
    async fn test_tests_and_passing_refactor() {
        let mut model = MockRepairModel::new();
        interpreter(&mut model);
        generator(&mut model, &["```python\nx = 'ok'\nprint(x)\n```"]);
        model
            .expect_complete()
            .withf(|r| r.task == ModelTask::CreateTests)
            .times(1)
            .returning(|_| Ok("```python\nassert x == 'ok'\n```".to_string()));
        model
            .expect_complete()
            .withf(|r| r.task == ModelTask::Refactor)
            .times(1)
            .returning(|_| Ok("```python\nprint('ok')\n```".to_string()));
        explainer(&mut model);

        let config = PipelineConfig::default()
            .with_generate_tests(true)
            .with_refactor(true);
        let (report, _) = run(&pipeline(model, config)).await;
        assert_eq!(report.generated_tests.as_deref(), Some("assert x == 'ok'"));
        let accepted = report.accepted.unwrap();
        assert_eq!(accepted.code, "print('ok')\n");
        assert!(accepted.reasoning.ends_with("(refactored)"));
    }

    struct SlowModel;

    #[async_trait::async_trait]
    impl RepairModel for SlowModel {
        async fn complete(&self, _request: ModelRequest) -> Result<String, RepairError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("Category: name".to_string())
        }
    }

    #[tokio::test]
    async fn test_model_timeout_is_no_patch() {
        let pipeline = GenerativePipeline::new(
            Arc::new(SlowModel),
            sandbox(),
            PipelineConfig::default().with_model_timeout_secs(1),
        );
        let outcome = failing();
        let ctx = RepairContext {
            code: "print(x)\n",
            language: Language::Python,
            outcome: &outcome,
            iteration: 2,
            history: &[],
        };
        let sink = |_: TraceEvent| {};
        let report = pipeline.run(&ctx, &sink, &CancellationToken::new()).await;
        assert_eq!(report.failure, Some(RepairError::Timeout { secs: 1 }));
        assert!(report.failure.as_ref().is_some_and(RepairError::is_retryable));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let model = MockRepairModel::new();
        let pipeline = pipeline(model, PipelineConfig::default());
        let outcome = failing();
        let ctx = RepairContext {
            code: "print(x)\n",
            language: Language::Python,
            outcome: &outcome,
            iteration: 0,
            history: &[],
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sink = |_: TraceEvent| {};
        let report = pipeline.run(&ctx, &sink, &cancel).await;
        assert_eq!(report.failure, Some(RepairError::Cancelled));
    }
}
