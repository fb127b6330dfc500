//! Testing utilities for the mender workspace
//!
//! Deterministic stand-ins for the two external capabilities, so session
//! scenarios run without interpreters or models:
//! - [`ScriptedRunner`]: a sandbox [`Runtime`] whose outcome is chosen by the code text
//! - [`ScriptedModel`]: a [`RepairModel`] replaying queued replies per task

#![allow(missing_docs)]

use mender_repair::{ModelRequest, ModelTask, RepairError, RepairModel};
use mender_sandbox::{ErrorKind, ExecutionOutcome, ExecutionRequest, Runtime, Sandbox, SandboxConfig};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Runtime that picks an outcome by substring of the submitted code.
///
/// Rules are checked in insertion order; the fallback applies when none match.
#[derive(Debug)]
pub struct ScriptedRunner {
    rules: Vec<(String, ExecutionOutcome)>,
    fallback: ExecutionOutcome,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fallback: ExecutionOutcome::success(""),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn when(mut self, needle: impl Into<String>, outcome: ExecutionOutcome) -> Self {
        self.rules.push((needle.into(), outcome));
        self
    }

    #[must_use]
    pub fn otherwise(mut self, outcome: ExecutionOutcome) -> Self {
        self.fallback = outcome;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Codes executed so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Highest number of simultaneous runs observed
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Runtime for ScriptedRunner {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn run(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        self.calls.lock().push(request.code.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.rules
            .iter()
            .find(|(needle, _)| request.code.contains(needle.as_str()))
            .map_or_else(|| self.fallback.clone(), |(_, outcome)| outcome.clone())
    }
}

/// Model replaying queued replies per task.
///
/// An empty queue answers with `RepairError::Model`.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<HashMap<ModelTask, VecDeque<Result<String, RepairError>>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn reply(self, task: ModelTask, text: impl Into<String>) -> Self {
        self.replies.lock().entry(task).or_default().push_back(Ok(text.into()));
        self
    }

    #[must_use]
    pub fn fail(self, task: ModelTask, error: RepairError) -> Self {
        self.replies.lock().entry(task).or_default().push_back(Err(error));
        self
    }

    /// Requests received so far, in order
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }

    pub fn count(&self, task: ModelTask) -> usize {
        self.requests.lock().iter().filter(|r| r.task == task).count()
    }
}

#[async_trait::async_trait]
impl RepairModel for ScriptedModel {
    async fn complete(&self, request: ModelRequest) -> Result<String, RepairError> {
        let task = request.task;
        self.requests.lock().push(request);
        self.replies
            .lock()
            .get_mut(&task)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(RepairError::Model(format!("no scripted reply for {task}"))))
    }
}

/// Sandbox backed by `runner` with default limits
pub fn sandbox_with(runner: Arc<ScriptedRunner>) -> Arc<Sandbox> {
    Arc::new(Sandbox::with_runtime(SandboxConfig::default(), runner))
}

/// Wrap code in a fenced block the way a model would
pub fn fenced(code: &str) -> String {
    format!("Here is the fix.\n```python\n{}\n```\n", code.trim_end())
}

pub fn index_error() -> ExecutionOutcome {
    ExecutionOutcome::failure(
        ErrorKind::Index,
        "Traceback (most recent call last):\n  File \"main.py\", line 3, in <module>\n    print(xs[i])\nIndexError: list index out of range\n",
    )
}

pub fn name_error(name: &str) -> ExecutionOutcome {
    ExecutionOutcome::failure(
        ErrorKind::Name,
        format!(
            "Traceback (most recent call last):\n  File \"main.py\", line 1, in <module>\nNameError: name '{name}' is not defined\n"
        ),
    )
}

pub fn zero_division() -> ExecutionOutcome {
    ExecutionOutcome::failure(
        ErrorKind::Runtime,
        "Traceback (most recent call last):\n  File \"main.py\", line 2, in <module>\nZeroDivisionError: division by zero\n",
    )
}

pub fn timeout() -> ExecutionOutcome {
    ExecutionOutcome::timed_out("partial\n", "")
}

/// Off-by-one loop the default rule table repairs
pub const OFF_BY_ONE: &str = "xs = [1, 2, 3]\nfor i in range(len(xs) + 1):\n    print(xs[i])\n";

/// The repaired form of [`OFF_BY_ONE`]
pub const OFF_BY_ONE_FIXED: &str = "xs = [1, 2, 3]\nfor i in range(len(xs)):\n    print(xs[i])\n";

/// Program no rule can fix
pub const DIVIDE_BY_ZERO: &str = "total = 10\nprint(total / 0)\n";

/// Program that already works
pub const HELLO: &str = "print('hello')\n";
