//! Model capability seam
//!
//! The generative pipeline only needs "complete this prompt for this task".
//! Backends (hosted APIs, local models, scripted fakes) implement
//! [`RepairModel`]; the pipeline adds timeouts, tracing and reply parsing.

use crate::error::RepairError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Which pipeline stage is asking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTask {
    /// Classify and analyse a failure
    Interpret,
    /// Propose replacement code
    Generate,
    /// Write auxiliary tests for accepted code
    CreateTests,
    /// Tidy accepted code without changing behavior
    Refactor,
    /// Summarize the fix for a human
    Explain,
}

impl ModelTask {
    /// Label
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Interpret => "interpret",
            Self::Generate => "generate",
            Self::CreateTests => "create_tests",
            Self::Refactor => "refactor",
            Self::Explain => "explain",
        }
    }
}

impl Display for ModelTask {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completion request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Requesting task
    pub task: ModelTask,
    /// Fully rendered prompt
    pub prompt: String,
}

impl ModelRequest {
    /// Create request
    #[inline]
    #[must_use]
    pub fn new(task: ModelTask, prompt: impl Into<String>) -> Self {
        Self {
            task,
            prompt: prompt.into(),
        }
    }
}

/// Text-completion capability used by the generative pipeline
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RepairModel: Send + Sync {
    /// Complete `request`, returning the raw reply text.
    ///
    /// # Errors
    /// `RepairError::Model` for backend failures
    async fn complete(&self, request: ModelRequest) -> Result<String, RepairError>;
}
