//! Patch records
//!
//! A [`Patch`] records one repair attempt between two consecutive version
//! numbers. `applied = true` means the attempt was made the session's
//! current version, not that it fixed anything. Rejected attempts keep
//! `applied = false`, point at the slot they targeted, and carry the
//! validator outcome that rejected them.

use crate::diff::unified_diff;
use chrono::{DateTime, Utc};
use mender_sandbox::{ErrorKind, ExecutionOutcome};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use uuid::Uuid;

/// Unique patch identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatchId(Uuid);

impl PatchId {
    /// Generate new random ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for PatchId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which stage authored a patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchSource {
    /// Deterministic pattern rule
    RuleBased,
    /// First generator attempt of an iteration
    Generated,
    /// Generator attempt driven by a validator rejection
    GeneratedValidator,
}

impl PatchSource {
    /// Label used in logs and metrics
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RuleBased => "rule_based",
            Self::Generated => "generated",
            Self::GeneratedValidator => "generated_validator",
        }
    }

    /// Whether the generative pipeline authored this patch
    #[inline]
    #[must_use]
    pub const fn is_generated(&self) -> bool {
        matches!(self, Self::Generated | Self::GeneratedValidator)
    }
}

impl Display for PatchSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one repair attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Unique id
    pub id: PatchId,
    /// Version the attempt started from
    pub from_version: u32,
    /// Version slot the attempt produced (or targeted, when rejected)
    pub to_version: u32,
    /// Authoring stage
    pub source: PatchSource,
    /// Short rationale
    pub reasoning: String,
    /// Unified diff from `from_version`'s code to the candidate code
    pub diff: String,
    /// Attempted and made current
    pub applied: bool,
    /// Error category the fix addresses
    pub error_category: Option<ErrorKind>,
    /// Free-text analysis of the failure
    pub error_analysis: Option<String>,
    /// Free-text fix strategy
    pub fix_strategy: Option<String>,
    /// Human-readable explanation of the fix
    pub explanation: Option<String>,
    /// Auxiliary tests generated for the fix
    pub generated_tests: Option<String>,
    /// Validator outcome for generated candidates
    pub validation: Option<ExecutionOutcome>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Patch {
    /// Create an unapplied patch from `from_version` to `from_version + 1`.
    ///
    /// The diff is computed from `from_code` to `to_code`.
    #[must_use]
    pub fn new(
        from_version: u32,
        from_code: &str,
        to_code: &str,
        source: PatchSource,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            id: PatchId::new(),
            from_version,
            to_version: from_version + 1,
            source,
            reasoning: reasoning.into(),
            diff: unified_diff(from_code, to_code),
            applied: false,
            error_category: None,
            error_analysis: None,
            fix_strategy: None,
            explanation: None,
            generated_tests: None,
            validation: None,
            created_at: Utc::now(),
        }
    }

    /// Mark as applied
    #[inline]
    #[must_use]
    pub fn with_applied(mut self, applied: bool) -> Self {
        self.applied = applied;
        self
    }

    /// Set error category
    #[inline]
    #[must_use]
    pub fn with_error_category(mut self, category: Option<ErrorKind>) -> Self {
        self.error_category = category;
        self
    }

    /// Set error analysis
    #[inline]
    #[must_use]
    pub fn with_error_analysis(mut self, analysis: Option<String>) -> Self {
        self.error_analysis = analysis;
        self
    }

    /// Set fix strategy
    #[inline]
    #[must_use]
    pub fn with_fix_strategy(mut self, strategy: Option<String>) -> Self {
        self.fix_strategy = strategy;
        self
    }

    /// Set explanation
    #[inline]
    #[must_use]
    pub fn with_explanation(mut self, explanation: Option<String>) -> Self {
        self.explanation = explanation;
        self
    }

    /// Set generated tests
    #[inline]
    #[must_use]
    pub fn with_generated_tests(mut self, tests: Option<String>) -> Self {
        self.generated_tests = tests;
        self
    }

    /// Set validator outcome
    #[inline]
    #[must_use]
    pub fn with_validation(mut self, outcome: Option<ExecutionOutcome>) -> Self {
        self.validation = outcome;
        self
    }
}
