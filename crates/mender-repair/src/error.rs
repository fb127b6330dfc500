//! Error types for the repair stages
//!
//! None of these is fatal to a session: the orchestrator treats every
//! `RepairError` as "no patch from this stage".

use mender_sandbox::AdmissionError;

/// Repair stage failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepairError {
    /// Model call exceeded its timeout
    #[error("model call timed out after {secs}s")]
    Timeout {
        /// Configured timeout
        secs: u64,
    },

    /// Model backend reported a failure
    #[error("model failed: {0}")]
    Model(String),

    /// Model reply could not be used
    #[error("malformed model reply: {0}")]
    Malformed(String),

    /// A pattern rule failed
    #[error("rule {rule} failed: {reason}")]
    Rule {
        /// Rule name
        rule: &'static str,
        /// What went wrong
        reason: String,
    },

    /// Every generated candidate was rejected by the validator
    #[error("validator rejected all {attempts} candidates")]
    Rejected {
        /// Candidates tried
        attempts: u32,
    },

    /// Validator could not get an execution slot
    #[error("validator admission failed: {0}")]
    Admission(#[from] AdmissionError),

    /// Session was cancelled between stages
    #[error("repair cancelled")]
    Cancelled,
}

impl RepairError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Admission(e) => e.is_retryable(),
            _ => false,
        }
    }
}
