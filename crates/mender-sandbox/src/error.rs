//! Error types for the sandbox
//!
//! [`SandboxError`] describes infrastructure faults inside a runtime. It never
//! escapes [`crate::Sandbox::execute`]: runtimes fold it into an `error`
//! outcome. [`AdmissionError`] is the one failure surfaced to callers.

use std::io;

/// Infrastructure fault while preparing or running a program
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Language tag not recognised
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Private working directory could not be prepared
    #[error("failed to prepare working directory: {0}")]
    Workspace(#[source] io::Error),

    /// Runtime binary could not be started
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Waiting on the child process failed
    #[error("failed to wait for child process: {0}")]
    Wait(#[source] io::Error),

    /// Invalid limits
    #[error("invalid sandbox configuration: {0}")]
    Config(String),
}

/// Admission to the execution pool was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// Pool stayed full for the whole admission window
    #[error("execution pool saturated: {limit} executions in flight, waited {waited_ms}ms")]
    Saturated {
        /// Configured concurrency limit
        limit: usize,
        /// How long the request queued
        waited_ms: u64,
    },

    /// Caller cancelled while queued
    #[error("admission cancelled while queued")]
    Cancelled,

    /// Pool was closed
    #[error("execution pool closed")]
    Closed,
}

impl AdmissionError {
    /// Check if the caller may retry later
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Saturated { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_saturation_is_retryable() {
        assert!(AdmissionError::Saturated {
            limit: 2,
            waited_ms: 10
        }
        .is_retryable());
        assert!(!AdmissionError::Cancelled.is_retryable());
        assert!(!AdmissionError::Closed.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = SandboxError::UnsupportedLanguage("cobol".to_string());
        assert_eq!(err.to_string(), "unsupported language: cobol");
    }
}
