//! Error types for the orchestrator
//!
//! Maps the four failure classes of a debug session:
//! - program failures never appear here; they are outcomes that drive the loop
//! - capability failures (`Repair`) are recovered by falling through to the
//!   next stage
//! - resource exhaustion (`Admission`) is retryable and surfaced to callers
//! - contract violations (`Ledger`, `Transition`) abort the session

use crate::session::SessionId;
use crate::state_machine::SessionStatus;
use mender_ledger::LedgerError;
use mender_repair::RepairError;
use mender_sandbox::{AdmissionError, SandboxError};

/// Main mender error type
#[derive(Debug, thiserror::Error)]
pub enum MenderError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// No session with this id
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    /// Session has no such version
    #[error("session {session} has no version {version}")]
    UnknownVersion {
        /// Session
        session: SessionId,
        /// Requested version
        version: u32,
    },

    /// Sandbox setup failed
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// Sandbox pool saturated or closed
    #[error("admission failed: {0}")]
    Admission(#[from] AdmissionError),

    /// Ledger contract violated
    #[error("ledger invariant violated: {0}")]
    Ledger(#[from] LedgerError),

    /// Repair stage failed
    #[error("repair failed: {0}")]
    Repair(#[from] RepairError),

    /// Illegal status change
    #[error("state machine error: {0}")]
    Transition(#[from] TransitionError),

    /// No async runtime to drive sessions on
    #[error("no tokio runtime: {0}")]
    Runtime(String),
}

impl MenderError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Admission(e) => e.is_retryable(),
            Self::Repair(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Check if error is a broken invariant (a bug, never tolerated)
    #[inline]
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::Ledger(_) | Self::Transition(_))
    }
}

/// Status transition errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// Transition not in the allowed table
    #[error("illegal transition {from} -> {to}")]
    Illegal {
        /// Current status
        from: SessionStatus,
        /// Requested status
        to: SessionStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let saturated = MenderError::from(AdmissionError::Saturated { limit: 2, waited_ms: 10 });
        assert!(saturated.is_retryable());
        assert!(!saturated.is_invariant_violation());

        let timeout = MenderError::from(RepairError::Timeout { secs: 60 });
        assert!(timeout.is_retryable());

        let broken = MenderError::from(LedgerError::NonContiguous { from: 1, to: 3 });
        assert!(broken.is_invariant_violation());
        assert!(!broken.is_retryable());

        let illegal = MenderError::from(TransitionError::Illegal {
            from: SessionStatus::Succeeded,
            to: SessionStatus::Running,
        });
        assert!(illegal.is_invariant_violation());
        assert_eq!(illegal.to_string(), "state machine error: illegal transition succeeded -> running");
    }
}
