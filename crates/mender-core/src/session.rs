//! Debug session record

use crate::error::{MenderError, TransitionError};
use crate::state_machine::{validate_transition, SessionStatus};
use chrono::{DateTime, Utc};
use mender_ledger::{LedgerError, SessionLedger, TraceEvent, TraceRecord, TraceStatus, Version};
use mender_sandbox::Language;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use ulid::Ulid;

/// Unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Ulid);

impl SessionId {
    /// Generate new session ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = MenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s.trim())
            .map(Self)
            .map_err(|e| MenderError::Config(format!("invalid session id {s:?}: {e}")))
    }
}

/// One debug session: the submitted program, its status and its ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Identifier
    pub id: SessionId,
    /// Code as submitted
    pub original_code: String,
    /// Program language
    pub language: Language,
    /// Iteration budget
    pub max_iterations: u32,
    /// Applied patches so far
    pub current_iteration: u32,
    /// Lifecycle status
    pub status: SessionStatus,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Time the session became terminal
    pub completed_at: Option<DateTime<Utc>>,
    /// Code of the latest version once terminal
    pub final_code: Option<String>,
    /// Versions, patches and traces
    pub ledger: SessionLedger,
}

impl Session {
    /// Create a running session with version 0 holding `code`
    ///
    /// # Errors
    /// Never in practice; a fresh ledger always accepts version 0
    pub(crate) fn new(code: impl Into<String>, language: Language, max_iterations: u32) -> Result<Self, LedgerError> {
        let code = code.into();
        let mut ledger = SessionLedger::new();
        ledger.create_version(code.clone())?;
        Ok(Self {
            id: SessionId::new(),
            original_code: code,
            language,
            max_iterations,
            current_iteration: 0,
            status: SessionStatus::Running,
            created_at: Utc::now(),
            completed_at: None,
            final_code: None,
            ledger,
        })
    }

    /// Latest version
    #[inline]
    #[must_use]
    pub fn current_version(&self) -> Option<&Version> {
        self.ledger.current()
    }

    /// Whether the session has reached a terminal status
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Append a trace event and mirror it to the log
    pub(crate) fn trace(&mut self, event: TraceEvent) -> &TraceRecord {
        match event.status {
            TraceStatus::Failed | TraceStatus::Warning => tracing::warn!(
                session = %self.id,
                stage = %event.stage,
                status = %event.status,
                iteration = ?event.iteration,
                "{}",
                event.message
            ),
            _ => tracing::debug!(
                session = %self.id,
                stage = %event.stage,
                status = %event.status,
                iteration = ?event.iteration,
                "{}",
                event.message
            ),
        }
        self.ledger.append_trace(event)
    }

    /// Move to `to`; a terminal status freezes the final code and seals the ledger
    ///
    /// # Errors
    /// `TransitionError::Illegal` for a transition out of a terminal status
    pub(crate) fn transition(&mut self, to: SessionStatus) -> Result<(), TransitionError> {
        validate_transition(self.status, to)?;
        self.status = to;
        if to.is_terminal() {
            self.completed_at = Some(Utc::now());
            self.final_code = self.ledger.current().map(|v| v.code.clone());
            self.ledger.seal();
        }
        Ok(())
    }

    /// Compact status view
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        let patches = self.ledger.patches();
        SessionSummary {
            id: self.id,
            status: self.status,
            language: self.language,
            current_version: self.ledger.current().map_or(0, |v| v.number),
            current_iteration: self.current_iteration,
            max_iterations: self.max_iterations,
            patch_count: patches.len(),
            applied_patches: patches.iter().filter(|p| p.applied).count(),
            last_trace: self.ledger.traces().last().map(|r| r.event.message.clone()),
        }
    }
}

/// Status view of a session without its ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Identifier
    pub id: SessionId,
    /// Lifecycle status
    pub status: SessionStatus,
    /// Program language
    pub language: Language,
    /// Number of the latest version
    pub current_version: u32,
    /// Applied patches so far
    pub current_iteration: u32,
    /// Iteration budget
    pub max_iterations: u32,
    /// Patches recorded, applied or not
    pub patch_count: usize,
    /// Patches that produced a version
    pub applied_patches: usize,
    /// Message of the latest trace event
    pub last_trace: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mender_sandbox::ExecutionOutcome;

    #[test]
    fn test_new_session_has_version_zero() {
        let session = Session::new("print(1)\n", Language::Python, 3).unwrap();
        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.ledger.versions().len(), 1);
        assert_eq!(session.current_version().unwrap().code, "print(1)\n");
        assert!(session.final_code.is_none());
    }

    #[test]
    fn test_terminal_transition_seals_and_freezes() {
        let mut session = Session::new("print(1)\n", Language::Python, 3).unwrap();
        session
            .ledger
            .record_outcome(0, ExecutionOutcome::success("1\n"))
            .unwrap();
        session.transition(SessionStatus::Succeeded).unwrap();
        assert!(session.is_terminal());
        assert!(session.completed_at.is_some());
        assert_eq!(session.final_code.as_deref(), Some("print(1)\n"));
        assert!(session.ledger.is_sealed());

        let err = session.transition(SessionStatus::Failed).unwrap_err();
        assert_eq!(
            err,
            TransitionError::Illegal {
                from: SessionStatus::Succeeded,
                to: SessionStatus::Failed
            }
        );
    }

    #[test]
    fn test_traces_allowed_after_terminal() {
        let mut session = Session::new("x", Language::Python, 1).unwrap();
        session.transition(SessionStatus::Failed).unwrap();
        session.trace(TraceEvent::new("orchestrator", TraceStatus::Info, "post-mortem"));
        assert_eq!(session.summary().last_trace.as_deref(), Some("post-mortem"));
        assert!(session.ledger.verify_traces().is_ok());
    }

    #[test]
    fn test_session_id_parses_back() {
        let id = SessionId::new();
        assert_eq!(id.to_string().parse::<SessionId>().unwrap(), id);
        assert!("not-a-ulid".parse::<SessionId>().is_err());
    }
}
