//! Session status machine
//!
//! `running` is the only non-terminal status; every terminal status is a sink.

use crate::error::TransitionError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Lifecycle status of a debug session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Loop in progress
    #[default]
    Running,
    /// Latest version executed successfully
    Succeeded,
    /// No stage could produce a patch, the session was cancelled, or an
    /// invariant broke
    Failed,
    /// Iteration budget used up without success
    Exhausted,
}

impl SessionStatus {
    /// All statuses
    pub const ALL: [Self; 4] = [Self::Running, Self::Succeeded, Self::Failed, Self::Exhausted];

    /// Label
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Exhausted => "exhausted",
        }
    }

    /// Whether no further transitions are possible
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validates a status transition.
///
/// # Errors
/// `TransitionError::Illegal` if `to` is not reachable from `from`
pub fn validate_transition(from: SessionStatus, to: SessionStatus) -> Result<(), TransitionError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(TransitionError::Illegal { from, to })
    }
}

/// Statuses reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: SessionStatus) -> Vec<SessionStatus> {
    use SessionStatus::{Exhausted, Failed, Running, Succeeded};
    match from {
        Running => vec![Succeeded, Failed, Exhausted],
        Succeeded | Failed | Exhausted => vec![],
    }
}
