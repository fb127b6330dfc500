//! Immutable code snapshots

use crate::hash::ContentHash;
use chrono::{DateTime, Utc};
use mender_sandbox::ExecutionOutcome;
use serde::{Deserialize, Serialize};

/// One accepted code state of a session.
///
/// Version 0 is the submitted code. The outcome slot is filled exactly once,
/// after the version has been executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Contiguous number starting at 0
    pub number: u32,
    /// Code text
    pub code: String,
    /// BLAKE3 of `code`
    pub content_hash: ContentHash,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Outcome of executing `code`, once known
    pub outcome: Option<ExecutionOutcome>,
}

impl Version {
    pub(crate) fn new(number: u32, code: String) -> Self {
        Self {
            number,
            content_hash: ContentHash::of(&code),
            code,
            created_at: Utc::now(),
            outcome: None,
        }
    }

    /// Whether this version ran successfully
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome.as_ref().is_some_and(ExecutionOutcome::is_success)
    }
}
