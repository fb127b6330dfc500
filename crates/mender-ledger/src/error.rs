//! Error types for the ledger

use crate::patch::PatchId;

/// Ledger contract violations
///
/// Every variant is a programming error on the caller's side: the ledger
/// never tolerates a non-contiguous or post-terminal write.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Write attempted after the session reached a terminal state
    #[error("ledger is sealed")]
    Sealed,

    /// Version numbers no longer fit in a `u32`
    #[error("version numbers exhausted after {0} versions")]
    VersionOverflow(usize),

    /// Referenced version does not exist
    #[error("unknown version {0}")]
    UnknownVersion(u32),

    /// New version requested while the latest one has no outcome yet
    #[error("version {0} has no execution outcome yet")]
    PendingOutcome(u32),

    /// Outcome slot already filled
    #[error("version {0} already has an execution outcome")]
    OutcomeAlreadyRecorded(u32),

    /// Patch does not connect consecutive versions
    #[error("patch {from} -> {to} is not contiguous")]
    NonContiguous {
        /// Source version
        from: u32,
        /// Target version
        to: u32,
    },

    /// Patch id already recorded
    #[error("patch {0} already recorded")]
    DuplicatePatch(PatchId),

    /// A second applied patch targets the same version
    #[error("version {0} already has an applied patch")]
    DuplicateTransition(u32),

    /// Applied patch's diff does not reproduce its target version
    #[error("patch {from} -> {to} does not reproduce the target version: {reason}")]
    DiffMismatch {
        /// Source version
        from: u32,
        /// Target version
        to: u32,
        /// What went wrong
        reason: String,
    },

    /// Trace chain broken
    #[error("trace chain broken at sequence {0}")]
    TraceIntegrity(u64),
}

/// Unified diff parse/apply failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiffError {
    /// Text is not a unified diff
    #[error("malformed diff at line {line}: {reason}")]
    Malformed {
        /// 1-based line in the diff text
        line: usize,
        /// What was expected
        reason: String,
    },

    /// Hunk body does not match its header counts
    #[error("hunk {hunk} line counts do not match its header")]
    CountMismatch {
        /// 1-based hunk index
        hunk: usize,
    },

    /// Hunk starts outside the text or overlaps the previous hunk
    #[error("hunk {hunk} is out of range")]
    HunkOutOfRange {
        /// 1-based hunk index
        hunk: usize,
    },

    /// Context or removed line differs from the text being patched
    #[error("mismatch at line {line}: expected {expected:?}, found {found:?}")]
    ContextMismatch {
        /// 1-based line in the original text
        line: usize,
        /// Line in the diff
        expected: String,
        /// Line in the text
        found: String,
    },
}
