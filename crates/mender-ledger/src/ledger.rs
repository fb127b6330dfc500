//! Per-session append-only ledger
//!
//! Enforces the version/patch contract:
//! - version numbers are contiguous from 0
//! - a new version needs the previous one's outcome to be recorded
//! - each version's outcome is recorded exactly once
//! - every patch starts at an existing version and targets the next number
//! - an applied patch's target exists and its diff reproduces it exactly
//! - nothing but traces may be appended once sealed

use crate::diff;
use crate::error::LedgerError;
use crate::patch::Patch;
use crate::trace::{TraceEvent, TraceLog, TraceRecord};
use crate::version::Version;
use mender_sandbox::ExecutionOutcome;
use serde::{Deserialize, Serialize};

/// Versions, patches and traces of one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLedger {
    versions: Vec<Version>,
    patches: Vec<Patch>,
    traces: TraceLog,
    sealed: bool,
}

impl SessionLedger {
    /// Create empty ledger
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next version
    ///
    /// # Errors
    /// - `LedgerError::Sealed` once the session is terminal
    /// - `LedgerError::PendingOutcome` if the latest version has not run yet
    /// - `LedgerError::VersionOverflow` if the next number does not fit in a `u32`
    pub fn create_version(&mut self, code: impl Into<String>) -> Result<&Version, LedgerError> {
        if self.sealed {
            return Err(LedgerError::Sealed);
        }
        if let Some(last) = self.versions.last() {
            if last.outcome.is_none() {
                return Err(LedgerError::PendingOutcome(last.number));
            }
        }
        let number = next_number(self.versions.len())?;
        self.versions.push(Version::new(number, code.into()));
        tracing::trace!(version = number, "version created");
        Ok(&self.versions[self.versions.len() - 1])
    }

    /// Fill a version's outcome slot
    ///
    /// # Errors
    /// - `LedgerError::Sealed` once the session is terminal
    /// - `LedgerError::UnknownVersion` for a missing version
    /// - `LedgerError::OutcomeAlreadyRecorded` on a second call
    pub fn record_outcome(&mut self, number: u32, outcome: ExecutionOutcome) -> Result<(), LedgerError> {
        if self.sealed {
            return Err(LedgerError::Sealed);
        }
        let version = self
            .versions
            .get_mut(number as usize)
            .ok_or(LedgerError::UnknownVersion(number))?;
        if version.outcome.is_some() {
            return Err(LedgerError::OutcomeAlreadyRecorded(number));
        }
        version.outcome = Some(outcome);
        Ok(())
    }

    /// Append a patch record
    ///
    /// # Errors
    /// Any violation of the patch contract listed in the module docs
    pub fn record_patch(&mut self, patch: Patch) -> Result<(), LedgerError> {
        if self.sealed {
            return Err(LedgerError::Sealed);
        }
        let from = self
            .versions
            .get(patch.from_version as usize)
            .ok_or(LedgerError::UnknownVersion(patch.from_version))?;
        if patch.to_version != patch.from_version + 1 {
            return Err(LedgerError::NonContiguous {
                from: patch.from_version,
                to: patch.to_version,
            });
        }
        if self.patches.iter().any(|p| p.id == patch.id) {
            return Err(LedgerError::DuplicatePatch(patch.id));
        }
        if patch.applied {
            let to = self
                .versions
                .get(patch.to_version as usize)
                .ok_or(LedgerError::UnknownVersion(patch.to_version))?;
            if self
                .patches
                .iter()
                .any(|p| p.applied && p.to_version == patch.to_version)
            {
                return Err(LedgerError::DuplicateTransition(patch.to_version));
            }
            let mismatch = |reason: String| LedgerError::DiffMismatch {
                from: patch.from_version,
                to: patch.to_version,
                reason,
            };
            let rebuilt = diff::apply(&from.code, &patch.diff).map_err(|e| mismatch(e.to_string()))?;
            if rebuilt != to.code {
                return Err(mismatch("result differs from target code".to_string()));
            }
        }
        tracing::trace!(
            from = patch.from_version,
            to = patch.to_version,
            source = %patch.source,
            applied = patch.applied,
            "patch recorded"
        );
        self.patches.push(patch);
        Ok(())
    }

    /// Append a trace event; allowed after sealing for post-hoc diagnostics
    pub fn append_trace(&mut self, event: TraceEvent) -> &TraceRecord {
        self.traces.append(event)
    }

    /// Refuse all further version and patch writes
    #[inline]
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Whether the ledger is sealed
    #[inline]
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// All versions, in order
    #[inline]
    #[must_use]
    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    /// All patches, in order
    #[inline]
    #[must_use]
    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    /// All trace records, in order
    #[inline]
    #[must_use]
    pub fn traces(&self) -> &[TraceRecord] {
        self.traces.records()
    }

    /// Latest version
    #[inline]
    #[must_use]
    pub fn current(&self) -> Option<&Version> {
        self.versions.last()
    }

    /// Version by number
    #[inline]
    #[must_use]
    pub fn version(&self, number: u32) -> Option<&Version> {
        self.versions.get(number as usize)
    }

    /// Earlier version with the same content as `number`, if any
    #[must_use]
    pub fn earlier_duplicate(&self, number: u32) -> Option<&Version> {
        let target = self.version(number)?;
        self.versions[..number as usize]
            .iter()
            .find(|v| v.content_hash == target.content_hash)
    }

    /// Verify the trace chain
    ///
    /// # Errors
    /// `LedgerError::TraceIntegrity` with the first bad sequence number
    pub fn verify_traces(&self) -> Result<(), LedgerError> {
        self.traces.verify_integrity()
    }
}

fn next_number(len: usize) -> Result<u32, LedgerError> {
    u32::try_from(len).map_err(|_| LedgerError::VersionOverflow(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::PatchSource;
    use crate::trace::TraceStatus;
    use mender_sandbox::{ErrorKind, ExecutionOutcome};

    fn failing() -> ExecutionOutcome {
        ExecutionOutcome::failure(ErrorKind::Name, "NameError: name 'x' is not defined")
    }

    #[test]
    fn test_versions_are_contiguous_and_need_outcomes() {
        let mut ledger = SessionLedger::new();
        assert_eq!(ledger.create_version("v0").unwrap().number, 0);
        assert_eq!(
            ledger.create_version("v1").unwrap_err(),
            LedgerError::PendingOutcome(0)
        );
        ledger.record_outcome(0, failing()).unwrap();
        assert_eq!(ledger.create_version("v1").unwrap().number, 1);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_version_number_overflow_has_its_own_error() {
        assert_eq!(next_number(3), Ok(3));
        let len = u32::MAX as usize + 1;
        assert_eq!(next_number(len), Err(LedgerError::VersionOverflow(len)));
    }

    #[test]
    fn test_outcome_recorded_once() {
        let mut ledger = SessionLedger::new();
        ledger.create_version("x").unwrap();
        ledger.record_outcome(0, failing()).unwrap();
        assert_eq!(
            ledger.record_outcome(0, failing()).unwrap_err(),
            LedgerError::OutcomeAlreadyRecorded(0)
        );
        assert_eq!(
            ledger.record_outcome(7, failing()).unwrap_err(),
            LedgerError::UnknownVersion(7)
        );
    }

    #[test]
    fn test_applied_patch_must_reproduce_target() {
        let mut ledger = SessionLedger::new();
        ledger.create_version("print(x)\n").unwrap();
        ledger.record_outcome(0, failing()).unwrap();
        ledger.create_version("print(1)\n").unwrap();

        let wrong = Patch::new(0, "print(x)\n", "print(2)\n", PatchSource::RuleBased, "r").with_applied(true);
        assert!(matches!(
            ledger.record_patch(wrong),
            Err(LedgerError::DiffMismatch { from: 0, to: 1, .. })
        ));

        let right = Patch::new(0, "print(x)\n", "print(1)\n", PatchSource::RuleBased, "r").with_applied(true);
        ledger.record_patch(right).unwrap();

        let again = Patch::new(0, "print(x)\n", "print(1)\n", PatchSource::RuleBased, "r").with_applied(true);
        assert_eq!(
            ledger.record_patch(again).unwrap_err(),
            LedgerError::DuplicateTransition(1)
        );
    }

    #[test]
    fn test_rejected_patch_targets_next_slot_without_version() {
        let mut ledger = SessionLedger::new();
        ledger.create_version("a\n").unwrap();
        ledger.record_outcome(0, failing()).unwrap();
        let rejected = Patch::new(0, "a\n", "b\n", PatchSource::Generated, "try")
            .with_validation(Some(failing()));
        ledger.record_patch(rejected).unwrap();
        assert_eq!(ledger.versions().len(), 1);
        assert_eq!(ledger.patches().len(), 1);

        let mut skipping = Patch::new(0, "a\n", "b\n", PatchSource::Generated, "try");
        skipping.to_version = 2;
        assert_eq!(
            ledger.record_patch(skipping).unwrap_err(),
            LedgerError::NonContiguous { from: 0, to: 2 }
        );
    }

    #[test]
    fn test_sealed_ledger_only_accepts_traces() {
        let mut ledger = SessionLedger::new();
        ledger.create_version("ok").unwrap();
        ledger.record_outcome(0, ExecutionOutcome::success("")).unwrap();
        ledger.seal();
        assert_eq!(ledger.create_version("more").unwrap_err(), LedgerError::Sealed);
        let patch = Patch::new(0, "ok", "more", PatchSource::RuleBased, "r");
        assert_eq!(ledger.record_patch(patch).unwrap_err(), LedgerError::Sealed);
        ledger.append_trace(TraceEvent::new("orchestrator", TraceStatus::Info, "post-hoc"));
        assert_eq!(ledger.traces().len(), 1);
        assert!(ledger.verify_traces().is_ok());
    }

    #[test]
    fn test_earlier_duplicate_detection() {
        let mut ledger = SessionLedger::new();
        for (i, code) in ["a", "b", "a"].into_iter().enumerate() {
            ledger.create_version(code).unwrap();
            ledger.record_outcome(i as u32, failing()).unwrap();
        }
        assert_eq!(ledger.earlier_duplicate(2).map(|v| v.number), Some(0));
        assert!(ledger.earlier_duplicate(1).is_none());
    }
}
