//! Mender ledger
//!
//! Append-only record of one repair session:
//! - [`Version`]: immutable code snapshots numbered contiguously from 0
//! - [`Patch`]: immutable records of every repair attempt, applied or rejected
//! - [`TraceRecord`]: hash-chained activity log
//!
//! All mutations are appends, except [`SessionLedger::record_outcome`] which
//! fills a version's outcome slot exactly once. Diffs are plain line-based
//! unified diffs ([`diff`]), memoized on demand by [`DiffCache`].

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod cache;
pub mod diff;
pub mod error;
pub mod hash;
pub mod ledger;
pub mod patch;
pub mod trace;
pub mod version;

pub use cache::DiffCache;
pub use error::{DiffError, LedgerError};
pub use hash::ContentHash;
pub use ledger::SessionLedger;
pub use patch::{Patch, PatchId, PatchSource};
pub use trace::{TraceEvent, TraceLog, TraceRecord, TraceStatus};
pub use version::Version;
