//! Mender sandbox
//!
//! Runs one untrusted program in an isolated, resource-limited environment
//! and returns a structured [`ExecutionOutcome`]. The sandbox knows nothing
//! about repair; it only guarantees:
//! - bounded wall-clock time (time budget plus a fixed compile/start overhead)
//! - no network access and bounded CPU, memory and output
//! - a private working directory per call
//! - an admission limit on simultaneous executions
//!
//! Program failures, timeouts and infrastructure faults are all encoded in the
//! returned outcome. The only error a caller can observe is an
//! [`AdmissionError`] when the execution pool is saturated.
//!
//! # Example
//!
//! ```rust,no_run
//! use mender_sandbox::{Language, Sandbox, SandboxConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let sandbox = Sandbox::from_config(SandboxConfig::default())?;
//! let outcome = sandbox.execute_once("print('hi')", Language::Python).await?;
//! assert!(outcome.is_success());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod classify;
pub mod error;
pub mod isolation;
pub mod language;
pub mod limits;
pub mod outcome;
pub mod pool;
pub mod sandbox;

pub use error::{AdmissionError, SandboxError};
pub use isolation::{ContainerRuntime, ExecutionRequest, ProcessRuntime, Runtime};
pub use language::Language;
pub use limits::{IsolationKind, NetworkPolicy, SandboxConfig};
pub use outcome::{Classification, ErrorKind, ExecutionOutcome, StructuredError};
pub use pool::{Admission, ExecutionPermit, ExecutionPool, PoolStats};
pub use sandbox::Sandbox;

/// Re-exported so callers can cancel queued admissions without a direct dependency.
pub use tokio_util::sync::CancellationToken;
