//! Mender core
//!
//! The debug-session orchestrator: for each submitted program it runs the
//! execute, classify, repair loop until the program succeeds, a repair stage
//! gives up, or the iteration budget runs out. Every version, patch and
//! trace event lands in the session's append-only ledger.
//!
//! # Example
//!
//! ```rust,no_run
//! use mender_core::{MenderConfig, Orchestrator};
//! use mender_sandbox::Language;
//!
//! # async fn demo() -> Result<(), mender_core::MenderError> {
//! let orchestrator = Orchestrator::new(MenderConfig::default())?;
//! let id = orchestrator.submit("xs = [1]\nprint(xs[1])\n", Language::Python, None)?;
//! let session = orchestrator.wait(id).await?;
//! println!("{} after {} iterations", session.status, session.current_iteration);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod session;
pub mod state_machine;
pub mod store;

pub use config::MenderConfig;
pub use error::{MenderError, TransitionError};
pub use orchestrator::Orchestrator;
pub use session::{Session, SessionId, SessionSummary};
pub use state_machine::SessionStatus;
pub use store::{SessionHandle, SessionStore};
