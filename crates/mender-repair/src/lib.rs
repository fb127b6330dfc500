//! Mender repair
//!
//! The two repair tiers tried, in order, after a failed execution:
//! - [`RuleStage`]: cheap, deterministic pattern fixes that never execute code.
//!   [`PatternRules`] is the default table.
//! - [`GenerativePipeline`]: model-backed stages (interpret, generate,
//!   validate, optional tests and refactor, explain) run as a fixed
//!   [`StagePlan`] with bounded validator retries.
//!
//! The model itself is a capability behind [`RepairModel`]; no backend ships
//! with this crate.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod extract;
pub mod model;
pub mod pipeline;
pub mod prompts;
pub mod rules;

pub use error::RepairError;
pub use model::{ModelRequest, ModelTask, RepairModel};
pub use pipeline::{
    Candidate, GenerativePipeline, PipelineConfig, PipelineReport, RepairContext, Stage, StagePlan,
    StageSpec, TraceSink,
};
pub use rules::{FailureView, PatternRule, PatternRules, RuleFix, RuleStage};
