//! Pipeline Executor: one frame on one provider, from upload to download.

pub mod commands;
pub mod executor;
pub mod state;

pub use executor::{PipelineExecutor, PipelineReport, RenderPlan};
pub use state::{Stage, StageMachine, StepOutcome};
