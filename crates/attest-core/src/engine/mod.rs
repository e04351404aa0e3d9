//! The retry loop and everything it owns for the duration of a run.

mod apply;
mod generate;
pub mod orchestrator;
pub mod report;
mod state;

pub use orchestrator::Orchestrator;
pub use report::{RejectionSummary, RunReport, RunStatus};
