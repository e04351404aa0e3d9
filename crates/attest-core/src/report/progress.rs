//! Per-iteration progress reporting. The orchestrator emits one event after
//! each verifier round trip; callers consume it through a sink.

use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationEvent {
    pub iteration: u32,
    pub max_iterations: u32,
    pub outcome_kind: &'static str,
    /// Non-volatile questions with a confirmed answer after this iteration.
    pub confirmed: usize,
    pub total: usize,
}

/// Sink for iteration events. Called on the orchestrator task; keep it cheap.
pub type ProgressSink = Arc<dyn Fn(IterationEvent) + Send + Sync>;
