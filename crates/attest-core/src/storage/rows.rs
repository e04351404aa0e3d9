use crate::model::Batch;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRow {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub iterations: u32,
}

/// One logged verifier round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRow {
    pub run_id: String,
    pub iteration: u32,
    pub batch: Batch,
    pub fingerprint: String,
    pub outcome_kind: String,
    pub raw_response: Option<String>,
    pub submitted_at: String,
}

/// Whether a write changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    /// The same fact was already on file.
    AlreadyPresent,
    /// Dropped because it would contradict a confirmed answer.
    Ignored,
}

impl WriteOutcome {
    pub fn was_new(&self) -> bool {
        matches!(self, WriteOutcome::Inserted)
    }
}
