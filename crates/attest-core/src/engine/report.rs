use crate::feedback::Outcome;
use crate::model::RejectedAnswer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The verifier accepted the whole batch.
    Completed,
    /// The iteration budget ran out first.
    Exhausted,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Exhausted => "exhausted",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// Rejected answers per canonical question id, oldest first, unique per question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RejectionSummary {
    by_question: BTreeMap<String, Vec<RejectedAnswer>>,
}

impl RejectionSummary {
    /// Returns false if the same answer was already listed for the question.
    pub fn record(&mut self, question_id: &str, rejected: RejectedAnswer) -> bool {
        let list = self.by_question.entry(question_id.to_string()).or_default();
        if list.iter().any(|r| r.answer_text == rejected.answer_text) {
            return false;
        }
        list.push(rejected);
        true
    }

    pub fn extend(&mut self, question_id: &str, rejected: impl IntoIterator<Item = RejectedAnswer>) {
        for r in rejected {
            self.record(question_id, r);
        }
    }

    pub fn for_question(&self, question_id: &str) -> &[RejectedAnswer] {
        self.by_question
            .get(question_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn question_ids(&self) -> impl Iterator<Item = &str> {
        self.by_question.keys().map(String::as_str)
    }

    pub fn total(&self) -> usize {
        self.by_question.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Result of a run that did not hit a fatal error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub iterations: u32,
    pub last_outcome: Option<Outcome>,
    /// Confirmed answers for this run's non-volatile questions.
    pub confirmed: BTreeMap<String, String>,
    /// Questions without a confirmed answer, in canonical order.
    pub unresolved: Vec<String>,
    /// Rejection history of the unresolved questions.
    pub rejections: RejectionSummary,
    pub generator_calls: usize,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}
