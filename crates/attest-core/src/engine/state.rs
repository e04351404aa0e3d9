//! Run-scoped memory: what must not (or cannot) go into the store.

use super::report::RejectionSummary;
use crate::feedback::Outcome;
use crate::model::{Batch, Question, RejectedAnswer};
use std::collections::{BTreeMap, HashMap};

pub(crate) struct RunState {
    pub(crate) run_id: String,
    /// Canonical ids, canonical order.
    pub(crate) questions: Vec<Question>,
    /// Rejections of volatile questions; never persisted.
    pub(crate) volatile_rejections: HashMap<String, Vec<RejectedAnswer>>,
    /// Hints that arrived with a rejection that was not persisted
    /// (volatile question or placeholder answer). Newer than the store's.
    pub(crate) memory_hints: HashMap<String, String>,
    /// Rejections on file for this run's questions at start, plus every
    /// rejection seen since.
    pub(crate) ledger: RejectionSummary,
    pub(crate) last_outcome: Option<Outcome>,
    /// Set after a transport failure: resubmit exactly this next time.
    pub(crate) retry_batch: Option<Batch>,
    pub(crate) consecutive_transport_errors: u32,
    pub(crate) generator_calls: usize,
}

impl RunState {
    pub(crate) fn new(run_id: String, questions: Vec<Question>) -> Self {
        Self {
            run_id,
            questions,
            volatile_rejections: HashMap::new(),
            memory_hints: HashMap::new(),
            ledger: RejectionSummary::default(),
            last_outcome: None,
            retry_batch: None,
            consecutive_transport_errors: 0,
            generator_calls: 0,
        }
    }

    /// Folds rejections already in the store into the ledger. Ids outside
    /// this run and volatile questions are left out.
    pub(crate) fn seed_history(&mut self, on_file: BTreeMap<String, Vec<RejectedAnswer>>) {
        for (question_id, rejected) in on_file {
            if self.questions.iter().any(|q| q.id == question_id && !q.volatile) {
                self.ledger.extend(&question_id, rejected);
            }
        }
    }

    pub(crate) fn is_volatile(&self, question_id: &str) -> bool {
        self.questions
            .iter()
            .any(|q| q.id == question_id && q.volatile)
    }

    pub(crate) fn volatile_rejected(&self, question_id: &str) -> Vec<RejectedAnswer> {
        self.volatile_rejections
            .get(question_id)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn remember_volatile_rejection(&mut self, question_id: &str, rejected: RejectedAnswer) {
        let list = self
            .volatile_rejections
            .entry(question_id.to_string())
            .or_default();
        if !list.iter().any(|r| r.answer_text == rejected.answer_text) {
            list.push(rejected);
        }
    }
}
