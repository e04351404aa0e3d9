//! Applies an interpreted outcome to the store and the run state.
//!
//! Sequential-prefix feedback relies on the verifier grading in submission
//! order and stopping at the first failure: entries before the failed
//! position are taken as accepted, entries after it stay unknown.

use super::state::RunState;
use crate::errors::StorageError;
use crate::feedback::{Feedback, IndexListFeedback, Outcome, PrefixFeedback};
use crate::model::{Batch, RejectedAnswer};
use crate::storage::AnswerStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Applied {
    pub(crate) confirmed: usize,
    pub(crate) rejected: usize,
}

pub(crate) fn apply_outcome(
    store: &AnswerStore,
    state: &mut RunState,
    batch: &Batch,
    outcome: &Outcome,
    placeholder: &str,
) -> Result<Applied, StorageError> {
    let mut applied = Applied::default();
    match outcome {
        Outcome::AllCorrect { .. } => {
            for entry in &batch.entries {
                if confirm(store, state, &entry.question_id, &entry.answer_text, placeholder)? {
                    applied.confirmed += 1;
                }
            }
        }
        Outcome::PartialFailure(Feedback::SequentialPrefix(prefix)) => {
            apply_prefix(store, state, batch, prefix, placeholder, &mut applied)?;
        }
        Outcome::PartialFailure(Feedback::IndexList(list)) => {
            apply_index_list(store, state, batch, list, placeholder, &mut applied)?;
        }
        Outcome::TransportError { .. } => {}
    }
    Ok(applied)
}

fn apply_prefix(
    store: &AnswerStore,
    state: &mut RunState,
    batch: &Batch,
    prefix: &PrefixFeedback,
    placeholder: &str,
    applied: &mut Applied,
) -> Result<(), StorageError> {
    for entry in batch.entries.iter().take(prefix.failed_position) {
        if confirm(store, state, &entry.question_id, &entry.answer_text, placeholder)? {
            applied.confirmed += 1;
        }
    }

    let Some(failed) = batch.get(prefix.failed_position) else {
        return Ok(());
    };
    debug_assert_eq!(failed.question_id, prefix.failed_question_id);
    reject(
        store,
        state,
        &failed.question_id,
        &failed.answer_text,
        prefix.effective_hint(),
        placeholder,
    )?;
    applied.rejected += 1;
    Ok(())
}

fn apply_index_list(
    store: &AnswerStore,
    state: &mut RunState,
    batch: &Batch,
    list: &IndexListFeedback,
    placeholder: &str,
    applied: &mut Applied,
) -> Result<(), StorageError> {
    for ok in &list.ok {
        let answer = reported_or_submitted(batch, ok.index, &ok.value);
        if confirm(store, state, &ok.question_id, answer, placeholder)? {
            applied.confirmed += 1;
        }
    }
    for failed in &list.failed {
        let answer = reported_or_submitted(batch, failed.index, &failed.value);
        reject(store, state, &failed.question_id, answer, None, placeholder)?;
        applied.rejected += 1;
    }
    Ok(())
}

/// The verifier echoes the graded value; fall back to what was submitted
/// when the echo is empty.
fn reported_or_submitted<'a>(batch: &'a Batch, index: usize, reported: &'a str) -> &'a str {
    if !reported.trim().is_empty() {
        return reported;
    }
    batch
        .get(index)
        .map(|e| e.answer_text.as_str())
        .unwrap_or(reported)
}

/// Returns true when a new confirmation was written.
///
/// A placeholder the verifier accepted is cached like any other answer.
fn confirm(
    store: &AnswerStore,
    state: &mut RunState,
    question_id: &str,
    answer: &str,
    placeholder: &str,
) -> Result<bool, StorageError> {
    if state.is_volatile(question_id) {
        tracing::debug!(question_id, "volatile answer accepted; not cached");
        return Ok(false);
    }
    if answer == placeholder {
        tracing::warn!(
            question_id,
            answer,
            "verifier accepted the placeholder; caching it as confirmed"
        );
    }
    state.memory_hints.remove(question_id);
    Ok(store.record_confirmed(question_id, answer)?.was_new())
}

fn reject(
    store: &AnswerStore,
    state: &mut RunState,
    question_id: &str,
    answer: &str,
    hint: Option<String>,
    placeholder: &str,
) -> Result<(), StorageError> {
    let is_placeholder = answer == placeholder;
    let volatile = state.is_volatile(question_id);

    if volatile || is_placeholder {
        if let Some(h) = &hint {
            state
                .memory_hints
                .insert(question_id.to_string(), h.clone());
        }
    } else {
        state.memory_hints.remove(question_id);
    }

    if is_placeholder {
        tracing::info!(question_id, "placeholder answer rejected; not recorded");
        return Ok(());
    }

    let rejected = RejectedAnswer {
        answer_text: answer.to_string(),
        hint: hint.clone(),
    };
    state.ledger.record(question_id, rejected.clone());

    if volatile {
        state.remember_volatile_rejection(question_id, rejected);
        return Ok(());
    }
    store.record_rejected(question_id, answer, hint.as_deref())?;
    Ok(())
}
