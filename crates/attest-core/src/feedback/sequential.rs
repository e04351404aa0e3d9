//! Sequential-prefix responses: the verifier stops at the first wrong answer
//! and names it, e.g. "Answer for question 03 is incorrect".

use super::{hint, PrefixFeedback, RejectionReason};
use crate::errors::ParseError;
use crate::model::{Batch, IdNormalizer};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    static ref FAILED_QUESTION: Regex =
        Regex::new(r"(?i)answer\s+for\s+question\s+([A-Za-z0-9_\-]+)\s+is\s+(incorrect|too\s+long)")
            .unwrap();
}

/// Returns `None` when the text does not have this shape at all.
pub(crate) fn parse(
    raw: &str,
    envelope: Option<&Value>,
    batch: &Batch,
    ids: &IdNormalizer,
) -> Option<Result<PrefixFeedback, ParseError>> {
    let message = envelope
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str);
    let caps = message
        .and_then(|m| FAILED_QUESTION.captures(m))
        .or_else(|| FAILED_QUESTION.captures(raw))?;

    let failed_question_id = ids.canonical(&caps[1]);
    let reason = if caps[2].to_ascii_lowercase().starts_with("too") {
        RejectionReason::TooLong
    } else {
        RejectionReason::Incorrect
    };

    let Some(failed_position) = batch.position_of(&failed_question_id) else {
        return Some(Err(ParseError::UnknownQuestion {
            question_id: failed_question_id,
        }));
    };

    Some(Ok(PrefixFeedback {
        failed_question_id,
        failed_position,
        hint: hint::extract_hint(raw, envelope),
        reason,
    }))
}
