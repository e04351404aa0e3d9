//! Turns raw verifier responses into structured outcomes.
//!
//! Two response shapes exist and the verifier never mixes them:
//! - sequential-prefix (`sequential.rs`): first failing question by id, optional hint
//! - index-list (`index_list.rs`): explicit `ok` / `failed` lists by batch position
//!
//! The shape is picked by sniffing the response; anything unrecognized becomes
//! `Outcome::TransportError` with the raw text attached.

pub mod hint;
mod index_list;
mod sequential;

use crate::config::EngineConfig;
use crate::errors::TransportError;
use crate::model::{Batch, IdNormalizer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    AllCorrect { message: Option<String> },
    PartialFailure(Feedback),
    TransportError { detail: String },
}

impl Outcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::AllCorrect { .. } => "all_correct",
            Outcome::PartialFailure(Feedback::SequentialPrefix(_)) => "sequential_prefix",
            Outcome::PartialFailure(Feedback::IndexList(_)) => "index_list",
            Outcome::TransportError { .. } => "transport_error",
        }
    }

    pub fn is_all_correct(&self) -> bool {
        matches!(self, Outcome::AllCorrect { .. })
    }
}

/// Partial feedback, one variant per response shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Feedback {
    SequentialPrefix(PrefixFeedback),
    IndexList(IndexListFeedback),
}

impl Feedback {
    /// The first question the verifier reported as wrong.
    pub fn failed_question_id(&self) -> Option<&str> {
        match self {
            Feedback::SequentialPrefix(p) => Some(p.failed_question_id.as_str()),
            Feedback::IndexList(l) => l.failed.first().map(|f| f.question_id.as_str()),
        }
    }

    pub fn hint(&self) -> Option<&str> {
        match self {
            Feedback::SequentialPrefix(p) => p.hint.as_deref(),
            Feedback::IndexList(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    Incorrect,
    TooLong,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixFeedback {
    pub failed_question_id: String,
    /// Position of the failed question in the submitted batch. Everything
    /// before it was accepted.
    pub failed_position: usize,
    pub hint: Option<String>,
    pub reason: RejectionReason,
}

impl PrefixFeedback {
    /// Hint to store with the rejection; a too-long answer without a hint
    /// still tells the generator something.
    pub fn effective_hint(&self) -> Option<String> {
        match (&self.hint, self.reason) {
            (Some(h), _) => Some(h.clone()),
            (None, RejectionReason::TooLong) => Some("answer is too long".to_string()),
            (None, RejectionReason::Incorrect) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedAnswer {
    pub index: usize,
    pub question_id: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexListFeedback {
    pub ok: Vec<IndexedAnswer>,
    pub failed: Vec<IndexedAnswer>,
    pub code: Option<i64>,
    pub message: Option<String>,
    /// Entries dropped as malformed.
    pub skipped: usize,
    /// Length of the raw `failed` list, malformed entries included.
    pub reported_failures: usize,
}

#[derive(Debug, Clone)]
pub struct FeedbackInterpreter {
    ids: IdNormalizer,
    success_markers: Vec<String>,
}

impl Default for FeedbackInterpreter {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl FeedbackInterpreter {
    pub fn new(ids: IdNormalizer, success_markers: Vec<String>) -> Self {
        Self {
            ids,
            success_markers,
        }
    }

    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self::new(cfg.id_normalizer(), cfg.success_markers.clone())
    }

    /// Interpret a submission result; transport failures pass straight through.
    pub fn interpret_result(&self, result: &Result<String, TransportError>, batch: &Batch) -> Outcome {
        match result {
            Ok(raw) => self.interpret(raw, batch),
            Err(e) => Outcome::TransportError {
                detail: e.to_string(),
            },
        }
    }

    /// `batch` must be the batch exactly as submitted, in canonical order.
    pub fn interpret(&self, raw: &str, batch: &Batch) -> Outcome {
        let envelope = parse_envelope(raw);

        if let Some(env) = envelope.as_ref().filter(|v| index_list::matches(v)) {
            return self.interpret_index_list(raw, env, batch);
        }

        match sequential::parse(raw, envelope.as_ref(), batch, &self.ids) {
            Some(Ok(prefix)) => {
                return Outcome::PartialFailure(Feedback::SequentialPrefix(prefix));
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "sequential-prefix feedback does not match the submitted batch");
                return Outcome::TransportError {
                    detail: format!("{}; raw response: {}", e, raw),
                };
            }
            None => {}
        }

        if envelope_code(envelope.as_ref()) == Some(0) || self.has_success_marker(raw) {
            return Outcome::AllCorrect {
                message: envelope_message(envelope.as_ref()).or_else(|| Some(raw.trim().to_string())),
            };
        }

        tracing::warn!(response = %raw, "unrecognized verifier response");
        Outcome::TransportError {
            detail: format!("unrecognized verifier response: {}", raw),
        }
    }

    fn interpret_index_list(&self, raw: &str, env: &Value, batch: &Batch) -> Outcome {
        let parsed = index_list::parse(env, batch);
        if parsed.skipped > 0 {
            tracing::warn!(skipped = parsed.skipped, "index-list feedback had malformed entries");
        }

        if !parsed.failed.is_empty() {
            return Outcome::PartialFailure(Feedback::IndexList(parsed));
        }

        let everything_ok = parsed.reported_failures == 0
            && (parsed.code == Some(0) || (!batch.is_empty() && parsed.ok.len() == batch.len()));
        if everything_ok {
            return Outcome::AllCorrect {
                message: parsed.message,
            };
        }

        if !parsed.ok.is_empty() {
            return Outcome::PartialFailure(Feedback::IndexList(parsed));
        }

        Outcome::TransportError {
            detail: format!("index-list response without usable entries: {}", raw),
        }
    }

    fn has_success_marker(&self, raw: &str) -> bool {
        self.success_markers
            .iter()
            .any(|m| !m.is_empty() && raw.contains(m.as_str()))
    }
}

fn parse_envelope(raw: &str) -> Option<Value> {
    serde_json::from_str::<Value>(raw.trim())
        .ok()
        .filter(Value::is_object)
}

fn envelope_code(envelope: Option<&Value>) -> Option<i64> {
    envelope.and_then(|v| v.get("code")).and_then(Value::as_i64)
}

fn envelope_message(envelope: Option<&Value>) -> Option<String> {
    envelope
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
