//! Core data types shared by the store, the feedback interpreter and the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default zero-pad width for numeric question ids ("7" -> "07").
pub const DEFAULT_ID_WIDTH: usize = 2;

/// A question supplied once per run by the question source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    /// The correct answer changes over time; never cached as confirmed.
    #[serde(default)]
    pub volatile: bool,
}

impl Question {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            volatile: false,
        }
    }

    pub fn volatile(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            volatile: true,
            ..Self::new(id, text)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Confirmed,
    Rejected,
}

impl AnswerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerStatus::Confirmed => "confirmed",
            AnswerStatus::Rejected => "rejected",
        }
    }
}

/// One persisted answer row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: String,
    pub answer_text: String,
    pub status: AnswerStatus,
    pub hint: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A previously rejected candidate and the hint that came with it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RejectedAnswer {
    pub answer_text: String,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub question_id: String,
    pub answer_text: String,
}

/// Ordered answers submitted together. Order always follows the canonical
/// question order of the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub entries: Vec<BatchEntry>,
}

impl Batch {
    pub fn push(&mut self, question_id: impl Into<String>, answer_text: impl Into<String>) {
        self.entries.push(BatchEntry {
            question_id: question_id.into(),
            answer_text: answer_text.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn position_of(&self, question_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.question_id == question_id)
    }

    pub fn get(&self, index: usize) -> Option<&BatchEntry> {
        self.entries.get(index)
    }

    pub fn answer_for(&self, question_id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.question_id == question_id)
            .map(|e| e.answer_text.as_str())
    }

    /// Content hash over ids and answers in order.
    pub fn fingerprint(&self) -> String {
        let mut h = Sha256::new();
        for e in &self.entries {
            h.update(e.question_id.as_bytes());
            h.update(b"\n");
            h.update(e.answer_text.as_bytes());
            h.update(b"\n");
        }
        hex::encode(h.finalize())
    }
}

/// Maps the id spellings seen across feedback shapes ("7", "07", " 007 ")
/// onto one canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdNormalizer {
    width: usize,
}

impl Default for IdNormalizer {
    fn default() -> Self {
        Self {
            width: DEFAULT_ID_WIDTH,
        }
    }
}

impl IdNormalizer {
    pub fn new(width: usize) -> Self {
        Self { width }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// All-digit ids are re-padded to `width`; anything else is only trimmed.
    pub fn canonical(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return trimmed.to_string();
        }
        let digits = trimmed.trim_start_matches('0');
        let digits = if digits.is_empty() { "0" } else { digits };
        format!("{:0>width$}", digits, width = self.width)
    }
}
