use crate::engine::report::RejectionSummary;
use crate::feedback::Outcome;
use thiserror::Error;

/// Persistence failures. Fatal for the current run: a silently failed write
/// would break the confirmed-answer cache.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Corrupt row in {table}: {detail}")]
    CorruptRow { table: String, detail: String },
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::CorruptRow {
            table: "submissions".to_string(),
            detail: e.to_string(),
        }
    }
}

/// Candidate generation failed for one question. Recoverable: the question
/// gets a placeholder answer and is retried next iteration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generator '{generator}' failed for question {question_id}: {detail}")]
    Failed {
        generator: String,
        question_id: String,
        detail: String,
    },

    #[error("generator timed out after {timeout_ms}ms for question {question_id}")]
    Timeout { question_id: String, timeout_ms: u64 },

    #[error("generation task for question {question_id} aborted: {detail}")]
    Aborted { question_id: String, detail: String },
}

/// The verifier could not be reached or answered with something unusable.
/// Recoverable with backoff; never mutates answer state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("transport error: {detail}")]
pub struct TransportError {
    pub detail: String,
    pub status: Option<u16>,
}

impl TransportError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// A single malformed feedback entry. Logged and skipped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed index entry '{entry}'")]
    MalformedEntry { entry: String },

    #[error("index {index} is outside the submitted batch of {batch_len}")]
    IndexOutOfRange { index: usize, batch_len: usize },

    #[error("question {question_id} named by the verifier was not submitted")]
    UnknownQuestion { question_id: String },

    #[error("undecodable hint '{raw}': {detail}")]
    Hint { raw: String, detail: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read config {path}: {detail}")]
    Read { path: String, detail: String },

    #[error("failed to parse config {path}: {detail}")]
    Parse { path: String, detail: String },

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

/// Terminal failure of a run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Aborted on a write/read failure. Carries what was known at that point.
    #[error("storage failure in iteration {iteration}: {source}")]
    Storage {
        source: StorageError,
        iteration: u32,
        last_outcome: Option<Box<Outcome>>,
        history: Box<RejectionSummary>,
    },

    #[error("question source failed: {0}")]
    QuestionSource(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub fn storage(
        source: StorageError,
        iteration: u32,
        last_outcome: Option<Outcome>,
        history: RejectionSummary,
    ) -> Self {
        EngineError::Storage {
            source,
            iteration,
            last_outcome: last_outcome.map(Box::new),
            history: Box::new(history),
        }
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, EngineError::Storage { .. })
    }
}
