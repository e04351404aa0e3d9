//! Collaborator seams consumed by the engine.

pub mod llm;
pub mod questions;

use crate::errors::{GenerationError, TransportError};
use crate::model::{Batch, Question, RejectedAnswer};
use async_trait::async_trait;

pub use llm::{LlmClient, LlmResponse, PromptedGenerator};
pub use questions::{StaticQuestions, YamlQuestionSource};

/// Everything a generator gets to produce one candidate answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub question: Question,
    pub context: String,
    /// Earlier rejected candidates, oldest first. Do not repeat these.
    pub rejected: Vec<RejectedAnswer>,
    pub hint: Option<String>,
}

impl GenerationRequest {
    pub fn rejected_texts(&self) -> impl Iterator<Item = &str> {
        self.rejected.iter().map(|r| r.answer_text.as_str())
    }
}

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    fn generator_name(&self) -> &'static str;
}

/// The authoritative grader. Returns the raw response body.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn submit(&self, batch: &Batch) -> Result<String, TransportError>;
}

#[async_trait]
pub trait QuestionSource: Send + Sync {
    /// Questions in canonical submission order. Read once per run.
    async fn list_questions(&self) -> anyhow::Result<Vec<Question>>;
}
