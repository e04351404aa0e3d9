use super::{AnswerGenerator, GenerationRequest};
use crate::errors::GenerationError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub const SYSTEM_PROMPT: &str = "You answer one question at a time using the provided context. \
Reply with the answer only: no explanation, no quotes, a single line.";

#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    pub provider: String,
    pub model: String,
    pub meta: serde_json::Value,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        system: Option<&[String]>,
    ) -> anyhow::Result<LlmResponse>;

    fn provider_name(&self) -> &'static str;
}

/// Answer generator that prompts an LLM, steering it away from rejected
/// answers and towards the latest hint.
pub struct PromptedGenerator {
    client: Arc<dyn LlmClient>,
    system_prompt: String,
    timeout: Option<Duration>,
}

impl PromptedGenerator {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            system_prompt: SYSTEM_PROMPT.to_string(),
            timeout: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn complete(&self, request: &GenerationRequest, prompt: &str) -> Result<String, GenerationError> {
        let system = [self.system_prompt.clone()];
        let call = self.client.complete(prompt, Some(&system));
        let resp = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                GenerationError::Timeout {
                    question_id: request.question.id.clone(),
                    timeout_ms: limit.as_millis() as u64,
                }
            })?,
            None => call.await,
        };
        resp.map(|r| r.text).map_err(|e| GenerationError::Failed {
            generator: self.client.provider_name().to_string(),
            question_id: request.question.id.clone(),
            detail: e.to_string(),
        })
    }
}

#[async_trait]
impl AnswerGenerator for PromptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let prompt = build_prompt(request);
        let text = self.complete(request, &prompt).await?;
        extract_answer(&text).ok_or_else(|| GenerationError::Failed {
            generator: self.client.provider_name().to_string(),
            question_id: request.question.id.clone(),
            detail: "empty completion".to_string(),
        })
    }

    fn generator_name(&self) -> &'static str {
        self.client.provider_name()
    }
}

pub fn build_prompt(request: &GenerationRequest) -> String {
    let mut prompt = String::new();
    if !request.context.trim().is_empty() {
        prompt.push_str("Context:\n");
        prompt.push_str(request.context.trim());
        prompt.push_str("\n\n");
    }
    prompt.push_str("Question: ");
    prompt.push_str(request.question.text.trim());
    prompt.push('\n');

    if !request.rejected.is_empty() {
        prompt.push_str("\nThese answers were already rejected; do not repeat them:\n");
        for r in &request.rejected {
            prompt.push_str("- ");
            prompt.push_str(&r.answer_text);
            if let Some(h) = &r.hint {
                prompt.push_str(" (hint: ");
                prompt.push_str(h);
                prompt.push(')');
            }
            prompt.push('\n');
        }
    }

    if let Some(hint) = &request.hint {
        prompt.push_str("\nLatest hint from the grader: ");
        prompt.push_str(hint);
        prompt.push('\n');
    }
    prompt
}

/// First meaningful line of a completion, without fences or wrapping quotes.
pub fn extract_answer(text: &str) -> Option<String> {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("```"))?;
    let line = line
        .strip_prefix("Answer:")
        .map(str::trim)
        .unwrap_or(line);
    let unquoted = line
        .strip_prefix('"')
        .and_then(|l| l.strip_suffix('"'))
        .unwrap_or(line)
        .trim();
    if unquoted.is_empty() {
        None
    } else {
        Some(unquoted.to_string())
    }
}
