use super::QuestionSource;
use crate::model::{IdNormalizer, Question};
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;

/// Fixed, in-memory question list.
#[derive(Debug, Clone, Default)]
pub struct StaticQuestions {
    questions: Vec<Question>,
}

impl StaticQuestions {
    pub fn new(questions: Vec<Question>) -> Self {
        Self { questions }
    }
}

#[async_trait]
impl QuestionSource for StaticQuestions {
    async fn list_questions(&self) -> anyhow::Result<Vec<Question>> {
        Ok(self.questions.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QuestionFile {
    List(Vec<Question>),
    Wrapped { questions: Vec<Question> },
}

/// Questions read from a YAML file: either a bare list of
/// `{id, text, volatile}` or the same list under a `questions:` key.
///
/// Two entries whose ids share a canonical form ("7" and "07") are an error.
#[derive(Debug, Clone)]
pub struct YamlQuestionSource {
    path: PathBuf,
    ids: IdNormalizer,
}

impl YamlQuestionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ids: IdNormalizer::default(),
        }
    }

    /// Match the normalizer of the store the questions will run against.
    pub fn with_ids(mut self, ids: IdNormalizer) -> Self {
        self.ids = ids;
        self
    }
}

#[async_trait]
impl QuestionSource for YamlQuestionSource {
    async fn list_questions(&self) -> anyhow::Result<Vec<Question>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read questions file {}", self.path.display()))?;
        let parsed: QuestionFile = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse questions file {}", self.path.display()))?;
        let questions = match parsed {
            QuestionFile::List(q) => q,
            QuestionFile::Wrapped { questions } => questions,
        };

        let mut seen = std::collections::HashMap::new();
        for q in &questions {
            if let Some(first) = seen.insert(self.ids.canonical(&q.id), q.id.as_str()) {
                anyhow::bail!(
                    "duplicate question id '{}' (same as '{}') in {}",
                    q.id,
                    first,
                    self.path.display()
                );
            }
        }
        Ok(questions)
    }
}
