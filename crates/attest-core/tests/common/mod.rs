//! Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use attest_core::errors::{GenerationError, TransportError};
use attest_core::model::Batch;
use attest_core::providers::{AnswerGenerator, GenerationRequest, Verifier};
use attest_core::{AnswerStore, EngineConfig, IdNormalizer, Orchestrator};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// No sleeps, no backoff.
pub fn fast_config(max_iterations: u32) -> EngineConfig {
    EngineConfig {
        max_iterations,
        iteration_delay_ms: 0,
        transport_backoff_ms: 0,
        transport_backoff_max_ms: 0,
        ..EngineConfig::default()
    }
}

pub fn memory_store() -> AnswerStore {
    AnswerStore::memory(IdNormalizer::default()).unwrap()
}

pub fn orchestrator(
    store: AnswerStore,
    generator: Arc<ScriptedGenerator>,
    verifier: Arc<ScriptedVerifier>,
    config: EngineConfig,
) -> Orchestrator {
    Orchestrator::new(store, generator, verifier, config)
}

pub fn hint_response(question_id: &str, hint: &str) -> Result<String, TransportError> {
    Ok(format!(
        r#"{{"code": -340, "message": "Answer for question {question_id} is incorrect", "hint": "{hint}"}}"#
    ))
}

pub fn incorrect(question_id: &str) -> Result<String, TransportError> {
    Ok(format!("Answer for question {question_id} is incorrect"))
}

pub fn all_correct() -> Result<String, TransportError> {
    Ok(r#"{"code": 0, "message": "{FLG:all-good}"}"#.to_string())
}

/// Replays queued responses in order; repeats `fallback` once the queue is empty.
pub struct ScriptedVerifier {
    responses: Mutex<VecDeque<Result<String, TransportError>>>,
    fallback: Result<String, TransportError>,
    pub submitted: Mutex<Vec<Batch>>,
}

impl ScriptedVerifier {
    pub fn new(
        responses: Vec<Result<String, TransportError>>,
        fallback: Result<String, TransportError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            fallback,
            submitted: Mutex::new(Vec::new()),
        })
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Verifier for ScriptedVerifier {
    async fn submit(&self, batch: &Batch) -> Result<String, TransportError> {
        self.submitted.lock().unwrap().push(batch.clone());
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Answers "<id>-<attempt>" unless a scripted answer is queued for the question.
/// Queued `Err` entries simulate generation failures.
#[derive(Default)]
pub struct ScriptedGenerator {
    scripted: Mutex<HashMap<String, VecDeque<Result<String, String>>>>,
    attempts: Mutex<HashMap<String, usize>>,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(answers: Vec<(&str, Vec<Result<&str, &str>>)>) -> Arc<Self> {
        let g = Self::default();
        {
            let mut map = g.scripted.lock().unwrap();
            for (id, list) in answers {
                let queue = list
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect();
                map.insert(id.to_string(), queue);
            }
        }
        Arc::new(g)
    }

    pub fn requests_for(&self, question_id: &str) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.question.id == question_id)
            .cloned()
            .collect()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl AnswerGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        let id = request.question.id.clone();
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(id.clone()).or_insert(0);
            *n += 1;
            *n
        };
        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&id)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(Ok(answer)) => Ok(answer),
            Some(Err(detail)) => Err(GenerationError::Failed {
                generator: "scripted".to_string(),
                question_id: id,
                detail,
            }),
            None => Ok(format!("{id}-{attempt}")),
        }
    }

    fn generator_name(&self) -> &'static str {
        "scripted"
    }
}
