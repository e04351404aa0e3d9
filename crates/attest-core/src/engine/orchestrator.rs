use super::apply::apply_outcome;
use super::generate::{generate_candidates, Candidates};
use super::report::{RejectionSummary, RunReport, RunStatus};
use super::state::RunState;
use crate::config::EngineConfig;
use crate::errors::{EngineError, StorageError};
use crate::feedback::{FeedbackInterpreter, Outcome};
use crate::model::{Batch, Question};
use crate::providers::{AnswerGenerator, GenerationRequest, QuestionSource, Verifier};
use crate::report::{IterationEvent, ProgressSink};
use crate::storage::AnswerStore;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Drives generate -> submit -> interpret -> apply until the verifier accepts
/// the whole batch, the iteration budget runs out, or the run is cancelled.
///
/// At most one batch is in flight at a time; only the generation phase fans out.
pub struct Orchestrator {
    store: AnswerStore,
    generator: Arc<dyn AnswerGenerator>,
    verifier: Arc<dyn Verifier>,
    interpreter: FeedbackInterpreter,
    config: EngineConfig,
    progress: Option<ProgressSink>,
}

impl Orchestrator {
    pub fn new(
        store: AnswerStore,
        generator: Arc<dyn AnswerGenerator>,
        verifier: Arc<dyn Verifier>,
        config: EngineConfig,
    ) -> Self {
        let interpreter = FeedbackInterpreter::new(store.ids(), config.success_markers.clone());
        Self {
            store,
            generator,
            verifier,
            interpreter,
            config,
            progress: None,
        }
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn with_interpreter(mut self, interpreter: FeedbackInterpreter) -> Self {
        self.interpreter = interpreter;
        self
    }

    pub fn store(&self) -> &AnswerStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reads the questions once from `source` and runs the loop.
    pub async fn run(
        &self,
        source: &dyn QuestionSource,
        context: &str,
        cancel: &CancellationToken,
    ) -> Result<RunReport, EngineError> {
        let questions = source
            .list_questions()
            .await
            .map_err(|e| EngineError::QuestionSource(format!("{e:#}")))?;
        self.run_questions(questions, context, cancel).await
    }

    pub async fn run_questions(
        &self,
        questions: Vec<Question>,
        context: &str,
        cancel: &CancellationToken,
    ) -> Result<RunReport, EngineError> {
        let questions = self.canonical_questions(questions);
        let setup_failed = |e: StorageError| EngineError::storage(e, 0, None, RejectionSummary::default());
        self.store.register_questions(&questions).map_err(setup_failed)?;
        let on_file = self.store.rejection_history().map_err(setup_failed)?;
        let run_id = self.store.create_run().map_err(setup_failed)?;

        let mut state = RunState::new(run_id, questions);
        state.seed_history(on_file);
        tracing::info!(
            run_id = %state.run_id,
            questions = state.questions.len(),
            max_iterations = self.config.max_iterations,
            "run started"
        );

        let mut iteration: u32 = 0;
        let status = if state.questions.is_empty() {
            RunStatus::Completed
        } else {
            loop {
                if cancel.is_cancelled() {
                    break RunStatus::Cancelled;
                }
                iteration += 1;

                let span = tracing::info_span!("attest.iteration", iteration, run_id = %state.run_id);
                let result = self
                    .iterate(&mut state, iteration, context)
                    .instrument(span)
                    .await;
                let outcome = match result {
                    Ok(o) => o,
                    Err(e) => return Err(self.abort(&state, iteration, e)),
                };

                if let Err(e) = self.emit_progress(&state, iteration, &outcome) {
                    return Err(self.abort(&state, iteration, e));
                }

                if outcome.is_all_correct() {
                    break RunStatus::Completed;
                }
                if iteration >= self.config.max_iterations {
                    tracing::warn!(
                        iterations = iteration,
                        last_outcome = outcome.kind(),
                        "iteration budget exhausted"
                    );
                    break RunStatus::Exhausted;
                }
                if cancel.is_cancelled() {
                    break RunStatus::Cancelled;
                }

                let pause = self.pause(&state);
                tokio::select! {
                    _ = cancel.cancelled() => break RunStatus::Cancelled,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        };

        match self.finish(&state, status, iteration) {
            Ok(report) => {
                tracing::info!(
                    run_id = %report.run_id,
                    status = report.status.as_str(),
                    iterations = report.iterations,
                    unresolved = report.unresolved.len(),
                    "run finished"
                );
                Ok(report)
            }
            Err(e) => Err(self.abort(&state, iteration, e)),
        }
    }

    /// Canonical ids, first occurrence wins.
    fn canonical_questions(&self, questions: Vec<Question>) -> Vec<Question> {
        let ids = self.store.ids();
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(questions.len());
        for mut q in questions {
            q.id = ids.canonical(&q.id);
            if q.id.is_empty() {
                tracing::warn!(text = %q.text, "question without id skipped");
                continue;
            }
            if !seen.insert(q.id.clone()) {
                tracing::warn!(question_id = %q.id, "duplicate question id skipped");
                continue;
            }
            out.push(q);
        }
        out
    }

    async fn iterate(
        &self,
        state: &mut RunState,
        iteration: u32,
        context: &str,
    ) -> Result<Outcome, StorageError> {
        let batch = match state.retry_batch.take() {
            Some(previous) => {
                tracing::info!(
                    fingerprint = %previous.fingerprint(),
                    "resubmitting previous batch"
                );
                previous
            }
            None => self.build_batch(state, context).await?,
        };

        let response = self.verifier.submit(&batch).await;
        let outcome = self.interpreter.interpret_result(&response, &batch);
        let raw = match &response {
            Ok(body) => body.clone(),
            Err(e) => e.to_string(),
        };
        self.store
            .record_submission(&state.run_id, iteration, &batch, outcome.kind(), Some(&raw))?;

        let applied = apply_outcome(
            &self.store,
            state,
            &batch,
            &outcome,
            &self.config.generation_placeholder,
        )?;

        if let Outcome::TransportError { detail } = &outcome {
            state.consecutive_transport_errors += 1;
            tracing::warn!(
                consecutive = state.consecutive_transport_errors,
                detail = %detail,
                "verifier round trip failed; batch kept for resubmission"
            );
            state.retry_batch = Some(batch);
        } else {
            state.consecutive_transport_errors = 0;
        }

        tracing::info!(
            outcome = outcome.kind(),
            confirmed = applied.confirmed,
            rejected = applied.rejected,
            "iteration applied"
        );
        state.last_outcome = Some(outcome.clone());
        Ok(outcome)
    }

    /// Confirmed answers verbatim, fresh candidates for everything else,
    /// always in canonical question order.
    async fn build_batch(&self, state: &mut RunState, context: &str) -> Result<Batch, StorageError> {
        let mut cached: HashMap<String, String> = HashMap::new();
        let mut requests = Vec::new();

        for q in &state.questions {
            if !q.volatile {
                if let Some(answer) = self.store.get_confirmed(&q.id)? {
                    cached.insert(q.id.clone(), answer);
                    continue;
                }
            }
            let (rejected, hint) = if q.volatile {
                (
                    state.volatile_rejected(&q.id),
                    state.memory_hints.get(&q.id).cloned(),
                )
            } else {
                let hint = match state.memory_hints.get(&q.id) {
                    Some(h) => Some(h.clone()),
                    None => self.store.get_latest_hint(&q.id)?,
                };
                (self.store.get_rejected(&q.id)?, hint)
            };
            requests.push(GenerationRequest {
                question: q.clone(),
                context: context.to_string(),
                rejected,
                hint,
            });
        }

        tracing::debug!(
            cached = cached.len(),
            generating = requests.len(),
            "assembling batch"
        );
        state.generator_calls += requests.len();
        let mut candidates = if requests.is_empty() {
            Candidates::new()
        } else {
            generate_candidates(
                self.generator.clone(),
                requests,
                self.config.concurrency(),
                self.config.generation_timeout(),
            )
            .await
        };

        let placeholder = &self.config.generation_placeholder;
        let mut batch = Batch::default();
        for q in &state.questions {
            let answer = match cached.remove(&q.id) {
                Some(answer) => answer,
                None => match candidates.remove(&q.id) {
                    Some(Ok(answer)) => answer,
                    Some(Err(e)) => {
                        tracing::warn!(
                            question_id = %q.id,
                            generator = self.generator.generator_name(),
                            error = %e,
                            "generation failed; submitting placeholder"
                        );
                        placeholder.clone()
                    }
                    None => placeholder.clone(),
                },
            };
            batch.push(q.id.clone(), answer);
        }
        Ok(batch)
    }

    fn pause(&self, state: &RunState) -> Duration {
        let delay = self.config.iteration_delay();
        if state.consecutive_transport_errors == 0 {
            return delay;
        }
        delay.max(self.config.transport_backoff(state.consecutive_transport_errors))
    }

    fn emit_progress(
        &self,
        state: &RunState,
        iteration: u32,
        outcome: &Outcome,
    ) -> Result<(), StorageError> {
        let Some(sink) = &self.progress else {
            return Ok(());
        };
        let mut confirmed = 0;
        for q in state.questions.iter().filter(|q| !q.volatile) {
            if self.store.get_confirmed(&q.id)?.is_some() {
                confirmed += 1;
            }
        }
        sink(IterationEvent {
            iteration,
            max_iterations: self.config.max_iterations,
            outcome_kind: outcome.kind(),
            confirmed,
            total: state.questions.len(),
        });
        Ok(())
    }

    fn finish(
        &self,
        state: &RunState,
        status: RunStatus,
        iterations: u32,
    ) -> Result<RunReport, StorageError> {
        self.store
            .finalize_run(&state.run_id, status.as_str(), iterations)?;

        let mut confirmed = BTreeMap::new();
        let mut unresolved = Vec::new();
        let mut rejections = RejectionSummary::default();
        for q in &state.questions {
            if q.volatile {
                // Accepted volatile answers are never cached; only a completed run resolves them.
                if status != RunStatus::Completed {
                    unresolved.push(q.id.clone());
                    rejections.extend(&q.id, state.volatile_rejected(&q.id));
                }
                continue;
            }
            match self.store.get_confirmed(&q.id)? {
                Some(answer) => {
                    confirmed.insert(q.id.clone(), answer);
                }
                None => {
                    unresolved.push(q.id.clone());
                    rejections.extend(&q.id, self.store.get_rejected(&q.id)?);
                }
            }
        }

        Ok(RunReport {
            run_id: state.run_id.clone(),
            status,
            iterations,
            last_outcome: state.last_outcome.clone(),
            confirmed,
            unresolved,
            rejections,
            generator_calls: state.generator_calls,
        })
    }

    fn abort(&self, state: &RunState, iteration: u32, source: StorageError) -> EngineError {
        tracing::error!(iteration, error = %source, "storage failure; aborting run");
        if let Err(e) = self.store.finalize_run(&state.run_id, "failed", iteration) {
            tracing::warn!(error = %e, "could not mark run as failed");
        }
        EngineError::storage(
            source,
            iteration,
            state.last_outcome.clone(),
            state.ledger.clone(),
        )
    }
}
