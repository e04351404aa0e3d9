//! Generation phase: one candidate per pending question on a bounded worker
//! pool, joined before the batch is assembled.

use crate::errors::GenerationError;
use crate::providers::{AnswerGenerator, GenerationRequest};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub(crate) type Candidates = HashMap<String, Result<String, GenerationError>>;

pub(crate) async fn generate_candidates(
    generator: Arc<dyn AnswerGenerator>,
    requests: Vec<GenerationRequest>,
    concurrency: usize,
    timeout: Option<Duration>,
) -> Candidates {
    let sem = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut join_set = JoinSet::new();
    let ids: Vec<String> = requests.iter().map(|r| r.question.id.clone()).collect();

    for request in requests {
        let sem = sem.clone();
        let generator = generator.clone();
        join_set.spawn(async move {
            let question_id = request.question.id.clone();
            let _permit = match sem.acquire_owned().await {
                Ok(p) => p,
                Err(e) => {
                    return (
                        question_id.clone(),
                        Err(GenerationError::Aborted {
                            question_id,
                            detail: e.to_string(),
                        }),
                    )
                }
            };
            let result = match timeout {
                Some(limit) => tokio::time::timeout(limit, generator.generate(&request))
                    .await
                    .unwrap_or_else(|_| {
                        Err(GenerationError::Timeout {
                            question_id: question_id.clone(),
                            timeout_ms: limit.as_millis() as u64,
                        })
                    }),
                None => generator.generate(&request).await,
            };
            (question_id, result)
        });
    }

    let mut out = Candidates::with_capacity(ids.len());
    let mut join_failures = Vec::new();
    while let Some(res) = join_set.join_next().await {
        match res {
            Ok((question_id, result)) => {
                out.insert(question_id, result);
            }
            Err(e) => join_failures.push(e.to_string()),
        }
    }

    // A panicked task loses its id; every question still missing gets the join error.
    if !join_failures.is_empty() {
        let detail = join_failures.join("; ");
        for id in ids {
            out.entry(id.clone()).or_insert_with(|| {
                Err(GenerationError::Aborted {
                    question_id: id,
                    detail: detail.clone(),
                })
            });
        }
    }
    out
}
