//! End-to-end behaviour of the retry loop against scripted collaborators.

mod common;

use async_trait::async_trait;
use attest_core::engine::RunStatus;
use attest_core::errors::TransportError;
use attest_core::feedback::{Feedback, Outcome};
use attest_core::model::{Batch, Question, RejectedAnswer};
use attest_core::providers::{QuestionSource, StaticQuestions, Verifier};
use attest_core::report::IterationEvent;
use attest_core::{AnswerStore, EngineError, IdNormalizer, Orchestrator};
use common::*;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn questions(ids: &[&str]) -> Vec<Question> {
    ids.iter()
        .map(|id| Question::new(*id, format!("question {id}")))
        .collect()
}

// === A) Feedback application ===

#[tokio::test]
async fn test_sequential_prefix_confirms_entries_before_failure() {
    let store = memory_store();
    let generator = ScriptedGenerator::new();
    let verifier = ScriptedVerifier::new(vec![hint_response("03", "warmer")], all_correct());
    let orch = orchestrator(store.clone(), generator.clone(), verifier.clone(), fast_config(10));

    let report = orch
        .run_questions(
            questions(&["01", "02", "03", "04", "05"]),
            "ctx",
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.iterations, 2);

    let batches = verifier.batches();
    assert_eq!(batches.len(), 2);
    let ids: Vec<&str> = batches[1]
        .entries
        .iter()
        .map(|e| e.question_id.as_str())
        .collect();
    assert_eq!(ids, ["01", "02", "03", "04", "05"]);
    assert_eq!(batches[1].answer_for("01"), Some("01-1"));
    assert_eq!(batches[1].answer_for("02"), Some("02-1"));
    assert_eq!(batches[1].answer_for("03"), Some("03-2"));
    assert_eq!(batches[1].answer_for("04"), Some("04-2"));

    assert_eq!(generator.requests_for("01").len(), 1);
    assert_eq!(generator.requests_for("02").len(), 1);
    let retry = &generator.requests_for("03")[1];
    assert_eq!(
        retry.rejected,
        vec![RejectedAnswer {
            answer_text: "03-1".to_string(),
            hint: Some("warmer".to_string()),
        }]
    );
    assert_eq!(retry.hint.as_deref(), Some("warmer"));
    assert_eq!(report.generator_calls, 8);

    // Confirmation purged the rejection of 03.
    assert!(store.get_rejected("03").unwrap().is_empty());
    assert_eq!(report.confirmed.len(), 5);
    assert!(report.unresolved.is_empty());
}

#[tokio::test]
async fn test_sequential_prefix_leaves_later_entries_unknown() {
    let store = memory_store();
    let verifier = ScriptedVerifier::new(vec![incorrect("03")], incorrect("03"));
    let orch = orchestrator(
        store.clone(),
        ScriptedGenerator::new(),
        verifier,
        fast_config(1),
    );

    orch.run_questions(
        questions(&["01", "02", "03", "04", "05"]),
        "",
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(store.get_confirmed("01").unwrap().as_deref(), Some("01-1"));
    assert_eq!(store.get_confirmed("02").unwrap().as_deref(), Some("02-1"));
    assert_eq!(store.get_confirmed("03").unwrap(), None);
    assert_eq!(store.get_rejected("03").unwrap().len(), 1);
    for id in ["04", "05"] {
        assert!(store.records(id).unwrap().is_empty(), "{id} must stay unknown");
    }
}

#[tokio::test]
async fn test_index_list_feedback_maps_positions() {
    let store = memory_store();
    let generator = ScriptedGenerator::scripted(vec![("01", vec![Ok("Paris")]), ("02", vec![Ok("Berlin")])]);
    let verifier = ScriptedVerifier::new(
        vec![Ok(
            r#"{"code": -1, "message": "1 wrong", "ok": ["index[0] = Paris"], "failed": ["index[1] = Berlin"]}"#
                .to_string(),
        )],
        all_correct(),
    );
    let orch = orchestrator(store.clone(), generator.clone(), verifier, fast_config(5));

    // Unpadded ids are canonicalized before anything is stored.
    let report = orch
        .run_questions(questions(&["1", "2"]), "", &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(store.get_confirmed("01").unwrap().as_deref(), Some("Paris"));
    assert_eq!(store.get_confirmed("1").unwrap().as_deref(), Some("Paris"));
    assert_eq!(generator.requests_for("01").len(), 1);

    let second = &generator.requests_for("02")[1];
    assert_eq!(second.rejected.len(), 1);
    assert_eq!(second.rejected[0].answer_text, "Berlin");
    assert_eq!(report.confirmed.get("02").map(String::as_str), Some("02-2"));
}

#[tokio::test]
async fn test_rejections_accumulate_until_confirmed() {
    let store = memory_store();
    let generator = ScriptedGenerator::new();
    let verifier = ScriptedVerifier::new(
        vec![incorrect("01"), incorrect("01"), incorrect("01")],
        all_correct(),
    );
    let orch = orchestrator(store.clone(), generator.clone(), verifier, fast_config(10));

    let report = orch
        .run_questions(questions(&["01"]), "", &CancellationToken::new())
        .await
        .unwrap();

    let seen: Vec<usize> = generator
        .requests_for("01")
        .iter()
        .map(|r| r.rejected.len())
        .collect();
    assert_eq!(seen, [0, 1, 2, 3]);
    assert_eq!(report.iterations, 4);
    assert_eq!(store.get_confirmed("01").unwrap().as_deref(), Some("01-4"));
    assert!(store.get_rejected("01").unwrap().is_empty());
}

// === B) Termination ===

#[tokio::test]
async fn test_bounded_termination_reports_history() {
    let store = memory_store();
    let verifier = ScriptedVerifier::new(vec![], incorrect("01"));
    let orch = orchestrator(
        store.clone(),
        ScriptedGenerator::new(),
        verifier.clone(),
        fast_config(4),
    );

    let report = orch
        .run_questions(questions(&["01", "02"]), "", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Exhausted);
    assert!(!report.is_success());
    assert_eq!(report.iterations, 4);
    assert_eq!(verifier.batches().len(), 4);
    assert_eq!(report.unresolved, vec!["01".to_string(), "02".to_string()]);
    assert_eq!(report.rejections.for_question("01").len(), 4);
    assert!(matches!(
        report.last_outcome,
        Some(Outcome::PartialFailure(Feedback::SequentialPrefix(_)))
    ));

    let run = store.get_run(&report.run_id).unwrap().unwrap();
    assert_eq!(run.status, "exhausted");
    assert_eq!(run.iterations, 4);
}

#[tokio::test]
async fn test_zero_questions_complete_without_submitting() {
    let verifier = ScriptedVerifier::new(vec![], incorrect("01"));
    let orch = orchestrator(
        memory_store(),
        ScriptedGenerator::new(),
        verifier.clone(),
        fast_config(3),
    );

    let report = orch
        .run_questions(Vec::new(), "", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.iterations, 0);
    assert!(verifier.batches().is_empty());
}

// === C) Cache ===

#[tokio::test]
async fn test_cache_short_circuit_skips_confirmed_question() {
    let store = memory_store();
    store.record_confirmed("1", "Paris").unwrap();
    let generator = ScriptedGenerator::new();
    let verifier = ScriptedVerifier::new(vec![], all_correct());
    let orch = orchestrator(store, generator.clone(), verifier.clone(), fast_config(3));

    let report = orch
        .run_questions(questions(&["01", "02"]), "", &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert!(generator.requests_for("01").is_empty());
    assert_eq!(verifier.batches()[0].answer_for("01"), Some("Paris"));
    assert_eq!(report.generator_calls, 1);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let store = memory_store();
    let verifier = ScriptedVerifier::new(vec![], all_correct());
    let first = orchestrator(
        store.clone(),
        ScriptedGenerator::new(),
        verifier.clone(),
        fast_config(3),
    );
    let report1 = first
        .run_questions(questions(&["01", "02"]), "", &CancellationToken::new())
        .await
        .unwrap();

    let generator = ScriptedGenerator::new();
    let second = orchestrator(store.clone(), generator.clone(), verifier, fast_config(3));
    let report2 = second
        .run_questions(questions(&["01", "02"]), "", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(generator.total_requests(), 0);
    assert_eq!(report1.confirmed, report2.confirmed);
    assert_eq!(store.records("01").unwrap().len(), 1);
    assert_eq!(store.records("02").unwrap().len(), 1);
}

#[tokio::test]
async fn test_volatile_question_regenerated_and_never_cached() {
    let store = memory_store();
    // Confirmed-looking row written before the question was known to be volatile.
    store.record_confirmed("02", "stale-token").unwrap();

    let generator = ScriptedGenerator::new();
    let verifier = ScriptedVerifier::new(vec![hint_response("02", "token expired")], all_correct());
    let orch = orchestrator(store.clone(), generator.clone(), verifier.clone(), fast_config(5));
    let qs = vec![
        Question::new("01", "capital?"),
        Question::volatile("02", "current token?"),
    ];

    let report = orch
        .run_questions(qs.clone(), "", &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_success());

    let requests = generator.requests_for("02");
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].rejected[0].answer_text, "02-1");
    assert_eq!(requests[1].hint.as_deref(), Some("token expired"));
    for batch in verifier.batches() {
        assert_ne!(batch.answer_for("02"), Some("stale-token"));
    }

    // Nothing new persisted for the volatile question.
    let records = store.records("02").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].answer_text, "stale-token");
    assert!(store.is_volatile("02").unwrap());
    assert!(!report.confirmed.contains_key("02"));

    // Regenerated again on the next run.
    orch.run_questions(qs, "", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(generator.requests_for("02").len(), 3);
    assert_eq!(generator.requests_for("01").len(), 1);
}

// === D) Failures ===

#[tokio::test]
async fn test_transport_error_resubmits_same_batch() {
    let store = memory_store();
    let generator = ScriptedGenerator::new();
    let verifier = ScriptedVerifier::new(
        vec![
            Err(TransportError::new("connection reset").with_status(502)),
            Ok("<html>502 Bad Gateway</html>".to_string()),
        ],
        all_correct(),
    );
    let orch = orchestrator(store.clone(), generator.clone(), verifier.clone(), fast_config(5));

    let report = orch
        .run_questions(questions(&["01", "02"]), "", &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.iterations, 3);
    let batches = verifier.batches();
    assert_eq!(batches[0].fingerprint(), batches[1].fingerprint());
    assert_eq!(batches[1].fingerprint(), batches[2].fingerprint());
    assert_eq!(generator.total_requests(), 2);

    let kinds: Vec<String> = store
        .submissions_for_run(&report.run_id)
        .unwrap()
        .into_iter()
        .map(|s| s.outcome_kind)
        .collect();
    assert_eq!(kinds, ["transport_error", "transport_error", "all_correct"]);
}

#[tokio::test]
async fn test_transport_errors_past_budget_are_terminal() {
    let store = memory_store();
    let verifier = ScriptedVerifier::new(vec![], Err(TransportError::new("timeout")));
    let orch = orchestrator(
        store.clone(),
        ScriptedGenerator::new(),
        verifier,
        fast_config(3),
    );

    let report = orch
        .run_questions(questions(&["01"]), "", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Exhausted);
    assert!(matches!(
        report.last_outcome,
        Some(Outcome::TransportError { .. })
    ));
    assert!(store.records("01").unwrap().is_empty());
    assert_eq!(report.unresolved, vec!["01".to_string()]);
}

#[tokio::test]
async fn test_generation_failure_submits_placeholder() {
    let store = memory_store();
    let generator = ScriptedGenerator::scripted(vec![("02", vec![Err("rate limited")])]);
    let verifier = ScriptedVerifier::new(vec![hint_response("02", "a colour")], all_correct());
    let orch = orchestrator(store.clone(), generator.clone(), verifier.clone(), fast_config(5));

    let report = orch
        .run_questions(questions(&["01", "02"]), "", &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(
        verifier.batches()[0].answer_for("02"),
        Some("<generation-failed>")
    );
    let retry = &generator.requests_for("02")[1];
    assert!(retry.rejected.is_empty());
    assert_eq!(retry.hint.as_deref(), Some("a colour"));
    assert_eq!(store.get_confirmed("02").unwrap().as_deref(), Some("02-2"));
}

/// Drops the answers table behind the store's back before answering.
struct SabotagingVerifier {
    db_path: PathBuf,
}

#[async_trait]
impl Verifier for SabotagingVerifier {
    async fn submit(&self, _batch: &Batch) -> Result<String, TransportError> {
        let conn = rusqlite::Connection::open(&self.db_path).unwrap();
        conn.execute_batch("DROP TABLE answers").unwrap();
        incorrect("02")
    }
}

#[tokio::test]
async fn test_storage_error_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("answers.db");
    let store = AnswerStore::open(&path, IdNormalizer::default()).unwrap();
    // Left by an earlier run; must survive into the abort report.
    store
        .record_rejected("02", "old-wrong", Some("earlier hint"))
        .unwrap();
    store.record_rejected("05", "not in this run", None).unwrap();
    let verifier = Arc::new(SabotagingVerifier {
        db_path: path.clone(),
    });
    let orch = Orchestrator::new(store, ScriptedGenerator::new(), verifier, fast_config(5));

    let err = orch
        .run_questions(questions(&["01", "02"]), "", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_storage());
    match err {
        EngineError::Storage {
            iteration, history, ..
        } => {
            assert_eq!(iteration, 1);
            assert_eq!(
                history.for_question("02"),
                &[RejectedAnswer {
                    answer_text: "old-wrong".to_string(),
                    hint: Some("earlier hint".to_string()),
                }]
            );
            assert!(history.for_question("05").is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
}

struct FailingSource;

#[async_trait]
impl QuestionSource for FailingSource {
    async fn list_questions(&self) -> anyhow::Result<Vec<Question>> {
        anyhow::bail!("question feed unavailable")
    }
}

#[tokio::test]
async fn test_question_source_failure_is_reported() {
    let orch = orchestrator(
        memory_store(),
        ScriptedGenerator::new(),
        ScriptedVerifier::new(vec![], all_correct()),
        fast_config(3),
    );
    let err = orch
        .run(&FailingSource, "", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::QuestionSource(ref m) if m.contains("unavailable")));
}

// === E) Cancellation ===

#[tokio::test]
async fn test_cancelled_before_start_submits_nothing() {
    let store = memory_store();
    let verifier = ScriptedVerifier::new(vec![], all_correct());
    let orch = orchestrator(
        store.clone(),
        ScriptedGenerator::new(),
        verifier.clone(),
        fast_config(3),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = orch
        .run_questions(questions(&["01"]), "", &cancel)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.iterations, 0);
    assert!(verifier.batches().is_empty());
    assert_eq!(
        store.get_run(&report.run_id).unwrap().unwrap().status,
        "cancelled"
    );
}

#[tokio::test]
async fn test_cancel_interrupts_inter_iteration_sleep() {
    let config = attest_core::EngineConfig {
        iteration_delay_ms: 60_000,
        ..fast_config(10)
    };
    let verifier = ScriptedVerifier::new(vec![], incorrect("01"));
    let orch = orchestrator(
        memory_store(),
        ScriptedGenerator::new(),
        verifier.clone(),
        config,
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        orch.run_questions(questions(&["01"]), "", &cancel),
    )
    .await
    .expect("cancellation must cut the sleep short")
    .unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.iterations, 1);
    assert_eq!(verifier.batches().len(), 1);
}

// === F) Persistence and reporting ===

#[tokio::test]
async fn test_restart_resumes_from_stored_answers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("answers.db");

    {
        let store = AnswerStore::open(&path, IdNormalizer::default()).unwrap();
        let verifier = ScriptedVerifier::new(vec![hint_response("02", "think smaller")], all_correct());
        let orch = orchestrator(store, ScriptedGenerator::new(), verifier, fast_config(1));
        let report = orch
            .run_questions(questions(&["01", "02"]), "", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::Exhausted);
    }

    let store = AnswerStore::open(&path, IdNormalizer::default()).unwrap();
    let generator = ScriptedGenerator::new();
    let verifier = ScriptedVerifier::new(vec![], all_correct());
    let orch = orchestrator(store, generator.clone(), verifier.clone(), fast_config(3));
    let report = orch
        .run_questions(questions(&["01", "02"]), "", &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert!(generator.requests_for("01").is_empty());
    assert_eq!(verifier.batches()[0].answer_for("01"), Some("01-1"));
    let request = &generator.requests_for("02")[0];
    assert_eq!(
        request.rejected,
        vec![RejectedAnswer {
            answer_text: "02-1".to_string(),
            hint: Some("think smaller".to_string()),
        }]
    );
    assert_eq!(request.hint.as_deref(), Some("think smaller"));
}

#[tokio::test]
async fn test_progress_sink_sees_every_iteration() {
    let events: Arc<Mutex<Vec<IterationEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_events = events.clone();
    let verifier = ScriptedVerifier::new(vec![incorrect("02")], all_correct());
    let orch = orchestrator(
        memory_store(),
        ScriptedGenerator::new(),
        verifier,
        fast_config(5),
    )
    .with_progress(Arc::new(move |e| sink_events.lock().unwrap().push(e)));

    orch.run_questions(questions(&["01", "02", "03"]), "", &CancellationToken::new())
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].outcome_kind, "sequential_prefix");
    assert_eq!(events[0].confirmed, 1);
    assert_eq!(events[1].outcome_kind, "all_correct");
    assert_eq!(events[1].confirmed, 3);
    assert_eq!(events[1].total, 3);
}

#[tokio::test]
async fn test_run_canonicalizes_and_dedupes_source_questions() {
    let source = StaticQuestions::new(vec![
        Question::new("3", "first"),
        Question::new(" 03", "duplicate"),
        Question::new("4", "second"),
    ]);
    let verifier = ScriptedVerifier::new(vec![], all_correct());
    let orch = orchestrator(
        memory_store(),
        ScriptedGenerator::new(),
        verifier.clone(),
        fast_config(3),
    );

    let report = orch
        .run(&source, "", &CancellationToken::new())
        .await
        .unwrap();

    let ids: Vec<String> = verifier.batches()[0]
        .entries
        .iter()
        .map(|e| e.question_id.clone())
        .collect();
    assert_eq!(ids, ["03", "04"]);
    assert_eq!(report.confirmed.len(), 2);
}
