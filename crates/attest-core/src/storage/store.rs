//! AnswerStore: SQLite-backed record of confirmed and rejected answers.
//!
//! Provides idempotent answer bookkeeping with:
//! - At most one confirmed answer per question
//! - Purge of rejected answers on first confirmation (same transaction)
//! - Rejected answers deduplicated by exact text
//! - Canonical question ids at every read/write boundary

use super::rows::{RunRow, SubmissionRow, WriteOutcome};
use super::schema::{migrate_questions, ANSWER_SCHEMA};
use crate::config::EngineConfig;
use crate::errors::StorageError;
use crate::model::{AnswerRecord, AnswerStatus, Batch, IdNormalizer, Question, RejectedAnswer};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle to the answer store. Cloning shares the connection; all
/// writes are serialized through it.
#[derive(Clone)]
pub struct AnswerStore {
    pub(crate) conn: Arc<Mutex<Connection>>,
    ids: IdNormalizer,
}

impl AnswerStore {
    /// Open a file-backed store.
    pub fn open(path: &Path, ids: IdNormalizer) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, ids)
    }

    /// Create an in-memory store (for testing and throwaway runs).
    pub fn memory(ids: IdNormalizer) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, ids)
    }

    pub fn from_config(cfg: &EngineConfig) -> Result<Self, StorageError> {
        match &cfg.db_path {
            Some(path) => Self::open(path, cfg.id_normalizer()),
            None => Self::memory(cfg.id_normalizer()),
        }
    }

    pub fn from_connection(conn: Connection, ids: IdNormalizer) -> Result<Self, StorageError> {
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ids,
        })
    }

    fn init_connection(conn: &Connection) -> Result<(), StorageError> {
        // WAL mode for file-backed DBs (no-op for in-memory)
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL");
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(ANSWER_SCHEMA)?;
        migrate_questions(conn)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    pub fn ids(&self) -> IdNormalizer {
        self.ids
    }

    // =========================================================================
    // Answer reads
    // =========================================================================

    pub fn get_confirmed(&self, question_id: &str) -> Result<Option<String>, StorageError> {
        let qid = self.ids.canonical(question_id);
        let conn = self.lock()?;
        let answer = conn
            .query_row(
                "SELECT answer FROM answers WHERE question_id = ?1 AND is_correct = 1
                 ORDER BY created_at ASC, rowid ASC LIMIT 1",
                [&qid],
                |row| row.get(0),
            )
            .optional()?;
        Ok(answer)
    }

    /// Prior rejected attempts, oldest first. Answer texts are unique.
    pub fn get_rejected(&self, question_id: &str) -> Result<Vec<RejectedAnswer>, StorageError> {
        let qid = self.ids.canonical(question_id);
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT answer, hint FROM answers WHERE question_id = ?1 AND is_correct = 0
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map([&qid], |row| {
                Ok(RejectedAnswer {
                    answer_text: row.get(0)?,
                    hint: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Most recent non-empty hint for the question.
    pub fn get_latest_hint(&self, question_id: &str) -> Result<Option<String>, StorageError> {
        let qid = self.ids.canonical(question_id);
        let conn = self.lock()?;
        let hint = conn
            .query_row(
                "SELECT hint FROM answers
                 WHERE question_id = ?1 AND hint IS NOT NULL AND hint != ''
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                [&qid],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hint)
    }

    /// Every row on file for the question, oldest first.
    pub fn records(&self, question_id: &str) -> Result<Vec<AnswerRecord>, StorageError> {
        let qid = self.ids.canonical(question_id);
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT question_id, answer, is_correct, hint, created_at FROM answers
             WHERE question_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let raw = stmt
            .query_map([&qid], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(question_id, answer_text, is_correct, hint, created_at)| {
                Ok(AnswerRecord {
                    question_id,
                    answer_text,
                    status: if is_correct {
                        AnswerStatus::Confirmed
                    } else {
                        AnswerStatus::Rejected
                    },
                    hint,
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }

    /// Snapshot of all confirmed answers keyed by canonical id.
    pub fn confirmed_answers(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT question_id, answer FROM answers WHERE is_correct = 1
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = BTreeMap::new();
        for (qid, answer) in rows {
            out.entry(qid).or_insert(answer);
        }
        Ok(out)
    }

    /// All rejected answers on file, grouped by question.
    pub fn rejection_history(&self) -> Result<BTreeMap<String, Vec<RejectedAnswer>>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT question_id, answer, hint FROM answers WHERE is_correct = 0
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    RejectedAnswer {
                        answer_text: row.get(1)?,
                        hint: row.get(2)?,
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut out: BTreeMap<String, Vec<RejectedAnswer>> = BTreeMap::new();
        for (qid, rejected) in rows {
            out.entry(qid).or_default().push(rejected);
        }
        Ok(out)
    }

    // =========================================================================
    // Answer writes
    // =========================================================================

    /// Confirm an answer. Idempotent: a question that already has a confirmed
    /// answer keeps it, whatever `answer_text` is. The first confirmation purges
    /// the question's rejected answers in the same transaction.
    pub fn record_confirmed(
        &self,
        question_id: &str,
        answer_text: &str,
    ) -> Result<WriteOutcome, StorageError> {
        let qid = self.ids.canonical(question_id);
        let conn = self.lock()?;
        with_immediate(&conn, |conn| {
            if is_registered_volatile(conn, &qid)? {
                tracing::warn!(question_id = %qid, "refusing to confirm a volatile question");
                return Ok(WriteOutcome::Ignored);
            }

            let existing: Option<String> = conn
                .query_row(
                    "SELECT answer FROM answers WHERE question_id = ?1 AND is_correct = 1 LIMIT 1",
                    [&qid],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing) = existing {
                if existing != answer_text {
                    tracing::warn!(
                        question_id = %qid,
                        kept = %existing,
                        offered = %answer_text,
                        "question already confirmed with a different answer; keeping the stored one"
                    );
                }
                return Ok(WriteOutcome::AlreadyPresent);
            }

            let purged = conn.execute(
                "DELETE FROM answers WHERE question_id = ?1 AND is_correct = 0",
                [&qid],
            )?;
            conn.execute(
                "INSERT INTO answers (question_id, answer, is_correct, hint, created_at)
                 VALUES (?1, ?2, 1, NULL, ?3)",
                params![qid, answer_text, now_timestamp()],
            )?;
            tracing::debug!(question_id = %qid, purged, "answer confirmed");
            Ok(WriteOutcome::Inserted)
        })
    }

    /// Append a rejected answer. An identical rejected answer already on file
    /// is left as is; so is any rejection for an already confirmed question.
    pub fn record_rejected(
        &self,
        question_id: &str,
        answer_text: &str,
        hint: Option<&str>,
    ) -> Result<WriteOutcome, StorageError> {
        let qid = self.ids.canonical(question_id);
        let hint = hint.map(str::trim).filter(|h| !h.is_empty());
        let conn = self.lock()?;
        with_immediate(&conn, |conn| {
            let confirmed: i64 = conn.query_row(
                "SELECT COUNT(*) FROM answers WHERE question_id = ?1 AND is_correct = 1",
                [&qid],
                |row| row.get(0),
            )?;
            if confirmed > 0 {
                tracing::warn!(question_id = %qid, "ignoring rejection for a confirmed question");
                return Ok(WriteOutcome::Ignored);
            }

            let duplicate: i64 = conn.query_row(
                "SELECT COUNT(*) FROM answers WHERE question_id = ?1 AND is_correct = 0 AND answer = ?2",
                params![qid, answer_text],
                |row| row.get(0),
            )?;
            if duplicate > 0 {
                tracing::warn!(
                    question_id = %qid,
                    answer = %answer_text,
                    "rejected answer already on file"
                );
                return Ok(WriteOutcome::AlreadyPresent);
            }

            conn.execute(
                "INSERT INTO answers (question_id, answer, is_correct, hint, created_at)
                 VALUES (?1, ?2, 0, ?3, ?4)",
                params![qid, answer_text, hint, now_timestamp()],
            )?;
            Ok(WriteOutcome::Inserted)
        })
    }

    // =========================================================================
    // Questions
    // =========================================================================

    /// Upsert the run's questions; text and volatility follow the latest source.
    pub fn register_questions(&self, questions: &[Question]) -> Result<(), StorageError> {
        let conn = self.lock()?;
        let registered_at = now_timestamp();
        with_immediate(&conn, |conn| {
            for q in questions {
                conn.execute(
                    r#"
                    INSERT INTO questions (id, question, volatile, registered_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(id) DO UPDATE SET
                        question = excluded.question,
                        volatile = excluded.volatile
                    "#,
                    params![
                        self.ids.canonical(&q.id),
                        q.text,
                        q.volatile,
                        registered_at
                    ],
                )?;
            }
            Ok(())
        })
    }

    pub fn is_volatile(&self, question_id: &str) -> Result<bool, StorageError> {
        let qid = self.ids.canonical(question_id);
        let conn = self.lock()?;
        is_registered_volatile(&conn, &qid)
    }

    // =========================================================================
    // Runs and submissions
    // =========================================================================

    pub fn create_run(&self) -> Result<String, StorageError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO runs (run_id, started_at, status) VALUES (?1, ?2, 'running')",
            params![run_id, now_timestamp()],
        )?;
        Ok(run_id)
    }

    pub fn finalize_run(
        &self,
        run_id: &str,
        status: &str,
        iterations: u32,
    ) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, iterations = ?3 WHERE run_id = ?4",
            params![status, now_timestamp(), iterations, run_id],
        )?;
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<RunRow>, StorageError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT run_id, started_at, finished_at, status, iterations FROM runs WHERE run_id = ?1",
                [run_id],
                |row| {
                    Ok(RunRow {
                        run_id: row.get(0)?,
                        started_at: row.get(1)?,
                        finished_at: row.get(2)?,
                        status: row.get(3)?,
                        iterations: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn record_submission(
        &self,
        run_id: &str,
        iteration: u32,
        batch: &Batch,
        outcome_kind: &str,
        raw_response: Option<&str>,
    ) -> Result<(), StorageError> {
        let batch_json = serde_json::to_string(batch)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO submissions (
                run_id, iteration, batch_json, fingerprint, outcome_kind, raw_response, submitted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                run_id,
                iteration,
                batch_json,
                batch.fingerprint(),
                outcome_kind,
                raw_response,
                now_timestamp(),
            ],
        )?;
        Ok(())
    }

    pub fn submissions_for_run(&self, run_id: &str) -> Result<Vec<SubmissionRow>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, iteration, batch_json, fingerprint, outcome_kind, raw_response, submitted_at
             FROM submissions WHERE run_id = ?1 ORDER BY id ASC",
        )?;
        let raw = stmt
            .query_map([run_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(
                |(run_id, iteration, batch_json, fingerprint, outcome_kind, raw_response, submitted_at)| {
                    Ok(SubmissionRow {
                        run_id,
                        iteration,
                        batch: serde_json::from_str(&batch_json)?,
                        fingerprint,
                        outcome_kind,
                        raw_response,
                        submitted_at,
                    })
                },
            )
            .collect()
    }
}

fn is_registered_volatile(conn: &Connection, qid: &str) -> Result<bool, StorageError> {
    let flag: Option<bool> = conn
        .query_row(
            "SELECT volatile FROM questions WHERE id = ?1",
            [qid],
            |row| row.get(0),
        )
        .optional()?;
    Ok(flag.unwrap_or(false))
}

/// Run `f` inside `BEGIN IMMEDIATE` so concurrent writers (other handles or
/// processes on the same file) cannot interleave with it.
fn with_immediate<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, StorageError>,
) -> Result<T, StorageError> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    let result = f(conn);
    match result {
        Ok(value) => {
            if let Err(e) = conn.execute_batch("COMMIT") {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e.into());
            }
            Ok(value)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    // SQLite CURRENT_TIMESTAMP layout, used by older stores.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| StorageError::CorruptRow {
            table: "answers".to_string(),
            detail: format!("bad created_at '{}': {}", raw, e),
        })
}
