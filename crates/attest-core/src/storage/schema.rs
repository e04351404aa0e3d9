//! SQLite schema for the answer store.
//!
//! Tables:
//! - `questions`: question text per id, registered once per run
//! - `answers`: confirmed and rejected answers (at most one confirmed per question)
//! - `runs`: one row per engine run
//! - `submissions`: append-only log of every verifier round trip

use crate::errors::StorageError;
use rusqlite::Connection;
use std::collections::HashSet;

pub const ANSWER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS questions (
    id               TEXT PRIMARY KEY,
    question         TEXT,
    volatile         INTEGER NOT NULL DEFAULT 0,
    registered_at    TEXT
);

CREATE TABLE IF NOT EXISTS answers (
    question_id      TEXT NOT NULL,
    answer           TEXT NOT NULL,
    is_correct       BOOLEAN NOT NULL,
    hint             TEXT,
    created_at       TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS runs (
    run_id           TEXT PRIMARY KEY,
    started_at       TEXT NOT NULL,
    finished_at      TEXT,
    status           TEXT NOT NULL,
    iterations       INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS submissions (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id           TEXT NOT NULL,
    iteration        INTEGER NOT NULL,
    batch_json       TEXT NOT NULL,
    fingerprint      TEXT NOT NULL,
    outcome_kind     TEXT NOT NULL,
    raw_response     TEXT,
    submitted_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_answers_question
    ON answers(question_id, is_correct);
CREATE INDEX IF NOT EXISTS idx_submissions_run
    ON submissions(run_id, iteration);
"#;

/// Bring stores created with the two-column `questions` layout up to date.
pub(crate) fn migrate_questions(conn: &Connection) -> Result<(), StorageError> {
    let cols = get_columns(conn, "questions")?;
    add_column_if_missing(conn, &cols, "questions", "volatile", "INTEGER NOT NULL DEFAULT 0")?;
    add_column_if_missing(conn, &cols, "questions", "registered_at", "TEXT")?;
    let cols = get_columns(conn, "answers")?;
    add_column_if_missing(conn, &cols, "answers", "hint", "TEXT")?;
    Ok(())
}

pub(crate) fn get_columns(conn: &Connection, table: &str) -> Result<HashSet<String>, StorageError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut out = HashSet::new();
    for r in rows {
        out.insert(r?);
    }
    Ok(out)
}

pub(crate) fn add_column_if_missing(
    conn: &Connection,
    cols: &HashSet<String>,
    table: &str,
    col: &str,
    ty: &str,
) -> Result<(), StorageError> {
    if !cols.contains(col) {
        let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, col, ty);
        conn.execute(&sql, [])?;
    }
    Ok(())
}
