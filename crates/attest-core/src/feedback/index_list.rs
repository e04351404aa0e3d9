//! Index-list responses: `{"code": .., "message": .., "ok": [..], "failed": [..]}`
//! where every entry reads `index[<n>] = <value>` and `n` is a batch position.

use super::{IndexListFeedback, IndexedAnswer};
use crate::errors::ParseError;
use crate::model::Batch;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    static ref INDEX_ENTRY: Regex = Regex::new(r"(?s)^\s*index\s*\[\s*(\d+)\s*\]\s*=\s*(.*?)\s*$").unwrap();
}

/// True when the envelope carries an `ok` or `failed` list.
pub(crate) fn matches(envelope: &Value) -> bool {
    envelope.get("ok").map(Value::is_array).unwrap_or(false)
        || envelope.get("failed").map(Value::is_array).unwrap_or(false)
}

/// Parse both lists. Malformed entries are logged and skipped.
pub(crate) fn parse(envelope: &Value, batch: &Batch) -> IndexListFeedback {
    let (ok, ok_skipped) = parse_list(envelope.get("ok"), batch);
    let (failed, failed_skipped) = parse_list(envelope.get("failed"), batch);
    let raw_failed = envelope
        .get("failed")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);

    IndexListFeedback {
        ok,
        failed,
        code: envelope.get("code").and_then(Value::as_i64),
        message: envelope
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        skipped: ok_skipped + failed_skipped,
        reported_failures: raw_failed,
    }
}

fn parse_list(list: Option<&Value>, batch: &Batch) -> (Vec<IndexedAnswer>, usize) {
    let Some(items) = list.and_then(Value::as_array) else {
        return (Vec::new(), 0);
    };

    let mut out = Vec::with_capacity(items.len());
    let mut skipped = 0;
    for item in items {
        match parse_entry(item, batch) {
            Ok(entry) => out.push(entry),
            Err(e) => {
                tracing::warn!(error = %e, "skipping feedback entry");
                skipped += 1;
            }
        }
    }
    (out, skipped)
}

pub(crate) fn parse_entry(item: &Value, batch: &Batch) -> Result<IndexedAnswer, ParseError> {
    let text = item.as_str().ok_or_else(|| ParseError::MalformedEntry {
        entry: item.to_string(),
    })?;
    let caps = INDEX_ENTRY
        .captures(text)
        .ok_or_else(|| ParseError::MalformedEntry {
            entry: text.to_string(),
        })?;
    let index: usize = caps[1].parse().map_err(|_| ParseError::MalformedEntry {
        entry: text.to_string(),
    })?;
    let entry = batch.get(index).ok_or(ParseError::IndexOutOfRange {
        index,
        batch_len: batch.len(),
    })?;

    Ok(IndexedAnswer {
        index,
        question_id: entry.question_id.clone(),
        value: unquote(&caps[2]).to_string(),
    })
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
