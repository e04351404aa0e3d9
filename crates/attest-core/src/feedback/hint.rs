//! Hint extraction for sequential-prefix responses.
//!
//! The hint arrives either as a field of the JSON envelope or as a
//! `{"hint": "..."}` fragment trailing free text. Either way it may still
//! carry literal `\uXXXX` sequences after JSON decoding.

use crate::errors::ParseError;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    /// Quoted hint value inside a fragment that is not valid JSON as a whole.
    static ref HINT_FIELD: Regex = Regex::new(r#""hint"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap();
}

/// Find and decode the hint attached to a response, if any.
pub(crate) fn extract_hint(raw: &str, envelope: Option<&Value>) -> Option<String> {
    if let Some(h) = envelope.and_then(|v| v.get("hint")).and_then(Value::as_str) {
        return normalize(decode_unicode_escapes(h));
    }

    for (idx, _) in raw.match_indices("\"hint\"") {
        let Some(start) = raw[..idx].rfind('{') else {
            continue;
        };
        let parsed = serde_json::Deserializer::from_str(&raw[start..])
            .into_iter::<Value>()
            .next();
        if let Some(Ok(v)) = parsed {
            if let Some(h) = v.get("hint").and_then(Value::as_str) {
                return normalize(decode_unicode_escapes(h));
            }
        }
    }

    let caps = HINT_FIELD.captures(raw)?;
    let quoted = caps.get(1)?.as_str();
    match decode_json_string(quoted) {
        Ok(decoded) => normalize(decode_unicode_escapes(&decoded)),
        Err(e) => {
            tracing::warn!(error = %e, "hint is not a valid JSON string; using it verbatim");
            normalize(decode_unicode_escapes(quoted))
        }
    }
}

fn decode_json_string(quoted: &str) -> Result<String, ParseError> {
    serde_json::from_str::<String>(&format!("\"{}\"", quoted)).map_err(|e| ParseError::Hint {
        raw: quoted.to_string(),
        detail: e.to_string(),
    })
}

fn normalize(hint: String) -> Option<String> {
    let trimmed = hint.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Replace literal `\uXXXX` sequences (including surrogate pairs) with the
/// characters they encode. Anything that does not decode is kept as written.
pub fn decode_unicode_escapes(input: &str) -> String {
    if !input.contains("\\u") {
        return input.to_string();
    }

    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < chars.len() {
        if let Some(unit) = escape_at(&chars, i) {
            let mut units = vec![unit];
            let mut j = i + 6;
            if (0xD800..0xDC00).contains(&unit) {
                if let Some(low) = escape_at(&chars, j) {
                    if (0xDC00..0xE000).contains(&low) {
                        units.push(low);
                        j += 6;
                    }
                }
            }
            let decoded: String = char::decode_utf16(units.iter().copied())
                .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect();
            out.push_str(&decoded);
            i = j;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

fn escape_at(chars: &[char], i: usize) -> Option<u16> {
    if i + 6 > chars.len() || chars[i] != '\\' || chars[i + 1] != 'u' {
        return None;
    }
    let hex: String = chars[i + 2..i + 6].iter().collect();
    u16::from_str_radix(&hex, 16).ok()
}
