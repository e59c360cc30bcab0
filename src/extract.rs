//! Reconstruction of canonical MCQ records from raw model output.
//!
//! Two independent strategies match the two prompt grammars: a per-line
//! decoder for the compact NDJSON grammar, and a block parser for the
//! labeled Q/A-D/Answer grammar. Failures are per-record for both paths;
//! extraction as a whole fails only when a complete pass yields nothing.

use crate::error::ExtractError;
use serde::{Deserialize, Serialize};

/// Options per question. Records with any other option count are discarded.
pub const OPTION_COUNT: usize = 4;

const OPTION_LABELS: [char; 4] = ['A', 'B', 'C', 'D'];
const LABEL_DELIMITERS: [char; 3] = [':', '.', ')'];

/// A well-formed multiple-choice question. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mcq {
    pub question: String,
    pub options: Vec<String>,
    pub answer_index: u8,
}

// The two wire spellings the decoder accepts, tried in priority order.

#[derive(Debug, Deserialize)]
struct CompactWire {
    q: String,
    o: Vec<String>,
    #[serde(default)]
    a: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct FullWire {
    question: String,
    options: Vec<String>,
    #[serde(default)]
    answer_index: Option<serde_json::Value>,
}

/// Decode one produced line from the compact grammar. Returns `None` for
/// malformed JSON or records that fail validation; never an error.
pub fn decode_line(line: &str) -> Option<Mcq> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    decode_value(&value)
}

fn decode_value(value: &serde_json::Value) -> Option<Mcq> {
    let candidate = if let Ok(wire) = serde_json::from_value::<CompactWire>(value.clone()) {
        Mcq {
            question: wire.q,
            options: wire.o,
            answer_index: answer_from_value(wire.a.as_ref()),
        }
    } else if let Ok(wire) = serde_json::from_value::<FullWire>(value.clone()) {
        Mcq {
            question: wire.question,
            options: wire.options,
            answer_index: answer_from_value(wire.answer_index.as_ref()),
        }
    } else {
        return None;
    };
    validate(candidate)
}

/// A missing or invalid answer index defaults to 0.
fn answer_from_value(value: Option<&serde_json::Value>) -> u8 {
    value
        .and_then(|v| v.as_u64())
        .filter(|&n| n < OPTION_COUNT as u64)
        .map(|n| n as u8)
        .unwrap_or(0)
}

fn validate(mcq: Mcq) -> Option<Mcq> {
    if mcq.question.trim().is_empty() {
        return None;
    }
    if mcq.options.len() != OPTION_COUNT {
        return None;
    }
    if mcq.answer_index as usize >= OPTION_COUNT {
        return None;
    }
    Some(mcq)
}

/// Parse the full accumulated output of a labeled-grammar model.
///
/// Blocks missing any of the four options, or without a resolvable answer,
/// are rejected whole; partial-option records are never accepted. As a last
/// resort, when zero blocks parse and the text looks like it contains a
/// JSON array of objects, a whole-text array parse is attempted. Errs only
/// when the complete pass yields zero valid records.
pub fn parse_labeled_blocks(raw: &str, limit: usize) -> Result<Vec<Mcq>, ExtractError> {
    let mut mcqs = Vec::new();
    for block in split_blocks(raw) {
        if let Some(mcq) = parse_block(&block) {
            mcqs.push(mcq);
            if mcqs.len() >= limit {
                break;
            }
        }
    }

    if mcqs.is_empty() && raw.contains('[') && raw.contains('{') {
        if let Some(mut fallback) = whole_text_array(raw) {
            fallback.truncate(limit);
            mcqs = fallback;
        }
    }

    if mcqs.is_empty() {
        return Err(ExtractError::NoRecords);
    }
    Ok(mcqs)
}

/// Split raw output on `Q<k>:` markers. The marker line's remainder is kept
/// as the first line of the block.
fn split_blocks(raw: &str) -> Vec<Vec<String>> {
    let mut blocks: Vec<Vec<String>> = Vec::new();
    for line in raw.lines() {
        if let Some(rest) = question_label(line) {
            blocks.push(vec![rest.to_string()]);
        } else if let Some(current) = blocks.last_mut() {
            current.push(line.to_string());
        }
    }
    blocks
}

/// Strip a leading `Q<k>:` (or `Q<k>.` / `Q<k>)`) label, returning the rest.
fn question_label(line: &str) -> Option<&str> {
    let rest = line.trim_start();
    let rest = rest.strip_prefix(['Q', 'q'])?;
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let rest = rest[digits..].trim_start();
    let rest = rest.strip_prefix(LABEL_DELIMITERS)?;
    Some(rest.trim())
}

fn parse_block(lines: &[String]) -> Option<Mcq> {
    let question_at = lines.iter().position(|l| !l.trim().is_empty())?;
    let question = lines[question_at].trim().to_string();
    // Labels are only meaningful below the question line; a question that
    // itself starts with "A:" must not be consumed as option A.
    let body = &lines[question_at + 1..];

    // Option labels A-D must appear in order, each with non-empty text.
    let mut options = Vec::with_capacity(OPTION_COUNT);
    let mut body_iter = body.iter();
    for label in OPTION_LABELS {
        let text = body_iter.by_ref().find_map(|l| option_text(l, label))?;
        options.push(text.to_string());
    }

    let answer_index = body.iter().find_map(|l| answer_line(l))?;

    validate(Mcq {
        question,
        options,
        answer_index,
    })
}

fn option_text(line: &str, label: char) -> Option<&str> {
    let rest = line.trim_start();
    let rest = rest
        .strip_prefix(label)
        .or_else(|| rest.strip_prefix(label.to_ascii_lowercase()))?;
    let rest = rest.trim_start().strip_prefix(LABEL_DELIMITERS)?;
    let text = rest.trim();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Resolve an `Answer:` / `Answer)` line (case-insensitive) to an index.
/// Letters map via their position in the label set, digits directly.
fn answer_line(line: &str) -> Option<u8> {
    let trimmed = line.trim_start();
    let head = trimmed.get(..6)?;
    if !head.eq_ignore_ascii_case("answer") {
        return None;
    }
    let rest = trimmed[6..].trim_start().strip_prefix(LABEL_DELIMITERS)?;
    for c in rest.chars() {
        let upper = c.to_ascii_uppercase();
        if let Some(idx) = OPTION_LABELS.iter().position(|&l| l == upper) {
            return Some(idx as u8);
        }
        if let Some(digit) = c.to_digit(10) {
            if digit < OPTION_COUNT as u32 {
                return Some(digit as u8);
            }
            return None;
        }
        if !c.is_whitespace() {
            return None;
        }
    }
    None
}

/// Whole-text JSON array fallback for models that ignored the labeled
/// grammar and emitted an array of objects instead.
fn whole_text_array(raw: &str) -> Option<Vec<Mcq>> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end <= start {
        return None;
    }
    let values: Vec<serde_json::Value> = serde_json::from_str(&raw[start..=end]).ok()?;
    let mcqs: Vec<Mcq> = values.iter().filter_map(decode_value).collect();
    if mcqs.is_empty() {
        None
    } else {
        Some(mcqs)
    }
}
