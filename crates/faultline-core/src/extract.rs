//! Tolerant recovery of structured output from model responses.
//!
//! Model answers are prose that usually, but not always, contain a JSON
//! object. [`recover`] picks the balanced region most likely to be the
//! answer and returns [`Extraction::Unparsed`] instead of failing when
//! there is none.
//!
//! # Algorithm
//!
//! 1. Parse the whole (trimmed) response; if it parses it is the answer.
//! 2. Collect candidates from the body of each fenced code block
//!    (```` ```json ````).
//! 3. Collect candidates from balanced `{…}` and `[…]` regions. A region
//!    that does not parse is descended into, so a valid nested object
//!    inside malformed wrapping is still found.
//! 4. Pick the best candidate: a non-empty object over a non-empty array
//!    over an empty value, then fenced over bare, then the longer region.
//!    Ties go to the earliest. An incidental `{}` in prose never hides
//!    the real answer.
//!
//! Every parse attempt first tries strict JSON and then a lenient
//! coercion of common near-JSON output (comments, trailing commas,
//! Python literals, smart quotes, single-quoted strings).

use serde_json::Value;

use crate::models::LineSpan;

/// Outcome of response recovery.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Parsed(Value),
    /// No well-formed region was found; carries the reason for logs.
    Unparsed { reason: String },
}

impl Extraction {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Extraction::Parsed(v) => Some(v),
            Extraction::Unparsed { .. } => None,
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, Extraction::Parsed(_))
    }
}

/// Recover the structured region of a raw model response.
pub fn recover(text: &str) -> Extraction {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Extraction::Unparsed {
            reason: "empty response".to_string(),
        };
    }

    if let Some(v) = parse_structured(trimmed) {
        return Extraction::Parsed(v);
    }

    let mut candidates: Vec<Candidate> = fenced_blocks(trimmed)
        .into_iter()
        .filter_map(|block| parse_structured(block).map(|v| Candidate::new(v, block.len(), true)))
        .collect();
    for (open, close) in [('{', '}'), ('[', ']')] {
        scan_regions(trimmed, open, close, &mut candidates);
    }

    let mut best: Option<Candidate> = None;
    for c in candidates {
        if best.as_ref().map_or(true, |b| c.key() > b.key()) {
            best = Some(c);
        }
    }
    if let Some(best) = best {
        return Extraction::Parsed(best.value);
    }

    Extraction::Unparsed {
        reason: format!(
            "no balanced JSON region in {} chars of output",
            trimmed.chars().count()
        ),
    }
}

/// Parse `s` strictly, then leniently; only objects and arrays count.
fn parse_structured(s: &str) -> Option<Value> {
    let strict = serde_json::from_str::<Value>(s).ok();
    let value = strict.or_else(|| serde_json::from_str::<Value>(&coerce_json_like(s)).ok())?;
    match value {
        Value::Object(_) | Value::Array(_) => Some(value),
        _ => None,
    }
}

/// Bodies of ```` ``` ```` fenced blocks, with an optional language tag removed.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let tag = after[..body_start].trim();
        let body_start = if tag.chars().all(|c| c.is_ascii_alphanumeric()) {
            body_start
        } else {
            0
        };
        let body = &after[body_start..];
        match body.find("```") {
            Some(close) => {
                blocks.push(body[..close].trim());
                rest = &body[close + 3..];
            }
            None => break,
        }
    }
    blocks
}

/// A parsed region competing to be the answer.
struct Candidate {
    value: Value,
    len: usize,
    fenced: bool,
}

impl Candidate {
    fn new(value: Value, len: usize, fenced: bool) -> Self {
        Self { value, len, fenced }
    }

    /// Ordering key; greater is better.
    fn key(&self) -> (u8, bool, usize) {
        let weight = match &self.value {
            Value::Object(map) if !map.is_empty() => 2,
            Value::Array(items) if !items.is_empty() => 1,
            _ => 0,
        };
        (weight, self.fenced, self.len)
    }
}

/// Recursive descent over balanced `open…close` regions of `text`.
///
/// A region that parses is collected whole; one that does not is
/// descended into.
fn scan_regions(text: &str, open: char, close: char, out: &mut Vec<Candidate>) {
    let mut from = 0;
    while let Some(rel) = text[from..].find(open) {
        let start = from + rel;
        match balanced_end(text, start, open, close) {
            Some(end) => {
                let region = &text[start..=end];
                match parse_structured(region) {
                    Some(v) => out.push(Candidate::new(v, region.len(), false)),
                    None => scan_regions(&text[start + open.len_utf8()..end], open, close, out),
                }
                from = end + close.len_utf8();
            }
            None => {
                // Unterminated region (truncated output): look for a complete
                // region nested inside it.
                from = start + open.len_utf8();
            }
        }
        if from >= text.len() {
            break;
        }
    }
}

/// Byte index of the delimiter closing the region opened at `start`.
///
/// Delimiters inside double-quoted strings are ignored.
fn balanced_end(text: &str, start: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_str = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_str {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_str = false;
            }
            continue;
        }
        if c == '"' {
            in_str = true;
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(start + i);
            }
        }
    }
    None
}

/// Rewrite common near-JSON into JSON.
///
/// Handles `//`, `/* */` and line-leading `#` comments, trailing commas,
/// `True`/`False`/`None`, smart quotes, single-quoted strings and `...`
/// placeholders. Content of double-quoted strings is left untouched.
pub fn coerce_json_like(s: &str) -> String {
    let normalized: String = s
        .chars()
        .map(|c| match c {
            '\u{201c}' | '\u{201d}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect();
    let chars: Vec<char> = normalized.chars().collect();
    let mut out = String::with_capacity(chars.len());
    let mut i = 0;
    let mut line_start = true;

    while i < chars.len() {
        let c = chars[i];

        if c == '"' {
            let end = string_end(&chars, i, '"');
            out.extend(&chars[i..end]);
            i = end;
            line_start = false;
            continue;
        }

        if c == '\'' {
            let end = string_end(&chars, i, '\'');
            let inner_end = if end > i + 1 && chars[end - 1] == '\'' { end - 1 } else { end };
            out.push('"');
            let mut j = i + 1;
            while j < inner_end {
                match chars[j] {
                    '\\' if j + 1 < inner_end && chars[j + 1] == '\'' => {
                        out.push('\'');
                        j += 2;
                        continue;
                    }
                    '"' => out.push_str("\\\""),
                    other => out.push(other),
                }
                j += 1;
            }
            out.push('"');
            i = end;
            line_start = false;
            continue;
        }

        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i = (i + 2).min(chars.len());
            continue;
        }

        if c == '#' && line_start {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if c == '.' && chars.get(i + 1) == Some(&'.') && chars.get(i + 2) == Some(&'.') {
            i += 3;
            continue;
        }

        if c == '}' || c == ']' {
            let trimmed_len = out.trim_end().len();
            out.truncate(trimmed_len);
            if out.ends_with(',') {
                out.pop();
            }
            out.push(c);
            i += 1;
            line_start = false;
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            out.push_str(match word.as_str() {
                "True" => "true",
                "False" => "false",
                "None" => "null",
                _ => &word,
            });
            line_start = false;
            continue;
        }

        if c == '\n' {
            line_start = true;
        } else if !c.is_whitespace() {
            line_start = false;
        }
        out.push(c);
        i += 1;
    }

    out
}

/// Index one past the closing `quote` of the string starting at `start`.
fn string_end(chars: &[char], start: usize, quote: char) -> usize {
    let mut j = start + 1;
    while j < chars.len() {
        match chars[j] {
            '\\' => j += 2,
            c if c == quote => return j + 1,
            '\n' if quote == '\'' => return j,
            _ => j += 1,
        }
    }
    chars.len()
}

/// Interpret a loosely shaped span list.
///
/// Accepts `[[s, e], …]`, a single `[s, e]`, `{"start": s, "end": e}`
/// objects (also `line_start`/`line_end`, `lineno`/`end_lineno`),
/// `"s-e"` strings and bare line numbers. Invalid entries are dropped.
pub fn parse_spans(value: &Value) -> Vec<LineSpan> {
    let mut spans = Vec::new();
    match value {
        Value::Array(items) => {
            let pair = (items.first().and_then(as_line), items.get(1).and_then(as_line));
            if let (Some(start), Some(end)) = pair {
                if let Some(span) = LineSpan::new(start, end) {
                    spans.push(span);
                    return spans;
                }
            }
            for item in items {
                spans.extend(parse_span_item(item));
            }
        }
        other => spans.extend(parse_span_item(other)),
    }
    spans
}

fn parse_span_item(item: &Value) -> Option<LineSpan> {
    match item {
        Value::Array(pair) if pair.len() >= 2 => {
            LineSpan::new(as_line(&pair[0])?, as_line(&pair[1])?)
        }
        Value::Object(map) => {
            let start = ["start", "line_start", "lineStart", "from", "lineno"]
                .iter()
                .find_map(|k| map.get(*k).and_then(as_line))?;
            let end = ["end", "line_end", "lineEnd", "to", "end_lineno"]
                .iter()
                .find_map(|k| map.get(*k).and_then(as_line))
                .unwrap_or(start);
            LineSpan::new(start, end)
        }
        Value::String(s) => {
            let (a, b) = s.split_once('-').unwrap_or((s.as_str(), s.as_str()));
            let a = a.trim().trim_start_matches(['L', 'l']);
            let b = b.trim().trim_start_matches(['L', 'l']);
            LineSpan::new(a.parse().ok()?, b.parse().ok()?)
        }
        Value::Number(_) => as_line(item).map(LineSpan::single),
        _ => None,
    }
}

fn as_line(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Collect string entries of an array field, ignoring non-strings.
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
