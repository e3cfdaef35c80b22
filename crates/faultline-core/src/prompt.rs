//! Compiled-in prompt templates for both phases.

use std::fmt::Write as _;

use crate::models::{Chunk, CoverageMark, Mode, Summary, SummaryBody};
use crate::model::Prompt;
use crate::progress::Phase;

const INDEX_SYSTEM: &str = "\
You are indexing the ORIGINAL version of a Python code base so that a later
pass can spot injected faults. Read the numbered code and describe what it
is meant to do.

Respond with exactly one JSON object and nothing else:
{\"symbols\": [\"names defined or heavily used\"],
 \"intents\": [\"what the code is meant to do\"],
 \"invariants\": [\"conditions that must hold for correct behaviour\"],
 \"risky_spans\": [[start_line, end_line]]}
Line numbers refer to the numbers printed in the left margin.";

const DETECT_SYSTEM: &str = "\
You are reviewing a possibly MUTATED version of a Python code base. A small
fault (changed operator, constant, condition or call) may have been injected.
Compare the code with the reference summary of the original, use the test
coverage and issue reports as hints, and decide whether this chunk contains
the fault.

Respond with exactly one JSON object and nothing else:
{\"suspicious\": true or false,
 \"confidence\": number between 0 and 1,
 \"line_spans\": [[start_line, end_line]],
 \"explanation\": \"short reason\",
 \"repair\": \"unified diff that fixes the fault, or empty\"}
Line numbers refer to the numbers printed in the left margin.";

/// Printed in place of a summary when the chunk has no ORIG counterpart.
pub const STRUCTURALLY_NEW: &str =
    "STRUCTURALLY NEW CHUNK: this code has no counterpart in the original version.";

fn representation(mode: Mode) -> &'static str {
    match mode {
        Mode::Text => "flattened source text",
        Mode::Graph => "source of AST graph nodes",
    }
}

/// Code lines prefixed with their file line numbers.
pub fn numbered(chunk: &Chunk) -> String {
    let mut out = String::with_capacity(chunk.text.len() + chunk.text.len() / 4);
    for (i, line) in chunk.text.split('\n').enumerate() {
        let _ = writeln!(out, "{:>5} | {}", chunk.span.start as usize + i, line);
    }
    out
}

fn header(chunk: &Chunk, mode: Mode) -> String {
    let mut out = format!(
        "File: {}\nChunk: {} (lines {}-{}, {})\n",
        chunk.file,
        chunk.id,
        chunk.span.start,
        chunk.span.end,
        representation(mode)
    );
    if !chunk.symbols.is_empty() {
        let _ = writeln!(out, "Symbols: {}", chunk.symbols.join(", "));
    }
    out
}

pub fn index_prompt(chunk: &Chunk, mode: Mode) -> Prompt {
    Prompt {
        phase: Phase::Index,
        chunk_id: chunk.id.clone(),
        system: INDEX_SYSTEM.to_string(),
        user: format!("{}\n{}", header(chunk, mode), numbered(chunk)),
    }
}

pub fn detect_prompt(chunk: &Chunk, mode: Mode, summary: Option<&Summary>) -> Prompt {
    let mut user = header(chunk, mode);

    user.push_str("\nReference summary of the original code:\n");
    match summary.map(|s| &s.body) {
        Some(SummaryBody::Structured(notes)) => {
            for (label, items) in [
                ("Intents", &notes.intents),
                ("Invariants", &notes.invariants),
                ("Symbols", &notes.symbols),
            ] {
                if !items.is_empty() {
                    let _ = writeln!(user, "- {}: {}", label, items.join("; "));
                }
            }
            if !notes.risky_spans.is_empty() {
                let spans: Vec<String> = notes.risky_spans.iter().map(|s| s.to_string()).collect();
                let _ = writeln!(user, "- Risky lines: {}", spans.join(", "));
            }
        }
        Some(SummaryBody::FreeText(text)) => {
            let _ = writeln!(user, "{}", text.trim());
        }
        Some(SummaryBody::Unsummarized) => user.push_str("(not summarized)\n"),
        None => {
            let _ = writeln!(user, "{}", STRUCTURALLY_NEW);
        }
    }

    user.push_str("\nTest coverage: ");
    match &chunk.coverage {
        CoverageMark::Covered { executed_lines, .. } if !executed_lines.is_empty() => {
            let _ = writeln!(
                user,
                "executed by tests ({} line(s) of this chunk)",
                executed_lines.len()
            );
        }
        CoverageMark::Covered { .. } => user.push_str("executed by tests\n"),
        CoverageMark::Uncovered => user.push_str("NOT executed by any test\n"),
        CoverageMark::Unknown => user.push_str("unknown\n"),
    }

    if !chunk.issues.is_empty() {
        user.push_str("\nRelated issue reports:\n");
        for issue in &chunk.issues {
            let number = issue.number.map(|n| format!("#{} ", n)).unwrap_or_default();
            let _ = writeln!(user, "- {}{}: {}", number, issue.title, issue.excerpt);
        }
    }

    user.push_str("\nCode:\n");
    user.push_str(&numbered(chunk));

    Prompt {
        phase: Phase::Detect,
        chunk_id: chunk.id.clone(),
        system: DETECT_SYSTEM.to_string(),
        user,
    }
}
