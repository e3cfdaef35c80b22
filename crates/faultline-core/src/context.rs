//! Joins test coverage and issue reports onto chunks.
//!
//! Coverage is matched by file path (normalized, or component suffix) and
//! then by line span or graph node id. Issues are matched by mentions of
//! the chunk's path, file name, symbols or file stem.

use crate::artifact::{normalize_path, CoverageMap, IssueReport};
use crate::models::{Chunk, CoverageMark, IssueExcerpt};

/// Upper bound on issue excerpts attached to one chunk.
pub const MAX_ISSUE_EXCERPTS: usize = 3;

const EXCERPT_CHARS: usize = 240;
const MIN_TERM_LEN: usize = 4;

/// Annotate chunks in place with coverage marks and issue excerpts.
pub fn annotate(chunks: &mut [Chunk], coverage: Option<&CoverageMap>, issues: &[IssueReport]) {
    let lowered: Vec<String> = issues.iter().map(|i| i.full_text().to_lowercase()).collect();
    for chunk in chunks.iter_mut() {
        chunk.coverage = match coverage {
            Some(cov) => coverage_mark(chunk, cov),
            None => CoverageMark::Unknown,
        };
        chunk.issues = issue_excerpts(chunk, issues, &lowered);
    }
}

/// Coverage mark for one chunk.
///
/// `Unknown` only when neither the chunk's file nor its nodes appear in
/// the coverage data.
pub fn coverage_mark(chunk: &Chunk, coverage: &CoverageMap) -> CoverageMark {
    let file = coverage.for_file(&chunk.file);
    let executed_lines: Vec<u32> = file
        .map(|f| f.executed.range(chunk.span.start..=chunk.span.end).copied().collect())
        .unwrap_or_default();
    let executed_nodes: Vec<String> = chunk
        .node_ids
        .iter()
        .filter(|id| coverage.executed_nodes.contains(*id))
        .cloned()
        .collect();

    if !executed_lines.is_empty() || !executed_nodes.is_empty() {
        CoverageMark::Covered {
            executed_lines,
            executed_nodes,
        }
    } else if file.is_some()
        || (!chunk.node_ids.is_empty() && !coverage.executed_nodes.is_empty())
    {
        CoverageMark::Uncovered
    } else {
        CoverageMark::Unknown
    }
}

/// Terms an issue may use to refer to a chunk, most specific first.
fn search_terms(chunk: &Chunk) -> Vec<(String, bool)> {
    let path = normalize_path(&chunk.file);
    let name = path.rsplit('/').next().unwrap_or(&path).to_string();
    let mut terms = vec![(path.clone(), false)];
    if name != path {
        terms.push((name.clone(), false));
    }
    for symbol in &chunk.symbols {
        let symbol = symbol.to_lowercase();
        let last = symbol.rsplit(['.', ':']).next().unwrap_or(&symbol).to_string();
        for term in [symbol.clone(), last] {
            if term.len() >= MIN_TERM_LEN && !terms.iter().any(|(t, _)| *t == term) {
                terms.push((term, true));
            }
        }
    }
    if let Some((stem, _)) = name.rsplit_once('.') {
        if stem.len() >= MIN_TERM_LEN && !terms.iter().any(|(t, _)| t == stem) {
            terms.push((stem.to_string(), true));
        }
    }
    terms
}

fn issue_excerpts(chunk: &Chunk, issues: &[IssueReport], lowered: &[String]) -> Vec<IssueExcerpt> {
    let terms = search_terms(chunk);
    let mut out = Vec::new();
    for (issue, text) in issues.iter().zip(lowered) {
        let hit = terms.iter().find_map(|(term, whole_word)| {
            let at = if *whole_word {
                find_word(text, term)
            } else {
                text.find(term.as_str())
            }?;
            Some((term, at))
        });
        if let Some((term, at)) = hit {
            out.push(IssueExcerpt {
                number: issue.number,
                title: issue.title.clone(),
                excerpt: excerpt_around(&issue.full_text(), at),
                matched: term.clone(),
            });
            if out.len() == MAX_ISSUE_EXCERPTS {
                break;
            }
        }
    }
    out
}

/// Byte offset of `word` in `text` bounded by non-identifier characters.
fn find_word(text: &str, word: &str) -> Option<usize> {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    let mut from = 0;
    while let Some(rel) = text[from..].find(word) {
        let at = from + rel;
        let before = text[..at].chars().next_back();
        let after = text[at + word.len()..].chars().next();
        if !before.is_some_and(is_ident) && !after.is_some_and(is_ident) {
            return Some(at);
        }
        from = at + word.len();
    }
    None
}

/// The line of `text` containing byte offset `at`, clipped.
///
/// Offsets come from the lowercased text; lowercasing can shift offsets for
/// non-ASCII input, so the offset is clamped onto a char boundary.
fn excerpt_around(text: &str, at: usize) -> String {
    let mut at = at.min(text.len());
    while at > 0 && !text.is_char_boundary(at) {
        at -= 1;
    }
    let start = text[..at].rfind('\n').map_or(0, |i| i + 1);
    let end = text[at..].find('\n').map_or(text.len(), |i| at + i);
    let line = text[start..end].trim();
    if line.chars().count() <= EXCERPT_CHARS {
        line.to_string()
    } else {
        let clipped: String = line.chars().take(EXCERPT_CHARS).collect();
        format!("{}…", clipped)
    }
}
