//! Core data models used throughout faultline.
//!
//! These types represent the run context, artifacts, chunks, summaries and
//! detection results that flow through the two-phase pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Input representation handed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Flattened source text bundle.
    Text,
    /// Structural AST graph view.
    Graph,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Text => "text",
            Mode::Graph => "graph",
        }
    }

    /// The artifact kind that carries code for this mode.
    pub fn representation(&self) -> ArtifactKind {
        match self {
            Mode::Text => ArtifactKind::TextBundle,
            Mode::Graph => ArtifactKind::Graph,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Mode::Text),
            "graph" => Ok(Mode::Graph),
            other => Err(format!("invalid mode '{}': use 'text' or 'graph'", other)),
        }
    }
}

/// Unmodified vs. fault-injected version of the code under analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CodeVersion {
    #[serde(rename = "ORIG")]
    Orig,
    #[serde(rename = "MUT")]
    Mut,
}

impl CodeVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeVersion::Orig => "ORIG",
            CodeVersion::Mut => "MUT",
        }
    }
}

impl fmt::Display for CodeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kinds of JSON artifact produced by external builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    TextBundle,
    Graph,
    Coverage,
    Issues,
    /// The mutation log (`mutated_files.json`) used as ground truth.
    MutationLog,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::TextBundle => "text-bundle",
            ArtifactKind::Graph => "graph",
            ArtifactKind::Coverage => "coverage",
            ArtifactKind::Issues => "issues",
            ArtifactKind::MutationLog => "mutation-log",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of one pipeline run.
///
/// Built once at startup and passed by reference to every component; no
/// component reads run flags from the environment on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_tag: String,
    pub mode: Mode,
    pub model: String,
    pub resume: bool,
    pub skip_model: bool,
}

impl RunContext {
    pub fn new(run_tag: impl Into<String>, mode: Mode, model: impl Into<String>) -> Self {
        Self {
            run_tag: run_tag.into(),
            mode,
            model: model.into(),
            resume: false,
            skip_model: false,
        }
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_skip_model(mut self, skip_model: bool) -> Self {
        self.skip_model = skip_model;
        self
    }
}

/// A named JSON payload produced once per `(kind, version)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub version: CodeVersion,
    pub payload: serde_json::Value,
    /// SHA-256 of the serialized payload.
    pub digest: String,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, version: CodeVersion, payload: serde_json::Value) -> Self {
        let bytes = serde_json::to_vec(&payload).unwrap_or_default();
        Self {
            kind,
            version,
            digest: sha256_hex(&bytes),
            payload,
        }
    }
}

/// Inclusive 1-based line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineSpan {
    pub start: u32,
    pub end: u32,
}

impl LineSpan {
    /// Returns `None` when `start > end` or `start == 0`.
    pub fn new(start: u32, end: u32) -> Option<Self> {
        if start == 0 || start > end {
            None
        } else {
            Some(Self { start, end })
        }
    }

    pub fn single(line: u32) -> Self {
        Self {
            start: line.max(1),
            end: line.max(1),
        }
    }

    pub fn line_count(&self) -> u32 {
        self.end - self.start + 1
    }

    pub fn contains(&self, line: u32) -> bool {
        self.start <= line && line <= self.end
    }

    pub fn overlaps(&self, other: &LineSpan) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Intersection over union of the two line ranges.
    pub fn iou(&self, other: &LineSpan) -> f64 {
        let inter_start = self.start.max(other.start);
        let inter_end = self.end.min(other.end);
        if inter_start > inter_end {
            return 0.0;
        }
        let inter = (inter_end - inter_start + 1) as f64;
        let union = self.line_count() as f64 + other.line_count() as f64 - inter;
        inter / union
    }
}

impl fmt::Display for LineSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}-{}", self.start, self.end)
    }
}

/// Sort and merge overlapping or adjacent spans.
pub fn merge_spans(spans: &[LineSpan]) -> Vec<LineSpan> {
    let mut sorted = spans.to_vec();
    sorted.sort();
    let mut out: Vec<LineSpan> = Vec::with_capacity(sorted.len());
    for span in sorted {
        match out.last_mut() {
            Some(last) if span.start <= last.end.saturating_add(1) => {
                last.end = last.end.max(span.end);
            }
            _ => out.push(span),
        }
    }
    out
}

/// Test-coverage annotation joined onto a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CoverageMark {
    /// No coverage data exists for the chunk's file.
    #[default]
    Unknown,
    Covered {
        executed_lines: Vec<u32>,
        executed_nodes: Vec<String>,
    },
    Uncovered,
}

impl CoverageMark {
    pub fn is_covered(&self) -> Option<bool> {
        match self {
            CoverageMark::Unknown => None,
            CoverageMark::Covered { .. } => Some(true),
            CoverageMark::Uncovered => Some(false),
        }
    }
}

/// Part of an issue report that references a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueExcerpt {
    pub number: Option<u64>,
    pub title: String,
    pub excerpt: String,
    /// The chunk identifier (path, file name or symbol) the issue mentions.
    pub matched: String,
}

/// A bounded unit of code or graph content submitted in one model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub file: String,
    /// 1-based position of the chunk within its file.
    pub section: u32,
    pub text: String,
    pub span: LineSpan,
    /// Graph node ids covered by this chunk (empty in text mode).
    #[serde(default)]
    pub node_ids: Vec<String>,
    /// Names/qualified names of graph nodes in this chunk.
    #[serde(default)]
    pub symbols: Vec<String>,
    /// SHA-256 of `text`.
    pub hash: String,
    #[serde(default)]
    pub coverage: CoverageMark,
    #[serde(default)]
    pub issues: Vec<IssueExcerpt>,
}

/// Structured notes the indexer asks the model for.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexNotes {
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub intents: Vec<String>,
    #[serde(default)]
    pub invariants: Vec<String>,
    #[serde(default)]
    pub risky_spans: Vec<LineSpan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SummaryBody {
    Structured(IndexNotes),
    /// The model answered but no structured region was recoverable.
    FreeText(String),
    /// Skip-model mode without a cached summary.
    Unsummarized,
}

/// Phase 1 output for a single ORIG chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub chunk_id: String,
    pub file: String,
    pub span: LineSpan,
    pub hash: String,
    pub body: SummaryBody,
}

impl Summary {
    pub fn is_summarized(&self) -> bool {
        !matches!(self.body, SummaryBody::Unsummarized)
    }
}

/// Whether a chunk has a counterpart in the other code version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkOrigin {
    Matched,
    /// MUT chunk with no ORIG counterpart.
    Inserted,
    /// ORIG chunk with no MUT counterpart.
    Removed,
}

impl ChunkOrigin {
    pub fn is_unmatched(&self) -> bool {
        !matches!(self, ChunkOrigin::Matched)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionOutcome {
    Parsed,
    /// Low-confidence result from an unrecoverable response.
    Unparsed,
    /// Skip-model mode without a cached result.
    Skipped,
    /// Produced without a model call (removed chunks).
    Synthesized,
}

/// Phase 2 output for a single chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub chunk_id: String,
    pub file: String,
    pub span: LineSpan,
    pub origin: ChunkOrigin,
    pub outcome: DetectionOutcome,
    pub suspect: bool,
    /// Model-reported confidence in `[0, 1]`.
    pub confidence: f64,
    /// Ranking signal: confidence plus the origin prior.
    pub score: f64,
    /// Predicted fault location; falls back to `span` when the model gave none.
    pub line_spans: Vec<LineSpan>,
    pub explanation: Option<String>,
    pub repair: Option<String>,
    pub raw_response: Option<String>,
    pub covered: Option<bool>,
}

impl DetectionResult {
    /// Spans used for the file and span metrics.
    pub fn predicted_spans(&self) -> Vec<LineSpan> {
        if self.line_spans.is_empty() {
            vec![self.span]
        } else {
            self.line_spans.clone()
        }
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
