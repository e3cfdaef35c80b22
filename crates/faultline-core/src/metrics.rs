//! Scoring of detection results against the mutation ground truth.
//!
//! [`aggregate`] turns the detector's results into an [`AnalysisReport`]:
//! a score-ordered ranking, the localization hit and its rank, file-level
//! and span-level detection metrics, and run statistics. Test files are
//! ignored on both sides of the comparison.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::{is_test_path, paths_match, GroundTruth};
use crate::error::{PipelineError, Result};
use crate::models::{merge_spans, DetectionResult, LineSpan, Mode, RunContext};

/// Minimum IoU for a predicted span to count as a match.
pub const IOU_THRESHOLD: f64 = 0.2;

/// Counters for one phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseStats {
    pub chunks: usize,
    /// Model calls made.
    pub attempted: usize,
    /// Results taken from the cache.
    pub reused: usize,
    pub unparsed: usize,
    /// Skip-model chunks left without a result.
    pub skipped: usize,
    /// Results produced without a model call.
    pub synthesized: usize,
    pub model_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub orig_chunks: usize,
    pub mut_chunks: usize,
    pub files: usize,
    pub index: PhaseStats,
    pub detect: PhaseStats,
    /// Chunks flagged suspicious.
    pub chunks_with_detections: usize,
    /// Repairs shaped like a unified diff.
    pub well_formed_repairs: usize,
    /// Repairs with a hunk overlapping a mutation site.
    pub repairs_touching_mutation: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Localization {
    pub hit: bool,
    /// 1-based position of the first hit in the ranking.
    pub rank: Option<usize>,
    pub chunk_id: Option<String>,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counts {
    pub tp: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl Counts {
    fn new(tp: usize, fp: usize, fn_: usize) -> Self {
        let ratio = |a: usize, b: usize| if a + b == 0 { 0.0 } else { a as f64 / (a + b) as f64 };
        let precision = ratio(tp, fp);
        let recall = ratio(tp, fn_);
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        Self {
            tp,
            fp,
            fn_,
            precision,
            recall,
            f1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetrics {
    #[serde(flatten)]
    pub counts: Counts,
    pub tp_files: Vec<String>,
    pub fp_files: Vec<String>,
    pub fn_files: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpanMetrics {
    #[serde(flatten)]
    pub counts: Counts,
    pub iou_threshold: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionMetrics {
    pub file: FileMetrics,
    pub span: SpanMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub rank: usize,
    pub chunk_id: String,
    pub file: String,
    pub suspect: bool,
    pub score: f64,
}

/// The terminal artifact of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub mode: Mode,
    pub model: String,
    pub run_tag: String,
    pub generated_at: DateTime<Utc>,
    pub localization: Localization,
    pub detection_metrics: DetectionMetrics,
    pub stats: RunStats,
    /// `"{kind}/{version}"` → payload digest of every artifact used.
    pub artifacts: BTreeMap<String, String>,
    pub ground_truth: BTreeMap<String, Vec<LineSpan>>,
    pub ranking: Vec<RankedEntry>,
    pub results: Vec<DetectionResult>,
}

impl AnalysisReport {
    /// `{mode}_analysis_report_{YYYYmmdd_HHMMSS}.json`
    pub fn file_name(&self) -> String {
        format!(
            "{}_analysis_report_{}.json",
            self.mode,
            self.generated_at.format("%Y%m%d_%H%M%S")
        )
    }
}

/// Inputs to [`aggregate`] besides the results themselves.
pub struct ReportInputs<'a> {
    pub ctx: &'a RunContext,
    pub ground_truth: &'a GroundTruth,
    pub stats: RunStats,
    pub artifacts: BTreeMap<String, String>,
    pub generated_at: DateTime<Utc>,
}

/// Score results against the ground truth.
///
/// Fails with `Aggregation` on an empty result set, an empty ground truth
/// or a result carrying an invalid span.
pub fn aggregate(results: &[DetectionResult], inputs: ReportInputs<'_>) -> Result<AnalysisReport> {
    if results.is_empty() {
        return Err(PipelineError::aggregation("no detection results to score"));
    }
    if inputs.ground_truth.is_empty() {
        return Err(PipelineError::aggregation("ground truth has no mutation sites"));
    }
    for r in results {
        for span in std::iter::once(&r.span).chain(&r.line_spans) {
            if span.start == 0 || span.start > span.end {
                return Err(PipelineError::aggregation(format!(
                    "result {} has invalid span {}-{}",
                    r.chunk_id, span.start, span.end
                )));
            }
        }
    }

    let ranking = rank(results);
    let localization = localize(&ranking, results, inputs.ground_truth);
    let detection_metrics = DetectionMetrics {
        file: file_metrics(results, inputs.ground_truth),
        span: span_metrics(results, inputs.ground_truth),
    };

    let mut stats = inputs.stats;
    stats.chunks_with_detections = results.iter().filter(|r| r.suspect).count();
    stats.well_formed_repairs = results
        .iter()
        .filter_map(|r| r.repair.as_deref())
        .filter(|p| is_unified_diff(p))
        .count();
    stats.repairs_touching_mutation = results
        .iter()
        .filter(|r| repair_touches_mutation(r, inputs.ground_truth))
        .count();

    Ok(AnalysisReport {
        mode: inputs.ctx.mode,
        model: inputs.ctx.model.clone(),
        run_tag: inputs.ctx.run_tag.clone(),
        generated_at: inputs.generated_at,
        localization,
        detection_metrics,
        stats,
        artifacts: inputs.artifacts,
        ground_truth: inputs.ground_truth.sites.clone(),
        ranking: ranking
            .iter()
            .enumerate()
            .map(|(i, &idx)| RankedEntry {
                rank: i + 1,
                chunk_id: results[idx].chunk_id.clone(),
                file: results[idx].file.clone(),
                suspect: results[idx].suspect,
                score: results[idx].score,
            })
            .collect(),
        results: results.to_vec(),
    })
}

/// Result indices ordered by suspect first, then score descending. Ties
/// keep detector order.
fn rank(results: &[DetectionResult]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..results.len()).collect();
    order.sort_by(|&a, &b| {
        let (ra, rb) = (&results[a], &results[b]);
        rb.suspect.cmp(&ra.suspect).then_with(|| rb.score.total_cmp(&ra.score))
    });
    order
}

/// First suspect in rank order whose chunk span overlaps a mutation site of
/// its file. The model's own line spans play no part here.
fn localize(ranking: &[usize], results: &[DetectionResult], gt: &GroundTruth) -> Localization {
    for (pos, &idx) in ranking.iter().enumerate() {
        let r = &results[idx];
        if !r.suspect {
            continue;
        }
        let Some((_, truth)) = gt.spans_for(&r.file) else {
            continue;
        };
        if truth.iter().any(|t| r.span.overlaps(t)) {
            return Localization {
                hit: true,
                rank: Some(pos + 1),
                chunk_id: Some(r.chunk_id.clone()),
                file: Some(r.file.clone()),
            };
        }
    }
    Localization::default()
}

/// Suspect predictions per file (test files dropped), spans merged.
fn predictions(results: &[DetectionResult]) -> BTreeMap<String, Vec<LineSpan>> {
    let mut pred: BTreeMap<String, Vec<LineSpan>> = BTreeMap::new();
    for r in results.iter().filter(|r| r.suspect && !is_test_path(&r.file)) {
        pred.entry(r.file.clone()).or_default().extend(r.predicted_spans());
    }
    for spans in pred.values_mut() {
        *spans = merge_spans(spans);
    }
    pred
}

fn file_metrics(results: &[DetectionResult], gt: &GroundTruth) -> FileMetrics {
    let pred = predictions(results);
    let mut tp_files = Vec::new();
    let mut fp_files = Vec::new();
    for file in pred.keys() {
        match gt.spans_for(file) {
            Some((truth_file, _)) => {
                if !tp_files.iter().any(|f: &String| f == truth_file) {
                    tp_files.push(truth_file.to_string());
                }
            }
            None => fp_files.push(file.clone()),
        }
    }
    let fn_files: Vec<String> = gt
        .sites
        .keys()
        .filter(|f| !tp_files.contains(f))
        .cloned()
        .collect();
    tp_files.sort();
    FileMetrics {
        counts: Counts::new(tp_files.len(), fp_files.len(), fn_files.len()),
        tp_files,
        fp_files,
        fn_files,
    }
}

/// Greedy one-to-one matching of predicted spans onto ground-truth spans.
fn span_metrics(results: &[DetectionResult], gt: &GroundTruth) -> SpanMetrics {
    let pred = predictions(results);
    let (mut tp, mut fp, mut fn_) = (0, 0, 0);

    for (truth_file, truth) in &gt.sites {
        let mut used = vec![false; truth.len()];
        for spans in pred.iter().filter(|(f, _)| paths_match(f, truth_file)).map(|(_, s)| s) {
            for p in spans {
                match (0..truth.len()).find(|&i| !used[i] && p.iou(&truth[i]) >= IOU_THRESHOLD) {
                    Some(i) => {
                        used[i] = true;
                        tp += 1;
                    }
                    None => fp += 1,
                }
            }
        }
        fn_ += used.iter().filter(|u| !**u).count();
    }
    for (file, spans) in &pred {
        if gt.spans_for(file).is_none() {
            fp += spans.len();
        }
    }

    SpanMetrics {
        counts: Counts::new(tp, fp, fn_),
        iou_threshold: IOU_THRESHOLD,
    }
}

/// A repair counts as a diff when it has `---`/`+++` headers and a hunk.
pub fn is_unified_diff(patch: &str) -> bool {
    let has = |prefix: &str| patch.lines().any(|l| l.starts_with(prefix));
    has("--- ") && has("+++ ") && has("@@")
}

/// New-side line ranges of each `@@` hunk, keyed by the `+++` path when
/// the diff names one. A pure deletion (`+c,0`) maps to line `c`.
pub fn hunk_spans(patch: &str) -> Vec<(Option<String>, LineSpan)> {
    let mut spans = Vec::new();
    let mut file: Option<String> = None;
    for line in patch.lines() {
        if let Some(path) = line.strip_prefix("+++ ") {
            let path = path.split('\t').next().unwrap_or(path).trim();
            file = Some(path.strip_prefix("b/").unwrap_or(path).to_string());
        } else if line.starts_with("@@") {
            let Some(plus) = line.split_whitespace().find_map(|p| p.strip_prefix('+')) else {
                continue;
            };
            let (start, count) = match plus.split_once(',') {
                Some((s, c)) => (s.parse::<u32>(), c.parse::<u32>()),
                None => (plus.parse::<u32>(), Ok(1)),
            };
            let (Ok(start), Ok(count)) = (start, count) else {
                continue;
            };
            let start = start.max(1);
            let end = start.saturating_add(count.saturating_sub(1));
            if let Some(span) = LineSpan::new(start, end) {
                spans.push((file.clone(), span));
            }
        }
    }
    spans
}

/// Whether a result's repair has a hunk on a mutation site. Hunks without
/// a `+++` path apply to the result's own file.
fn repair_touches_mutation(r: &DetectionResult, gt: &GroundTruth) -> bool {
    let Some(patch) = r.repair.as_deref() else {
        return false;
    };
    hunk_spans(patch).iter().any(|(file, span)| {
        let file = file.as_deref().unwrap_or(&r.file);
        gt.spans_for(file)
            .is_some_and(|(_, truth)| truth.iter().any(|t| span.overlaps(t)))
    })
}
