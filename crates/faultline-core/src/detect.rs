//! Phase 2: judge MUT chunks against the ORIG summaries.
//!
//! A MUT chunk whose id has an ORIG summary is `Matched`; one without is
//! `Inserted`. ORIG chunks whose id no longer exists in MUT produce a
//! `Removed` result without a model call. Unmatched chunks carry
//! [`UNMATCHED_PRIOR`] on top of the model's confidence.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::extract::{parse_spans, Extraction};
use crate::metrics::PhaseStats;
use crate::model::{invoke, ModelClient};
use crate::models::{Chunk, ChunkOrigin, DetectionOutcome, DetectionResult, RunContext, Summary};
use crate::progress::{Phase, PhaseEvent, ProgressReporter};
use crate::prompt::detect_prompt;
use crate::store::{CacheTable, Store};

/// Score added to results of chunks with no counterpart.
pub const UNMATCHED_PRIOR: f64 = 0.25;

/// Confidence assumed when the model flags a chunk without giving one.
const DEFAULT_SUSPECT_CONFIDENCE: f64 = 0.5;

#[derive(Debug)]
pub struct Detected {
    pub results: Vec<DetectionResult>,
    pub stats: PhaseStats,
}

pub struct Detector<'a> {
    ctx: &'a RunContext,
    store: &'a dyn Store,
    model: &'a dyn ModelClient,
    progress: &'a dyn ProgressReporter,
}

impl<'a> Detector<'a> {
    pub fn new(
        ctx: &'a RunContext,
        store: &'a dyn Store,
        model: &'a dyn ModelClient,
        progress: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            ctx,
            store,
            model,
            progress,
        }
    }

    /// Detect over annotated MUT chunks, in chunk order, followed by the
    /// removed ORIG chunks in id order.
    pub async fn detect(
        &self,
        chunks: &[Chunk],
        summaries: &BTreeMap<String, Summary>,
    ) -> Result<Detected> {
        let reads_cache = self.ctx.resume || self.ctx.skip_model;
        if !reads_cache {
            self.store.clear_table(CacheTable::Detections).await?;
        }

        let mut_ids: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let removed: Vec<&Summary> = summaries
            .values()
            .filter(|s| !mut_ids.contains(s.chunk_id.as_str()))
            .collect();

        let total = chunks.len() + removed.len();
        let mut stats = PhaseStats {
            chunks: total,
            ..Default::default()
        };
        let mut results = Vec::with_capacity(total);
        self.progress.report(PhaseEvent::Started {
            phase: Phase::Detect,
            total,
        });

        for chunk in chunks {
            let origin = if summaries.contains_key(&chunk.id) {
                ChunkOrigin::Matched
            } else {
                ChunkOrigin::Inserted
            };
            let cached = if reads_cache { self.cached(&chunk.id).await? } else { None };
            let (result, was_cached) = match cached {
                Some(result) => {
                    stats.reused += 1;
                    (result, true)
                }
                None if self.ctx.skip_model => {
                    stats.skipped += 1;
                    (skipped(chunk, origin), false)
                }
                None => {
                    let summary = summaries.get(&chunk.id);
                    (self.judge(chunk, origin, summary, &mut stats).await?, false)
                }
            };
            self.done(&result.chunk_id, results.len() + 1, total, was_cached);
            results.push(result);
        }

        for summary in removed {
            let result = synthesized_removed(summary);
            let payload = serde_json::to_value(&result)?;
            self.store
                .put_entry(CacheTable::Detections, &result.chunk_id, &payload)
                .await?;
            stats.synthesized += 1;
            self.done(&result.chunk_id, results.len() + 1, total, false);
            results.push(result);
        }

        if stats.skipped > 0 {
            warn!(skipped = stats.skipped, "skip-model: chunk(s) left undetected");
        }
        self.progress.report(PhaseEvent::Finished {
            phase: Phase::Detect,
            attempted: stats.attempted,
            reused: stats.reused,
            unparsed: stats.unparsed,
        });
        info!(
            chunks = total,
            attempted = stats.attempted,
            reused = stats.reused,
            unparsed = stats.unparsed,
            removed = stats.synthesized,
            suspects = results.iter().filter(|r| r.suspect).count(),
            "detect phase done"
        );
        Ok(Detected { results, stats })
    }

    fn done(&self, chunk_id: &str, n: usize, total: usize, cached: bool) {
        self.progress.report(PhaseEvent::ChunkDone {
            phase: Phase::Detect,
            chunk_id: chunk_id.to_string(),
            n,
            total,
            cached,
        });
    }

    /// Cached model verdict for a live MUT chunk. Skipped placeholders and
    /// verdicts synthesized for a removed ORIG chunk of the same id do not
    /// count.
    async fn cached(&self, chunk_id: &str) -> Result<Option<DetectionResult>> {
        let Some(payload) = self.store.get_entry(CacheTable::Detections, chunk_id).await? else {
            return Ok(None);
        };
        match serde_json::from_value::<DetectionResult>(payload) {
            Ok(r) if is_model_verdict(&r) => Ok(Some(r)),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!(chunk = %chunk_id, error = %e, "cached detection unreadable, recomputing");
                Ok(None)
            }
        }
    }

    async fn judge(
        &self,
        chunk: &Chunk,
        origin: ChunkOrigin,
        summary: Option<&Summary>,
        stats: &mut PhaseStats,
    ) -> Result<DetectionResult> {
        let prompt = detect_prompt(chunk, self.ctx.mode, summary);
        debug!(chunk = %chunk.id, ?origin, "detecting");
        let reply = invoke(self.model, &prompt).await?;
        stats.attempted += 1;
        stats.model_ms += reply.duration_ms;
        self.progress.report(PhaseEvent::Exchange {
            phase: Phase::Detect,
            chunk_id: chunk.id.clone(),
            prompt: prompt.render(),
            response: reply.raw.clone(),
            duration_ms: reply.duration_ms,
        });

        let mut result = DetectionResult {
            chunk_id: chunk.id.clone(),
            file: chunk.file.clone(),
            span: chunk.span,
            origin,
            outcome: DetectionOutcome::Unparsed,
            suspect: false,
            confidence: 0.0,
            score: prior(origin),
            line_spans: Vec::new(),
            explanation: None,
            repair: None,
            raw_response: Some(reply.raw.clone()),
            covered: chunk.coverage.is_covered(),
        };

        match reply.extraction.value().and_then(verdict_object) {
            Some(v) => {
                let suspect = flag(v);
                let conf = confidence(v, suspect);
                result.outcome = DetectionOutcome::Parsed;
                result.suspect = suspect;
                result.confidence = conf;
                result.score = conf + prior(origin);
                result.line_spans = ["line_spans", "lines", "spans", "ranges"]
                    .iter()
                    .find_map(|k| v.get(*k))
                    .map(parse_spans)
                    .unwrap_or_default();
                result.explanation = text_field(v, &["explanation", "reason", "rationale"]);
                result.repair = text_field(v, &["repair", "patch", "fix", "diff"]);
            }
            None => {
                let reason = match &reply.extraction {
                    Extraction::Unparsed { reason } => reason.clone(),
                    Extraction::Parsed(_) => "no verdict object in response".to_string(),
                };
                warn!(chunk = %chunk.id, %reason, "unparsed detect response, low confidence");
                stats.unparsed += 1;
                self.progress.report(PhaseEvent::Unparsed {
                    phase: Phase::Detect,
                    chunk_id: chunk.id.clone(),
                });
            }
        }

        self.store
            .put_entry(CacheTable::Detections, &chunk.id, &serde_json::to_value(&result)?)
            .await?;
        Ok(result)
    }
}

fn is_model_verdict(r: &DetectionResult) -> bool {
    r.origin != ChunkOrigin::Removed
        && !matches!(r.outcome, DetectionOutcome::Skipped | DetectionOutcome::Synthesized)
}

fn prior(origin: ChunkOrigin) -> f64 {
    if origin.is_unmatched() {
        UNMATCHED_PRIOR
    } else {
        0.0
    }
}

fn skipped(chunk: &Chunk, origin: ChunkOrigin) -> DetectionResult {
    DetectionResult {
        chunk_id: chunk.id.clone(),
        file: chunk.file.clone(),
        span: chunk.span,
        origin,
        outcome: DetectionOutcome::Skipped,
        suspect: false,
        confidence: 0.0,
        score: prior(origin),
        line_spans: Vec::new(),
        explanation: None,
        repair: None,
        raw_response: None,
        covered: chunk.coverage.is_covered(),
    }
}

fn synthesized_removed(summary: &Summary) -> DetectionResult {
    DetectionResult {
        chunk_id: summary.chunk_id.clone(),
        file: summary.file.clone(),
        span: summary.span,
        origin: ChunkOrigin::Removed,
        outcome: DetectionOutcome::Synthesized,
        suspect: true,
        confidence: UNMATCHED_PRIOR,
        score: UNMATCHED_PRIOR,
        line_spans: vec![summary.span],
        explanation: Some("original chunk has no counterpart in the mutated version".to_string()),
        repair: None,
        raw_response: None,
        covered: None,
    }
}

/// The object carrying the verdict, if the recovered value has one.
fn verdict_object(v: &Value) -> Option<&Value> {
    let is_verdict = |o: &Value| {
        o.is_object()
            && ["suspicious", "suspect", "is_suspicious", "confidence", "line_spans"]
                .iter()
                .any(|k| o.get(*k).is_some())
    };
    match v {
        Value::Array(items) => items.iter().find(|i| is_verdict(i)),
        other if is_verdict(other) => Some(other),
        _ => None,
    }
}

fn flag(v: &Value) -> bool {
    let raw = ["suspicious", "suspect", "is_suspicious", "fault"]
        .iter()
        .find_map(|k| v.get(*k));
    match raw {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => {
            matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "y" | "1")
        }
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n > 0.0),
        _ => false,
    }
}

/// Model confidence in `[0, 1]`; percentages are rescaled.
fn confidence(v: &Value, suspect: bool) -> f64 {
    let raw = v.get("confidence").and_then(|c| match c {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    });
    match raw {
        Some(c) if c.is_finite() => {
            let c = if c > 1.0 && c <= 100.0 { c / 100.0 } else { c };
            c.clamp(0.0, 1.0)
        }
        _ if suspect => DEFAULT_SUSPECT_CONFIDENCE,
        _ => 0.0,
    }
}

fn text_field(v: &Value, keys: &[&str]) -> Option<String> {
    let text = keys.iter().find_map(|k| match v.get(*k)? {
        Value::String(s) => Some(s.clone()),
        Value::Array(lines) => Some(
            lines
                .iter()
                .filter_map(|l| l.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        _ => None,
    })?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
