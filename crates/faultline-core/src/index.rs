//! Phase 1: summarize ORIG chunks.
//!
//! Each chunk is summarized once per run tag. Summaries are persisted as
//! soon as they are produced, so an interrupted run resumes where it
//! stopped.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::extract::{parse_spans, string_list, Extraction};
use crate::metrics::PhaseStats;
use crate::model::{invoke, ModelClient};
use crate::models::{Chunk, IndexNotes, RunContext, Summary, SummaryBody};
use crate::progress::{Phase, PhaseEvent, ProgressReporter};
use crate::prompt::index_prompt;
use crate::store::{CacheTable, Store};

#[derive(Debug)]
pub struct Indexed {
    pub summaries: BTreeMap<String, Summary>,
    pub stats: PhaseStats,
}

pub struct Indexer<'a> {
    ctx: &'a RunContext,
    store: &'a dyn Store,
    model: &'a dyn ModelClient,
    progress: &'a dyn ProgressReporter,
}

impl<'a> Indexer<'a> {
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

    /// Summarize `chunks` in order.
    ///
    /// With resume (or skip-model) a cached summary is reused as is. A
    /// fresh run clears the summary table first. In skip-model mode no
    /// call is made and uncached chunks come back `Unsummarized`.
    pub async fn index(&self, chunks: &[Chunk]) -> Result<Indexed> {
        let reads_cache = self.ctx.resume || self.ctx.skip_model;
        if !reads_cache {
            self.store.clear_table(CacheTable::Summaries).await?;
        }

        let total = chunks.len();
        let mut stats = PhaseStats {
            chunks: total,
            ..Default::default()
        };
        let mut summaries = BTreeMap::new();
        self.progress.report(PhaseEvent::Started {
            phase: Phase::Index,
            total,
        });

        for (n, chunk) in chunks.iter().enumerate() {
            let cached = if reads_cache { self.cached(chunk).await? } else { None };
            let (summary, was_cached) = match cached {
                Some(summary) => {
                    stats.reused += 1;
                    (summary, true)
                }
                None if self.ctx.skip_model => {
                    stats.skipped += 1;
                    (summary_for(chunk, SummaryBody::Unsummarized), false)
                }
                None => (self.summarize(chunk, &mut stats).await?, false),
            };

            self.progress.report(PhaseEvent::ChunkDone {
                phase: Phase::Index,
                chunk_id: chunk.id.clone(),
                n: n + 1,
                total,
                cached: was_cached,
            });
            summaries.insert(chunk.id.clone(), summary);
        }

        if stats.skipped > 0 {
            warn!(
                skipped = stats.skipped,
                "skip-model: chunk(s) left unsummarized"
            );
        }
        self.progress.report(PhaseEvent::Finished {
            phase: Phase::Index,
            attempted: stats.attempted,
            reused: stats.reused,
            unparsed: stats.unparsed,
        });
        info!(
            chunks = total,
            attempted = stats.attempted,
            reused = stats.reused,
            unparsed = stats.unparsed,
            "index phase done"
        );
        Ok(Indexed { summaries, stats })
    }

    async fn cached(&self, chunk: &Chunk) -> Result<Option<Summary>> {
        let Some(payload) = self.store.get_entry(CacheTable::Summaries, &chunk.id).await? else {
            return Ok(None);
        };
        match serde_json::from_value::<Summary>(payload) {
            Ok(summary) if summary.is_summarized() => Ok(Some(summary)),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!(chunk = %chunk.id, error = %e, "cached summary unreadable, recomputing");
                Ok(None)
            }
        }
    }

    async fn summarize(&self, chunk: &Chunk, stats: &mut PhaseStats) -> Result<Summary> {
        let prompt = index_prompt(chunk, self.ctx.mode);
        debug!(chunk = %chunk.id, "summarizing");
        let reply = invoke(self.model, &prompt).await?;
        stats.attempted += 1;
        stats.model_ms += reply.duration_ms;
        self.progress.report(PhaseEvent::Exchange {
            phase: Phase::Index,
            chunk_id: chunk.id.clone(),
            prompt: prompt.render(),
            response: reply.raw.clone(),
            duration_ms: reply.duration_ms,
        });

        let body = match &reply.extraction {
            Extraction::Parsed(v) => match notes_from(v) {
                Some(notes) => SummaryBody::Structured(notes),
                None => SummaryBody::FreeText(reply.raw.trim().to_string()),
            },
            Extraction::Unparsed { reason } => {
                warn!(chunk = %chunk.id, %reason, "unparsed index response, keeping free text");
                stats.unparsed += 1;
                self.progress.report(PhaseEvent::Unparsed {
                    phase: Phase::Index,
                    chunk_id: chunk.id.clone(),
                });
                SummaryBody::FreeText(reply.raw.trim().to_string())
            }
        };

        let summary = summary_for(chunk, body);
        self.store
            .put_entry(CacheTable::Summaries, &chunk.id, &serde_json::to_value(&summary)?)
            .await?;
        Ok(summary)
    }
}

fn summary_for(chunk: &Chunk, body: SummaryBody) -> Summary {
    Summary {
        chunk_id: chunk.id.clone(),
        file: chunk.file.clone(),
        span: chunk.span,
        hash: chunk.hash.clone(),
        body,
    }
}

/// Structured notes from a recovered value; `None` when it has none of the
/// expected fields.
fn notes_from(v: &Value) -> Option<IndexNotes> {
    let obj = match v {
        Value::Array(items) => items.iter().find(|i| i.is_object())?,
        other => other,
    };
    let fields = ["symbols", "intents", "invariants", "risky_spans"];
    if !fields.iter().any(|f| obj.get(*f).is_some()) {
        return None;
    }
    Some(IndexNotes {
        symbols: string_list(obj.get("symbols")),
        intents: string_list(obj.get("intents")),
        invariants: string_list(obj.get("invariants")),
        risky_spans: obj.get("risky_spans").map(parse_spans).unwrap_or_default(),
    })
}
