//! End-to-end run orchestration.
//!
//! resolve artifacts → split ORIG/MUT → join coverage and issues onto MUT
//! → index ORIG → detect MUT → aggregate → write report. Each stage hands
//! its output to the next; only the cache tables and the report touch the
//! store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};

use crate::artifact::{parse_issues, ArtifactBuilder, ArtifactStore, CoverageMap, GroundTruth};
use crate::chunk::split_artifact;
use crate::context::annotate;
use crate::detect::Detector;
use crate::error::{PipelineError, Result};
use crate::index::Indexer;
use crate::metrics::{aggregate, AnalysisReport, ReportInputs, RunStats};
use crate::model::ModelClient;
use crate::models::{Artifact, ArtifactKind, CodeVersion, RunContext};
use crate::progress::ProgressReporter;
use crate::store::Store;

/// A finished run.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: AnalysisReport,
    /// Where the store put the report.
    pub location: String,
}

pub struct Pipeline<'a> {
    ctx: &'a RunContext,
    store: &'a dyn Store,
    builder: &'a dyn ArtifactBuilder,
    model: &'a dyn ModelClient,
    progress: &'a dyn ProgressReporter,
    max_tokens: usize,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        ctx: &'a RunContext,
        store: &'a dyn Store,
        builder: &'a dyn ArtifactBuilder,
        model: &'a dyn ModelClient,
        progress: &'a dyn ProgressReporter,
        max_tokens: usize,
    ) -> Self {
        Self {
            ctx,
            store,
            builder,
            model,
            progress,
            max_tokens,
        }
    }

    pub async fn run(&self) -> Result<RunOutcome> {
        let started = Instant::now();
        info!(
            run_tag = %self.ctx.run_tag,
            mode = %self.ctx.mode,
            model = %self.ctx.model,
            resume = self.ctx.resume,
            skip_model = self.ctx.skip_model,
            client = self.model.model_name(),
            "run started"
        );
        if self.model.model_name() != self.ctx.model {
            warn!(
                client = self.model.model_name(),
                report = %self.ctx.model,
                "model client and run context name different models"
            );
        }

        let artifacts = ArtifactStore::new(self.ctx, self.store, self.builder);
        let representation = self.ctx.mode.representation();
        let orig = artifacts.resolve(representation, CodeVersion::Orig).await?;
        let mutated = artifacts.resolve(representation, CodeVersion::Mut).await?;
        let coverage_artifact = artifacts.resolve(ArtifactKind::Coverage, CodeVersion::Orig).await?;
        let issues_artifact = artifacts.resolve(ArtifactKind::Issues, CodeVersion::Orig).await?;
        let mutation_log = artifacts.resolve(ArtifactKind::MutationLog, CodeVersion::Mut).await?;

        let coverage = CoverageMap::from_value(&coverage_artifact.payload).map_err(|reason| {
            PipelineError::artifact_missing(ArtifactKind::Coverage, CodeVersion::Orig, reason)
        })?;
        let issues = parse_issues(&issues_artifact.payload).map_err(|reason| {
            PipelineError::artifact_missing(ArtifactKind::Issues, CodeVersion::Orig, reason)
        })?;
        let ground_truth =
            GroundTruth::from_value(&mutation_log.payload).map_err(PipelineError::aggregation)?;

        let orig_chunks = split_artifact(&orig, self.max_tokens)?;
        let mut mut_chunks = split_artifact(&mutated, self.max_tokens)?;
        annotate(&mut mut_chunks, Some(&coverage), &issues);
        info!(
            orig_chunks = orig_chunks.len(),
            mut_chunks = mut_chunks.len(),
            max_tokens = self.max_tokens,
            issues = issues.len(),
            "chunks ready"
        );

        let indexed = Indexer::new(self.ctx, self.store, self.model, self.progress)
            .index(&orig_chunks)
            .await?;
        let detected = Detector::new(self.ctx, self.store, self.model, self.progress)
            .detect(&mut_chunks, &indexed.summaries)
            .await?;

        let stats = RunStats {
            orig_chunks: orig_chunks.len(),
            mut_chunks: mut_chunks.len(),
            files: mut_chunks.iter().map(|c| c.file.as_str()).collect::<BTreeSet<_>>().len(),
            index: indexed.stats,
            detect: detected.stats,
            duration_ms: started.elapsed().as_millis() as u64,
            ..Default::default()
        };
        let digests = digests(&[
            &orig,
            &mutated,
            &coverage_artifact,
            &issues_artifact,
            &mutation_log,
        ]);

        let report = aggregate(
            &detected.results,
            ReportInputs {
                ctx: self.ctx,
                ground_truth: &ground_truth,
                stats,
                artifacts: digests,
                generated_at: Utc::now(),
            },
        )?;
        let location = self.store.write_report(&report).await?;
        info!(
            hit = report.localization.hit,
            rank = ?report.localization.rank,
            location = %location,
            "report written"
        );
        Ok(RunOutcome { report, location })
    }
}

fn digests(artifacts: &[&Arc<Artifact>]) -> BTreeMap<String, String> {
    artifacts
        .iter()
        .map(|a| (format!("{}/{}", a.kind, a.version), a.digest.clone()))
        .collect()
}
