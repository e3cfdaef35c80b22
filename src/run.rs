//! Wires the file store, the Ollama client, the external builders and the
//! progress sinks into one [`Pipeline`] run.

use anyhow::Context;
use faultline_core::model::ModelClient;
use faultline_core::models::RunContext;
use faultline_core::pipeline::{Pipeline, RunOutcome};
use faultline_core::progress::{ProgressReporter, Tee};
use tracing::{info, warn};

use crate::builders::CommandBuilder;
use crate::config::Config;
use crate::fs_store::FsStore;
use crate::ollama::OllamaClient;
use crate::progress::{ProgressMode, TraceLog};

/// Run the pipeline against the configured Ollama service.
///
/// Errors are [`faultline_core::PipelineError`] wrapped in `anyhow`; the
/// caller can downcast to recover the kind.
pub async fn run(
    config: &Config,
    ctx: &RunContext,
    progress: ProgressMode,
) -> anyhow::Result<RunOutcome> {
    let model =
        OllamaClient::new(&config.model, &ctx.model).context("failed to build HTTP client")?;
    run_with_model(config, ctx, progress, &model).await
}

/// [`run`] with any [`ModelClient`].
pub async fn run_with_model(
    config: &Config,
    ctx: &RunContext,
    progress: ProgressMode,
    model: &dyn ModelClient,
) -> anyhow::Result<RunOutcome> {
    let store = FsStore::open(&config.paths.data_dir, &config.paths.reports_dir, ctx)
        .with_context(|| {
            format!("failed to open store under {}", config.paths.reports_dir.display())
        })?;
    let builder = CommandBuilder::new(
        config.artifacts.clone(),
        config.sources.clone(),
        config.paths.data_dir.join("build"),
    );

    let mut sinks: Vec<Box<dyn ProgressReporter>> = vec![progress.reporter()];
    match TraceLog::open(&config.paths.reports_dir, ctx) {
        Ok(trace) => {
            info!(dir = %trace.dir().display(), "tracing model exchanges");
            sinks.push(Box::new(trace));
        }
        Err(e) => warn!(error = %e, "trace log unavailable, continuing without it"),
    }
    let reporter = Tee(sinks);

    let max_tokens = config.max_tokens(&ctx.model);
    let outcome = Pipeline::new(ctx, &store, &builder, model, &reporter, max_tokens)
        .run()
        .await?;
    store.finish()?;
    Ok(outcome)
}
