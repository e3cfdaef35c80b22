//! # faultline CLI
//!
//! Runs one fault-localization pass: build (or reuse) the ORIG and MUT
//! artifacts, summarize ORIG, flag suspicious MUT chunks and score the
//! ranking against the mutation log.
//!
//! ## Usage
//!
//! ```bash
//! faultline [--config ./config/faultline.toml] <text|graph> [MODEL]
//! ```
//!
//! | Option | Env | Description |
//! |--------|-----|-------------|
//! | `--run-tag` | `RUN_TAG` | Cache namespace; defaults to a timestamp |
//! | `--resume` | `RESUME` | Reuse artifacts and cached per-chunk results |
//! | `--skip-llm` | `SKIP_LLM` | Never call the model; report from the cache |
//! | `--model-url` | `MODEL_URL` | Override `model.base_url` |
//! | `--progress` | | `off`, `human` or `json` (stderr) |
//!
//! ## Examples
//!
//! ```bash
//! # Text mode against the default model
//! faultline text
//!
//! # Graph mode with gemma2, resuming an interrupted run
//! RUN_TAG=nightly faultline graph gemma2:9b --resume
//!
//! # Rebuild the report from cached verdicts only
//! faultline text --run-tag nightly --skip-llm
//! ```
//!
//! Exit status is 0 for a completed run, hit or miss, and 1 on any error.
//! The report path and the localization result are printed to stdout as
//! one JSON line.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::builder::FalseyValueParser;
use clap::Parser;
use faultline::config::{self, Config};
use faultline::progress::ProgressMode;
use faultline_core::models::{Mode, RunContext};
use faultline_core::PipelineError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "./config/faultline.toml";

/// faultline: LLM-assisted fault localization on mutated repositories.
///
/// Reads `config/faultline.example.toml`-style TOML for paths, model
/// service and artifact builder commands.
#[derive(Parser)]
#[command(
    name = "faultline",
    about = "faultline: LLM-assisted fault localization on mutated repositories",
    version,
    long_about = "faultline summarizes a reference repository chunk by chunk, asks the model \
    which chunks of its mutant look faulty, and scores the resulting ranking against the \
    mutation log. Per-chunk results are cached per run tag so interrupted runs resume."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// A missing file at the default location means built-in defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Chunk representation: `text` (file bundle) or `graph` (code graph).
    mode: Mode,

    /// Model name as known to the model service.
    #[arg(default_value = "mistral")]
    model: String,

    /// Cache namespace for this run.
    #[arg(long, env = "RUN_TAG")]
    run_tag: Option<String>,

    /// Reuse stored artifacts and per-chunk results of the run tag.
    #[arg(long, env = "RESUME", value_parser = FalseyValueParser::new())]
    resume: bool,

    /// Do not call the model; uncached chunks are reported as skipped.
    #[arg(long, env = "SKIP_LLM", value_parser = FalseyValueParser::new())]
    skip_llm: bool,

    /// Model service base URL, overriding the config.
    #[arg(long, env = "MODEL_URL")]
    model_url: Option<String>,

    /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
    #[arg(long, value_enum)]
    progress: Option<ProgressMode>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();

    let cli = Cli::parse();
    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let pipeline = e.downcast_ref::<PipelineError>();
            let kind = pipeline.map(PipelineError::kind).unwrap_or("ConfigurationError");
            let transient = pipeline.is_some_and(PipelineError::is_transient);
            error!(kind, transient, error = %format!("{:#}", e), "run failed");
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    let mut cfg = load(&cli.config)?;
    if let Some(url) = cli.model_url {
        cfg.model.base_url = url;
        config::validate(&cfg)?;
    }

    let run_tag = cli
        .run_tag
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| format!("run_{}", chrono::Local::now().format("%Y%m%d_%H%M%S")));
    if run_tag.contains(['/', '\\']) || run_tag.starts_with('.') {
        anyhow::bail!("invalid run tag '{}': must be a plain directory name", run_tag);
    }

    let ctx = RunContext::new(run_tag, cli.mode, cli.model)
        .with_resume(cli.resume)
        .with_skip_model(cli.skip_llm);
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    let outcome = faultline::run::run(&cfg, &ctx, progress).await?;
    info!(report = %outcome.location, "done");
    println!(
        "{}",
        serde_json::json!({
            "report": outcome.location,
            "run_tag": ctx.run_tag,
            "hit": outcome.report.localization.hit,
            "rank": outcome.report.localization.rank,
        })
    );
    Ok(())
}

fn load(path: &Path) -> anyhow::Result<Config> {
    if path == Path::new(DEFAULT_CONFIG) && !path.exists() {
        return Ok(Config::default());
    }
    config::load_config(path).with_context(|| format!("invalid configuration {}", path.display()))
}
