//! TOML configuration.
//!
//! Every section is optional; a missing file at the default location
//! yields [`Config::default`]. See `config/faultline.example.toml`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use faultline_core::models::{ArtifactKind, CodeVersion};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// External builder commands keyed by artifact kind
    /// (`text-bundle`, `graph`, `coverage`, `issues`, `mutation-log`).
    #[serde(default)]
    pub artifacts: BTreeMap<ArtifactKind, ArtifactCommand>,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Built artifacts, shared by all run tags.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Reports plus the per-run cache and trace directories.
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            reports_dir: default_reports_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_reports_dir() -> PathBuf {
    PathBuf::from("reports")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First retry delay; doubles per attempt.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default)]
    pub temperature: Option<f64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            temperature: None,
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ChunkingConfig {
    /// Token budget per chunk; defaults to a per-model heuristic.
    #[serde(default)]
    pub max_tokens: Option<usize>,
}

/// Argument vectors of an external builder, per code version.
///
/// `{src}` is replaced with the version's source repository and `{out}`
/// with the path the builder must write its JSON to.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ArtifactCommand {
    #[serde(default)]
    pub orig: Option<Vec<String>>,
    #[serde(default, rename = "mut")]
    pub mutated: Option<Vec<String>>,
}

impl ArtifactCommand {
    pub fn for_version(&self, version: CodeVersion) -> Option<&[String]> {
        match version {
            CodeVersion::Orig => self.orig.as_deref(),
            CodeVersion::Mut => self.mutated.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub orig_repo: Option<PathBuf>,
    #[serde(default)]
    pub mut_repo: Option<PathBuf>,
    /// Scraped issue files merged into the issues artifact when no
    /// `issues` command is configured.
    #[serde(default)]
    pub issue_files: Vec<PathBuf>,
    /// Mutation log used when no `mutation-log` command is configured.
    /// Defaults to `{mut_repo}/mutated_files.json`.
    #[serde(default)]
    pub mutation_log: Option<PathBuf>,
}

impl SourcesConfig {
    pub fn repo(&self, version: CodeVersion) -> Option<&Path> {
        match version {
            CodeVersion::Orig => self.orig_repo.as_deref(),
            CodeVersion::Mut => self.mut_repo.as_deref(),
        }
    }
}

impl Config {
    /// Token budget for `model`.
    pub fn max_tokens(&self, model: &str) -> usize {
        self.chunking
            .max_tokens
            .unwrap_or_else(|| faultline_core::chunk::budget_for_model(model))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let url = &config.model.base_url;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        anyhow::bail!("model.base_url must be an http(s) URL, got '{}'", config.model.base_url);
    }
    if config.model.timeout_secs == 0 {
        anyhow::bail!("model.timeout_secs must be > 0");
    }
    if let Some(t) = config.model.temperature {
        if !(0.0..=2.0).contains(&t) {
            anyhow::bail!("model.temperature must be in [0.0, 2.0]");
        }
    }
    if config.chunking.max_tokens == Some(0) {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    for (kind, cmd) in &config.artifacts {
        for version in [CodeVersion::Orig, CodeVersion::Mut] {
            if let Some(argv) = cmd.for_version(version) {
                if argv.is_empty() || argv[0].trim().is_empty() {
                    anyhow::bail!(
                        "artifacts.{}.{} must name a program",
                        kind,
                        version.as_str().to_lowercase()
                    );
                }
            }
        }
    }
    Ok(())
}
