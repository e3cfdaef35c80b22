//! External artifact builders.
//!
//! Each `[artifacts.<kind>]` entry names a command per code version. The
//! command runs with `{src}` replaced by the version's repository and
//! `{out}` by a scratch file it must write JSON to; without an `{out}`
//! argument its stdout is parsed instead.
//!
//! Two kinds fall back to plain files when no command is configured:
//! issues (merged from `sources.issue_files`) and the mutation log
//! (`sources.mutation_log`, else `{mut_repo}/mutated_files.json`).

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use faultline_core::artifact::ArtifactBuilder;
use faultline_core::models::{ArtifactKind, CodeVersion};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ArtifactCommand, SourcesConfig};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("no builder configured for {kind}/{version} (set [artifacts.{kind}] {field})")]
    NotConfigured {
        kind: ArtifactKind,
        version: CodeVersion,
        field: &'static str,
    },

    #[error("{{src}} used but sources.{field} is not set")]
    MissingSource { field: &'static str },

    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("invalid JSON from {origin}: {source}")]
    InvalidJson {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

const STDERR_TAIL: usize = 2000;

pub struct CommandBuilder {
    commands: BTreeMap<ArtifactKind, ArtifactCommand>,
    sources: SourcesConfig,
    scratch_dir: PathBuf,
}

impl CommandBuilder {
    /// `scratch_dir` receives the `{out}` files.
    pub fn new(
        commands: BTreeMap<ArtifactKind, ArtifactCommand>,
        sources: SourcesConfig,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            commands,
            sources,
            scratch_dir,
        }
    }

    async fn run_command(
        &self,
        argv: &[String],
        kind: ArtifactKind,
        version: CodeVersion,
    ) -> Result<Value, BuildError> {
        let out = self
            .scratch_dir
            .join(format!("{}_{}.json", version.as_str().to_lowercase(), kind));
        let src_field = match version {
            CodeVersion::Orig => "orig_repo",
            CodeVersion::Mut => "mut_repo",
        };
        let src = self.sources.repo(version);

        let mut args = Vec::with_capacity(argv.len());
        let mut writes_out = false;
        for arg in argv {
            if arg.contains("{src}") {
                let src = src.ok_or(BuildError::MissingSource { field: src_field })?;
                args.push(arg.replace("{src}", &src.display().to_string()));
            } else {
                args.push(arg.clone());
            }
            if arg.contains("{out}") {
                writes_out = true;
                let last = args.len() - 1;
                args[last] = args[last].replace("{out}", &out.display().to_string());
            }
        }
        let Some(program) = args.first().cloned() else {
            return Err(BuildError::NotConfigured {
                kind,
                version,
                field: version_field(version),
            });
        };

        if writes_out {
            tokio::fs::create_dir_all(&self.scratch_dir)
                .await
                .map_err(|source| BuildError::Read {
                    path: self.scratch_dir.clone(),
                    source,
                })?;
            let _ = tokio::fs::remove_file(&out).await;
        }

        info!(%kind, %version, program = %program, "running artifact builder");
        let output = tokio::process::Command::new(&program)
            .args(&args[1..])
            .output()
            .await
            .map_err(|source| BuildError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let start = stderr.len().saturating_sub(STDERR_TAIL);
            let start = (start..stderr.len())
                .find(|i| stderr.is_char_boundary(*i))
                .unwrap_or(start);
            return Err(BuildError::Failed {
                program,
                status: output.status,
                stderr: stderr[start..].trim().to_string(),
            });
        }

        if writes_out {
            read_json(&out).await
        } else {
            serde_json::from_slice(&output.stdout).map_err(|source| BuildError::InvalidJson {
                origin: format!("stdout of '{}'", program),
                source,
            })
        }
    }

    async fn merged_issues(&self) -> Result<Value, BuildError> {
        let mut merged = Vec::new();
        let mut seen = HashSet::new();
        for path in &self.sources.issue_files {
            let value = match read_json(path).await {
                Ok(v) => v,
                Err(BuildError::Read { path, source }) => {
                    warn!(
                        path = %path.display(),
                        error = %source,
                        "issue file unavailable, skipping"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };
            let items = match value {
                Value::Array(items) => items,
                Value::Object(mut obj) => match obj.remove("issues") {
                    Some(Value::Array(items)) => items,
                    _ => vec![Value::Object(obj)],
                },
                _ => Vec::new(),
            };
            for item in items {
                match item.get("number").and_then(|n| n.as_u64()) {
                    Some(n) if !seen.insert(n) => continue,
                    _ => merged.push(item),
                }
            }
        }
        debug!(issues = merged.len(), files = self.sources.issue_files.len(), "issue files merged");
        Ok(Value::Array(merged))
    }

    fn mutation_log_path(&self) -> Option<PathBuf> {
        self.sources
            .mutation_log
            .clone()
            .or_else(|| self.sources.mut_repo.as_ref().map(|r| r.join("mutated_files.json")))
    }
}

#[async_trait]
impl ArtifactBuilder for CommandBuilder {
    async fn build(&self, kind: ArtifactKind, version: CodeVersion) -> anyhow::Result<Value> {
        let command = self.commands.get(&kind).and_then(|c| c.for_version(version));
        if let Some(argv) = command {
            return Ok(self.run_command(argv, kind, version).await?);
        }

        let field = version_field(version);
        match kind {
            ArtifactKind::Issues => Ok(self.merged_issues().await?),
            ArtifactKind::MutationLog => match self.mutation_log_path() {
                Some(path) => Ok(read_json(&path).await?),
                None => Err(BuildError::NotConfigured { kind, version, field }.into()),
            },
            _ => Err(BuildError::NotConfigured { kind, version, field }.into()),
        }
    }
}

fn version_field(version: CodeVersion) -> &'static str {
    match version {
        CodeVersion::Orig => "orig",
        CodeVersion::Mut => "mut",
    }
}

async fn read_json(path: &Path) -> Result<Value, BuildError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| BuildError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| BuildError::InvalidJson {
        origin: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    fn builder(
        tmp: &TempDir,
        commands: BTreeMap<ArtifactKind, ArtifactCommand>,
        sources: SourcesConfig,
    ) -> CommandBuilder {
        CommandBuilder::new(commands, sources, tmp.path().join("scratch"))
    }

    #[tokio::test]
    async fn test_command_writes_out_file() {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("orig");
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::write(repo.join("bundle.json"), r#"{"files": []}"#).unwrap();

        let mut commands = BTreeMap::new();
        commands.insert(
            ArtifactKind::TextBundle,
            ArtifactCommand {
                orig: Some(argv(&["cp", "{src}/bundle.json", "{out}"])),
                mutated: None,
            },
        );
        let sources = SourcesConfig {
            orig_repo: Some(repo),
            ..Default::default()
        };
        let b = builder(&tmp, commands, sources);
        let v = b.build(ArtifactKind::TextBundle, CodeVersion::Orig).await.unwrap();
        assert_eq!(v, json!({"files": []}));

        let err = b.build(ArtifactKind::TextBundle, CodeVersion::Mut).await.unwrap_err();
        assert!(err.to_string().contains("no builder configured for text-bundle/MUT"));
    }

    #[tokio::test]
    async fn test_command_stdout_is_parsed() {
        let tmp = TempDir::new().unwrap();
        let mut commands = BTreeMap::new();
        commands.insert(
            ArtifactKind::Coverage,
            ArtifactCommand {
                orig: Some(argv(&["echo", r#"{"files": {}}"#])),
                mutated: None,
            },
        );
        let b = builder(&tmp, commands, SourcesConfig::default());
        let v = b.build(ArtifactKind::Coverage, CodeVersion::Orig).await.unwrap();
        assert_eq!(v, json!({"files": {}}));
    }

    #[tokio::test]
    async fn test_failing_command_reports_stderr() {
        let tmp = TempDir::new().unwrap();
        let mut commands = BTreeMap::new();
        commands.insert(
            ArtifactKind::Graph,
            ArtifactCommand {
                orig: Some(argv(&["sh", "-c", "echo boom >&2; exit 3"])),
                mutated: None,
            },
        );
        let b = builder(&tmp, commands, SourcesConfig::default());
        let err = b.build(ArtifactKind::Graph, CodeVersion::Orig).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_src_placeholder_requires_repo() {
        let tmp = TempDir::new().unwrap();
        let mut commands = BTreeMap::new();
        commands.insert(
            ArtifactKind::Graph,
            ArtifactCommand {
                orig: None,
                mutated: Some(argv(&["graph-builder", "{src}"])),
            },
        );
        let b = builder(&tmp, commands, SourcesConfig::default());
        let err = b.build(ArtifactKind::Graph, CodeVersion::Mut).await.unwrap_err();
        assert!(err.to_string().contains("sources.mut_repo"));
    }

    #[tokio::test]
    async fn test_issue_files_merge_and_dedupe() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("open.json");
        let b_path = tmp.path().join("closed.json");
        std::fs::write(
            &a,
            r#"[{"number": 1, "title": "crash"}, {"number": 2, "title": "slow"}]"#,
        )
        .unwrap();
        std::fs::write(
            &b_path,
            r#"{"issues": [{"number": 2, "title": "dup"}, {"number": 3, "title": "wrong"}]}"#,
        )
        .unwrap();
        let sources = SourcesConfig {
            issue_files: vec![a, tmp.path().join("missing.json"), b_path],
            ..Default::default()
        };
        let b = builder(&tmp, BTreeMap::new(), sources);
        let v = b.build(ArtifactKind::Issues, CodeVersion::Orig).await.unwrap();
        let titles: Vec<&str> = v
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["crash", "slow", "wrong"]);
    }

    #[tokio::test]
    async fn test_mutation_log_defaults_to_mut_repo() {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("mut");
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::write(
            repo.join("mutated_files.json"),
            r#"[{"rel_path": "a.py", "action": "mutated"}]"#,
        )
        .unwrap();
        let sources = SourcesConfig {
            mut_repo: Some(repo),
            ..Default::default()
        };
        let b = builder(&tmp, BTreeMap::new(), sources);
        let v = b.build(ArtifactKind::MutationLog, CodeVersion::Mut).await.unwrap();
        assert_eq!(v[0]["rel_path"], "a.py");

        let none = builder(&tmp, BTreeMap::new(), SourcesConfig::default());
        assert!(none.build(ArtifactKind::MutationLog, CodeVersion::Mut).await.is_err());
    }
}
