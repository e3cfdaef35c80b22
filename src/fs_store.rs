//! File-backed [`Store`].
//!
//! # Layout
//!
//! ```text
//! {data_dir}/{orig|mut}/{kind}.json                 built artifacts
//! {reports_dir}/cache_{mode}_{run_tag}/summaries.jsonl
//! {reports_dir}/cache_{mode}_{run_tag}/detections.jsonl
//! {reports_dir}/cache_{mode}_{run_tag}/active.json  in-progress marker
//! {reports_dir}/{mode}_analysis_report_{ts}.json    terminal report
//! ```
//!
//! Cache tables are append-only JSONL, one `{"id", "payload"}` object per
//! put, synced before `put_entry` returns. On load the last line for an id
//! wins and unreadable lines (a write cut short by a crash) are skipped.
//! Artifacts are written to a temporary file and renamed into place.
//!
//! There is no locking. Two processes on one run tag append to the same
//! files; whichever line lands last is what a later load sees.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use faultline_core::metrics::AnalysisReport;
use faultline_core::models::{Artifact, ArtifactKind, CodeVersion, RunContext};
use faultline_core::store::{CacheTable, Store};
use faultline_core::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const MARKER: &str = "active.json";

#[derive(Serialize, Deserialize)]
struct CacheLine {
    id: String,
    payload: Value,
}

pub struct FsStore {
    data_dir: PathBuf,
    reports_dir: PathBuf,
    cache_dir: PathBuf,
    tables: Mutex<HashMap<CacheTable, BTreeMap<String, Value>>>,
}

impl FsStore {
    /// Open the store for one run tag and drop the in-progress marker.
    pub fn open(data_dir: &Path, reports_dir: &Path, ctx: &RunContext) -> anyhow::Result<Self> {
        let cache_dir = Self::cache_dir_for(reports_dir, ctx);
        std::fs::create_dir_all(&cache_dir)?;
        std::fs::create_dir_all(data_dir)?;

        let marker = cache_dir.join(MARKER);
        if let Ok(existing) = std::fs::read_to_string(&marker) {
            warn!(
                marker = %marker.display(),
                existing = %existing.trim(),
                "run tag already marked active; another process may be writing the same cache"
            );
        }
        let info = serde_json::json!({
            "pid": std::process::id(),
            "run_tag": ctx.run_tag,
            "mode": ctx.mode,
            "model": ctx.model,
            "started_at": chrono::Utc::now(),
        });
        std::fs::write(&marker, serde_json::to_string(&info)?)?;

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            reports_dir: reports_dir.to_path_buf(),
            cache_dir,
            tables: Mutex::new(HashMap::new()),
        })
    }

    pub fn cache_dir_for(reports_dir: &Path, ctx: &RunContext) -> PathBuf {
        reports_dir.join(format!("cache_{}_{}", ctx.mode, ctx.run_tag))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Remove the in-progress marker after a clean run.
    pub fn finish(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(self.cache_dir.join(MARKER)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn artifact_path(&self, kind: ArtifactKind, version: CodeVersion) -> PathBuf {
        self.data_dir
            .join(version.as_str().to_lowercase())
            .join(format!("{}.json", kind))
    }

    fn table_path(&self, table: CacheTable) -> PathBuf {
        self.cache_dir.join(format!("{}.jsonl", table.as_str()))
    }

    async fn load_table(&self, table: CacheTable) -> Result<BTreeMap<String, Value>> {
        let path = self.table_path(table);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = BTreeMap::new();
        let mut skipped = 0usize;
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<CacheLine>(line) {
                Ok(entry) => {
                    entries.insert(entry.id, entry.payload);
                }
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(
                table = table.as_str(),
                skipped,
                path = %path.display(),
                "skipped unreadable cache line(s)"
            );
        }
        debug!(table = table.as_str(), entries = entries.len(), "cache table loaded");
        Ok(entries)
    }

    /// Run `f` against the in-memory view of `table`, loading it first.
    async fn with_table<T>(
        &self,
        table: CacheTable,
        f: impl FnOnce(&mut BTreeMap<String, Value>) -> T,
    ) -> Result<T> {
        let mut tables = self.tables.lock().await;
        if !tables.contains_key(&table) {
            let loaded = self.load_table(table).await?;
            tables.insert(table, loaded);
        }
        let entries = tables
            .get_mut(&table)
            .ok_or_else(|| PipelineError::store("cache table vanished"))?;
        Ok(f(entries))
    }
}

#[async_trait]
impl Store for FsStore {
    async fn get_artifact(
        &self,
        kind: ArtifactKind,
        version: CodeVersion,
    ) -> Result<Option<Value>> {
        let path = self.artifact_path(kind, version);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn put_artifact(&self, artifact: &Artifact) -> Result<()> {
        let path = self.artifact_path(artifact.kind, artifact.version);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&artifact.payload)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(
            kind = %artifact.kind,
            version = %artifact.version,
            path = %path.display(),
            "artifact stored"
        );
        Ok(())
    }

    async fn has_artifact(&self, kind: ArtifactKind, version: CodeVersion) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.artifact_path(kind, version)).await?)
    }

    async fn get_entry(&self, table: CacheTable, chunk_id: &str) -> Result<Option<Value>> {
        self.with_table(table, |entries| entries.get(chunk_id).cloned()).await
    }

    async fn put_entry(&self, table: CacheTable, chunk_id: &str, payload: &Value) -> Result<()> {
        let mut line = serde_json::to_string(&CacheLine {
            id: chunk_id.to_string(),
            payload: payload.clone(),
        })?;
        line.push('\n');

        // Held across the append so lines from this process never interleave.
        let mut tables = self.tables.lock().await;
        if !tables.contains_key(&table) {
            let loaded = self.load_table(table).await?;
            tables.insert(table, loaded);
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.table_path(table))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;

        if let Some(entries) = tables.get_mut(&table) {
            entries.insert(chunk_id.to_string(), payload.clone());
        }
        Ok(())
    }

    async fn entries(&self, table: CacheTable) -> Result<BTreeMap<String, Value>> {
        self.with_table(table, |entries| entries.clone()).await
    }

    async fn clear_table(&self, table: CacheTable) -> Result<()> {
        let mut tables = self.tables.lock().await;
        match tokio::fs::remove_file(self.table_path(table)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tables.insert(table, BTreeMap::new());
        debug!(table = table.as_str(), "cache table cleared");
        Ok(())
    }

    async fn write_report(&self, report: &AnalysisReport) -> Result<String> {
        tokio::fs::create_dir_all(&self.reports_dir).await?;
        let path = self.reports_dir.join(report.file_name());
        let body = serde_json::to_vec_pretty(report)?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    PipelineError::store(format!("report already exists: {}", path.display()))
                }
                _ => PipelineError::Io(e),
            })?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        Ok(path.display().to_string())
    }
}
