//! In-memory [`Store`] implementation for tests.
//!
//! Uses `HashMap`/`BTreeMap` behind `std::sync::RwLock`. Counts artifact
//! reads and writes so tests can assert how the store was used.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::metrics::AnalysisReport;
use crate::models::{Artifact, ArtifactKind, CodeVersion};

use super::{CacheTable, Store};

/// In-memory store for tests and dry runs.
pub struct InMemoryStore {
    artifacts: RwLock<HashMap<(ArtifactKind, CodeVersion), Value>>,
    tables: RwLock<HashMap<CacheTable, BTreeMap<String, Value>>>,
    reports: RwLock<Vec<AnalysisReport>>,
    artifact_reads: AtomicUsize,
    artifact_writes: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            artifacts: RwLock::new(HashMap::new()),
            tables: RwLock::new(HashMap::new()),
            reports: RwLock::new(Vec::new()),
            artifact_reads: AtomicUsize::new(0),
            artifact_writes: AtomicUsize::new(0),
        }
    }

    /// Seed an artifact without counting it as a write.
    pub fn with_artifact(self, kind: ArtifactKind, version: CodeVersion, payload: Value) -> Self {
        self.artifacts.write().unwrap().insert((kind, version), payload);
        self
    }

    /// Payload reads; existence checks do not count.
    pub fn artifact_reads(&self) -> usize {
        self.artifact_reads.load(Ordering::SeqCst)
    }

    pub fn artifact_writes(&self) -> usize {
        self.artifact_writes.load(Ordering::SeqCst)
    }

    pub fn reports(&self) -> Vec<AnalysisReport> {
        self.reports.read().unwrap().clone()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_artifact(
        &self,
        kind: ArtifactKind,
        version: CodeVersion,
    ) -> Result<Option<Value>> {
        self.artifact_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.artifacts.read().unwrap().get(&(kind, version)).cloned())
    }

    async fn put_artifact(&self, artifact: &Artifact) -> Result<()> {
        self.artifact_writes.fetch_add(1, Ordering::SeqCst);
        self.artifacts
            .write()
            .unwrap()
            .insert((artifact.kind, artifact.version), artifact.payload.clone());
        Ok(())
    }

    async fn has_artifact(&self, kind: ArtifactKind, version: CodeVersion) -> Result<bool> {
        Ok(self.artifacts.read().unwrap().contains_key(&(kind, version)))
    }

    async fn get_entry(&self, table: CacheTable, chunk_id: &str) -> Result<Option<Value>> {
        Ok(self
            .tables
            .read()
            .unwrap()
            .get(&table)
            .and_then(|t| t.get(chunk_id))
            .cloned())
    }

    async fn put_entry(&self, table: CacheTable, chunk_id: &str, payload: &Value) -> Result<()> {
        self.tables
            .write()
            .unwrap()
            .entry(table)
            .or_default()
            .insert(chunk_id.to_string(), payload.clone());
        Ok(())
    }

    async fn entries(&self, table: CacheTable) -> Result<BTreeMap<String, Value>> {
        Ok(self
            .tables
            .read()
            .unwrap()
            .get(&table)
            .cloned()
            .unwrap_or_default())
    }

    async fn clear_table(&self, table: CacheTable) -> Result<()> {
        self.tables.write().unwrap().remove(&table);
        Ok(())
    }

    async fn write_report(&self, report: &AnalysisReport) -> Result<String> {
        let mut reports = self.reports.write().unwrap();
        if reports.iter().any(|r| r.generated_at == report.generated_at && r.mode == report.mode) {
            return Err(PipelineError::store(format!(
                "report for {} at {} already written",
                report.mode, report.generated_at
            )));
        }
        reports.push(report.clone());
        Ok(format!("memory://reports/{}", reports.len() - 1))
    }
}
