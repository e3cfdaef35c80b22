//! Storage abstraction for faultline.
//!
//! The [`Store`] trait is the single seam between the pipeline and its
//! on-disk layout: artifacts keyed by `(kind, version)`, the per-chunk
//! summary and detection caches keyed by chunk id, and the final report.
//! The file-backed implementation lives in the `faultline` app crate;
//! [`memory::InMemoryStore`] backs tests.
//!
//! A store instance is scoped to one run tag. Implementations must be
//! `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::metrics::AnalysisReport;
use crate::models::{Artifact, ArtifactKind, CodeVersion};

/// Per-chunk cache tables, each exclusively owned by one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheTable {
    /// Written by the indexer.
    Summaries,
    /// Written by the detector.
    Detections,
}

impl CacheTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTable::Summaries => "summaries",
            CacheTable::Detections => "detections",
        }
    }
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_artifact`](Store::get_artifact) | Load an artifact payload, if present |
/// | [`put_artifact`](Store::put_artifact) | Persist a freshly built artifact |
/// | [`has_artifact`](Store::has_artifact) | Existence check without parsing |
/// | [`get_entry`](Store::get_entry) | Cached payload of one chunk |
/// | [`put_entry`](Store::put_entry) | Persist one chunk payload immediately |
/// | [`entries`](Store::entries) | All cached payloads of a table |
/// | [`clear_table`](Store::clear_table) | Drop a table before a fresh phase |
/// | [`write_report`](Store::write_report) | Write the terminal report once |
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_artifact(&self, kind: ArtifactKind, version: CodeVersion) -> Result<Option<Value>>;

    async fn put_artifact(&self, artifact: &Artifact) -> Result<()>;

    async fn has_artifact(&self, kind: ArtifactKind, version: CodeVersion) -> Result<bool>;

    async fn get_entry(&self, table: CacheTable, chunk_id: &str) -> Result<Option<Value>>;

    /// Must be durable when it returns: a crash afterwards keeps the entry.
    async fn put_entry(&self, table: CacheTable, chunk_id: &str, payload: &Value) -> Result<()>;

    async fn entries(&self, table: CacheTable) -> Result<BTreeMap<String, Value>>;

    async fn clear_table(&self, table: CacheTable) -> Result<()>;

    /// Returns a location string for the written report (a path for file stores).
    async fn write_report(&self, report: &AnalysisReport) -> Result<String>;
}
