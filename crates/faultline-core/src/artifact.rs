//! Artifact schemas and get-or-build resolution.
//!
//! Artifacts are JSON files produced by external collaborators (text
//! bundler, graph builder, coverage run, issue scraper, mutation injector).
//! Their schemas are owned by those tools, so parsing here is tolerant:
//! entries missing required fields are skipped rather than rejected.
//!
//! [`ArtifactStore::resolve`] implements the resume policy: reuse a stored
//! artifact when resume is enabled, otherwise build it through the
//! [`ArtifactBuilder`] and persist the output. Each key is built at most
//! once per `ArtifactStore`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::extract::parse_spans;
use crate::models::{merge_spans, Artifact, ArtifactKind, CodeVersion, LineSpan, RunContext};
use crate::store::Store;

/// Produces an artifact payload by running the external collaborator.
#[async_trait]
pub trait ArtifactBuilder: Send + Sync {
    async fn build(&self, kind: ArtifactKind, version: CodeVersion) -> anyhow::Result<Value>;
}

/// Get-or-build cache of artifacts for one run.
pub struct ArtifactStore<'a> {
    ctx: &'a RunContext,
    store: &'a dyn Store,
    builder: &'a dyn ArtifactBuilder,
    resolved: Mutex<HashMap<(ArtifactKind, CodeVersion), Arc<Artifact>>>,
    builds: AtomicUsize,
}

impl<'a> ArtifactStore<'a> {
    pub fn new(
        ctx: &'a RunContext,
        store: &'a dyn Store,
        builder: &'a dyn ArtifactBuilder,
    ) -> Self {
        Self {
            ctx,
            store,
            builder,
            resolved: Mutex::new(HashMap::new()),
            builds: AtomicUsize::new(0),
        }
    }

    /// Number of builder invocations so far.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub async fn resolve(&self, kind: ArtifactKind, version: CodeVersion) -> Result<Arc<Artifact>> {
        if let Some(hit) = self.resolved.lock().unwrap().get(&(kind, version)) {
            return Ok(Arc::clone(hit));
        }

        if self.ctx.resume {
            if let Some(payload) = self.stored(kind, version).await {
                info!(%kind, %version, "resume: using stored artifact");
                return Ok(self.remember(Artifact::new(kind, version, payload)));
            }
        }

        self.builds.fetch_add(1, Ordering::SeqCst);
        info!(%kind, %version, "building artifact");
        let payload = self
            .builder
            .build(kind, version)
            .await
            .map_err(|e| PipelineError::artifact_missing(kind, version, format!("{:#}", e)))?;
        let artifact = Artifact::new(kind, version, payload);
        self.store.put_artifact(&artifact).await?;
        Ok(self.remember(artifact))
    }

    /// Stored payload from an earlier run; read errors mean rebuild.
    async fn stored(&self, kind: ArtifactKind, version: CodeVersion) -> Option<Value> {
        match self.store.has_artifact(kind, version).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(%kind, %version, "resume: artifact not stored yet");
                return None;
            }
            Err(e) => {
                warn!(%kind, %version, error = %e, "resume: store unavailable, rebuilding");
                return None;
            }
        }
        match self.store.get_artifact(kind, version).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%kind, %version, error = %e, "resume: artifact unreadable, rebuilding");
                None
            }
        }
    }

    fn remember(&self, artifact: Artifact) -> Arc<Artifact> {
        let artifact = Arc::new(artifact);
        self.resolved
            .lock()
            .unwrap()
            .insert((artifact.kind, artifact.version), Arc::clone(&artifact));
        artifact
    }
}

// ============ Text bundle ============

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleFile {
    pub path: String,
    pub content: String,
}

/// `{ file_tree, files: [{path, content}] }`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextBundle {
    pub file_tree: String,
    pub files: Vec<BundleFile>,
}

impl TextBundle {
    pub fn from_value(v: &Value) -> std::result::Result<Self, String> {
        let files = v
            .get("files")
            .and_then(|f| f.as_array())
            .ok_or_else(|| "text bundle has no files array".to_string())?;
        let files = files
            .iter()
            .filter_map(|f| {
                let path = f.get("path")?.as_str()?.to_string();
                let content = f.get("content")?.as_str()?.to_string();
                if path.is_empty() || content.is_empty() {
                    None
                } else {
                    Some(BundleFile { path, content })
                }
            })
            .collect();
        Ok(Self {
            file_tree: v
                .get("file_tree")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string(),
            files,
        })
    }
}

// ============ Graph ============

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub id: String,
    pub kind: String,
    pub name: Option<String>,
    pub qualified_name: Option<String>,
    pub file: Option<String>,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    pub code: String,
    pub signature: Option<String>,
    pub parent_id: Option<String>,
}

impl GraphNode {
    pub fn display_name(&self) -> &str {
        self.qualified_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(&self.id)
    }

    pub fn span(&self) -> Option<LineSpan> {
        LineSpan::new(self.start_line?, self.end_line.or(self.start_line)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub kind: String,
}

/// `{ nodes: [...], edges: [...] }`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl CodeGraph {
    pub fn from_value(v: &Value) -> std::result::Result<Self, String> {
        let nodes = v
            .get("nodes")
            .and_then(|n| n.as_array())
            .ok_or_else(|| "graph has no nodes array".to_string())?;
        let nodes = nodes
            .iter()
            .filter_map(|n| {
                let id = id_string(n.get("id")?)?;
                let text = |k: &str| n.get(k).and_then(|x| x.as_str()).map(str::to_string);
                let line = |k: &str| {
                    n.get(k)
                        .and_then(|x| x.as_u64())
                        .and_then(|x| u32::try_from(x).ok())
                };
                Some(GraphNode {
                    kind: text("type")
                        .or_else(|| text("label"))
                        .unwrap_or_else(|| "Node".to_string()),
                    name: text("name"),
                    qualified_name: text("qualified_name"),
                    file: text("module").or_else(|| text("path")),
                    start_line: line("start_line"),
                    end_line: line("end_line"),
                    code: text("code").or_else(|| text("summary")).unwrap_or_default(),
                    signature: text("signature"),
                    parent_id: n.get("parent_id").and_then(id_string),
                    id,
                })
            })
            .collect();
        let edges = v
            .get("edges")
            .and_then(|e| e.as_array())
            .map(|edges| {
                edges
                    .iter()
                    .filter_map(|e| {
                        Some(GraphEdge {
                            source: id_string(e.get("source")?)?,
                            target: id_string(e.get("target")?)?,
                            kind: e
                                .get("type")
                                .and_then(|t| t.as_str())
                                .unwrap_or_default()
                                .to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self { nodes, edges })
    }
}

fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn id_list(v: Option<&Value>) -> Vec<String> {
    v.and_then(|n| n.as_array())
        .into_iter()
        .flatten()
        .filter_map(id_string)
        .collect()
}

// ============ Coverage ============

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileCoverage {
    pub executed: BTreeSet<u32>,
    pub missing: BTreeSet<u32>,
}

/// Executed lines per file and executed graph node ids.
///
/// Accepts coverage.py JSON (`files.<path>.executed_lines`) and a per-test
/// layout (`tests.<test>.files.<path>` line lists plus `tests.<test>.nodes`),
/// merging both into one union.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageMap {
    pub files: BTreeMap<String, FileCoverage>,
    pub executed_nodes: BTreeSet<String>,
}

impl CoverageMap {
    pub fn from_value(v: &Value) -> std::result::Result<Self, String> {
        if !v.is_object() {
            return Err("coverage artifact is not an object".to_string());
        }
        let mut map = CoverageMap::default();

        if let Some(files) = v.get("files").and_then(|f| f.as_object()) {
            for (path, entry) in files {
                let cov = map.files.entry(path.clone()).or_default();
                cov.executed.extend(line_list(entry.get("executed_lines").unwrap_or(entry)));
                cov.missing.extend(line_list(entry.get("missing_lines").unwrap_or(&Value::Null)));
            }
        }

        if let Some(tests) = v.get("tests").and_then(|t| t.as_object()) {
            for test in tests.values() {
                if let Some(files) = test.get("files").and_then(|f| f.as_object()) {
                    for (path, lines) in files {
                        let cov = map.files.entry(path.clone()).or_default();
                        cov.executed.extend(line_list(lines));
                    }
                }
                map.executed_nodes.extend(id_list(test.get("nodes")));
            }
        }

        map.executed_nodes.extend(id_list(v.get("executed_nodes")));

        for cov in map.files.values_mut() {
            let executed = cov.executed.clone();
            cov.missing.retain(|l| !executed.contains(l));
        }
        Ok(map)
    }

    /// Coverage for `path`, matched by normalized path or component suffix.
    pub fn for_file(&self, path: &str) -> Option<&FileCoverage> {
        self.files
            .iter()
            .find(|(k, _)| normalize_path(k) == normalize_path(path))
            .or_else(|| self.files.iter().find(|(k, _)| paths_match(k, path)))
            .map(|(_, v)| v)
    }
}

fn line_list(v: &Value) -> Vec<u32> {
    v.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|l| l.as_u64().and_then(|l| u32::try_from(l).ok()))
                .collect()
        })
        .unwrap_or_default()
}

// ============ Issues ============

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueReport {
    pub number: Option<u64>,
    pub title: String,
    pub body: String,
    pub comments: Vec<String>,
}

impl IssueReport {
    /// Title, body and comments as one searchable text.
    pub fn full_text(&self) -> String {
        let mut text = format!("{}\n{}", self.title, self.body);
        for c in &self.comments {
            text.push('\n');
            text.push_str(c);
        }
        text
    }
}

/// Parse an issues artifact: an array, or `{ issues: [...] }`.
pub fn parse_issues(v: &Value) -> std::result::Result<Vec<IssueReport>, String> {
    let items = v
        .as_array()
        .or_else(|| v.get("issues").and_then(|i| i.as_array()))
        .ok_or_else(|| "issues artifact is not an array".to_string())?;
    let mut issues: Vec<IssueReport> = items
        .iter()
        .filter_map(|i| {
            let title = i.get("title").and_then(|t| t.as_str()).unwrap_or_default().to_string();
            let body = i.get("body").and_then(|b| b.as_str()).unwrap_or_default().to_string();
            if title.is_empty() && body.is_empty() {
                return None;
            }
            let comments = i
                .get("comments")
                .and_then(|c| c.as_array())
                .map(|cs| {
                    cs.iter()
                        .filter_map(|c| {
                            c.as_str().or_else(|| c.get("body").and_then(|b| b.as_str()))
                        })
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            Some(IssueReport {
                number: i.get("number").and_then(|n| n.as_u64()),
                title,
                body,
                comments,
            })
        })
        .collect();
    issues.sort_by_key(|i| i.number.unwrap_or(u64::MAX));
    Ok(issues)
}

// ============ Ground truth ============

/// Known mutation sites: relative file path → merged line spans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroundTruth {
    pub sites: BTreeMap<String, Vec<LineSpan>>,
}

impl GroundTruth {
    /// Parse a mutation log.
    ///
    /// Accepts a record array (only `action == "mutated"` records, spans
    /// from `line_spans` and `mutations[].lineno/end_lineno`), a
    /// `{files|mutants|items|records: [...]}` wrapper, or a direct
    /// `{file: spans}` map. Test paths are ignored.
    pub fn from_value(v: &Value) -> std::result::Result<Self, String> {
        let records: Vec<&Value> = match v {
            Value::Array(items) => items.iter().collect(),
            Value::Object(map) => {
                match ["files", "mutants", "items", "records"]
                    .iter()
                    .find_map(|k| map.get(*k).and_then(|x| x.as_array()))
                {
                    Some(items) => items.iter().collect(),
                    None if !map.is_empty() && map.values().all(|x| x.is_array()) => {
                        let mut gt = GroundTruth::default();
                        for (file, spans) in map {
                            gt.add(&to_relative(file), parse_spans(spans));
                        }
                        return Ok(gt.finish());
                    }
                    None => return Err("mutation log has no records".to_string()),
                }
            }
            _ => return Err("mutation log is neither an array nor an object".to_string()),
        };

        let mut gt = GroundTruth::default();
        for rec in records {
            if let Some(action) = rec.get("action").and_then(|a| a.as_str()) {
                if action != "mutated" {
                    continue;
                }
            }
            let Some(file) = ["rel_path", "file", "path", "dst_path", "src_path"]
                .iter()
                .find_map(|k| rec.get(*k).and_then(|p| p.as_str()))
                .map(to_relative)
            else {
                continue;
            };
            let mut spans = Vec::new();
            for key in ["line_spans", "spans", "ranges", "lines"] {
                if let Some(raw) = rec.get(key) {
                    spans.extend(parse_spans(raw));
                }
            }
            for edit in rec
                .get("mutations")
                .or_else(|| rec.get("edits"))
                .and_then(|m| m.as_array())
                .into_iter()
                .flatten()
            {
                spans.extend(parse_spans(edit));
            }
            gt.add(&file, spans);
        }
        Ok(gt.finish())
    }

    fn add(&mut self, file: &str, spans: Vec<LineSpan>) {
        if file.is_empty() || is_test_path(file) || spans.is_empty() {
            return;
        }
        self.sites.entry(file.to_string()).or_default().extend(spans);
    }

    fn finish(mut self) -> Self {
        for spans in self.sites.values_mut() {
            *spans = merge_spans(spans);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Ground-truth spans for `file`, matched like [`paths_match`].
    pub fn spans_for(&self, file: &str) -> Option<(&str, &[LineSpan])> {
        self.sites
            .iter()
            .find(|(k, _)| paths_match(k, file))
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

// ============ Paths ============

/// Forward slashes, no `./` prefix, lowercase.
pub fn normalize_path(p: &str) -> String {
    let p = p.trim().replace('\\', "/");
    let mut p = p.as_str();
    while let Some(rest) = p.strip_prefix("./") {
        p = rest;
    }
    p.to_lowercase()
}

/// Equal after normalization, or one is a component-suffix of the other.
pub fn paths_match(a: &str, b: &str) -> bool {
    let a = normalize_path(a);
    let b = normalize_path(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || a.ends_with(&format!("/{}", b)) || b.ends_with(&format!("/{}", a))
}

/// Best-effort repository-relative form of a path from a mutation log.
pub fn to_relative(p: &str) -> String {
    let norm = p.trim().replace('\\', "/");
    if let Some((_, rest)) = norm.split_once("_mutants/") {
        return rest.to_string();
    }
    let is_absolute =
        norm.starts_with('/') || norm.split('/').next().is_some_and(|s| s.contains(':'));
    if !is_absolute {
        return norm.trim_start_matches("./").to_string();
    }
    let parts: Vec<&str> = norm.split('/').filter(|s| !s.is_empty()).collect();
    parts[parts.len().saturating_sub(2)..].join("/")
}

/// Files under `tests/` or `test/` are excluded from scoring.
pub fn is_test_path(p: &str) -> bool {
    let p = normalize_path(p);
    ["tests/", "test/"]
        .iter()
        .any(|pref| p.starts_with(pref) || p.contains(&format!("/{}", pref)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use serde_json::json;

    struct CountingBuilder {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ArtifactBuilder for CountingBuilder {
        async fn build(&self, kind: ArtifactKind, version: CodeVersion) -> anyhow::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("builder exited with status 1");
            }
            Ok(json!({"kind": kind.as_str(), "version": version.as_str()}))
        }
    }

    fn builder(fail: bool) -> CountingBuilder {
        CountingBuilder {
            calls: AtomicUsize::new(0),
            fail,
        }
    }

    #[tokio::test]
    async fn test_resolve_builds_once_per_run() {
        let ctx = RunContext::new("t", crate::models::Mode::Text, "m");
        let store = InMemoryStore::new();
        let b = builder(false);
        let artifacts = ArtifactStore::new(&ctx, &store, &b);

        let first = artifacts.resolve(ArtifactKind::Coverage, CodeVersion::Orig).await.unwrap();
        let second = artifacts.resolve(ArtifactKind::Coverage, CodeVersion::Orig).await.unwrap();
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.artifact_writes(), 1);
        assert_eq!(
            serde_json::to_vec(&first.payload).unwrap(),
            serde_json::to_vec(&second.payload).unwrap()
        );
    }

    #[tokio::test]
    async fn test_resume_reuses_stored_artifact_across_runs() {
        let ctx = RunContext::new("t", crate::models::Mode::Graph, "m").with_resume(true);
        let stored = json!({"nodes": [], "edges": []});
        let store = InMemoryStore::new().with_artifact(
            ArtifactKind::Graph,
            CodeVersion::Mut,
            stored.clone(),
        );
        let b = builder(false);

        let run1 = ArtifactStore::new(&ctx, &store, &b);
        let a1 = run1.resolve(ArtifactKind::Graph, CodeVersion::Mut).await.unwrap();
        let run2 = ArtifactStore::new(&ctx, &store, &b);
        let a2 = run2.resolve(ArtifactKind::Graph, CodeVersion::Mut).await.unwrap();

        assert_eq!(b.calls.load(Ordering::SeqCst), 0);
        assert_eq!(a1.payload, stored);
        assert_eq!(a1.digest, a2.digest);
    }

    #[tokio::test]
    async fn test_resume_checks_existence_before_reading() {
        let ctx = RunContext::new("t", crate::models::Mode::Text, "m").with_resume(true);
        let store = InMemoryStore::new().with_artifact(
            ArtifactKind::Coverage,
            CodeVersion::Orig,
            json!({"files": {}}),
        );
        let b = builder(false);
        let artifacts = ArtifactStore::new(&ctx, &store, &b);

        artifacts.resolve(ArtifactKind::TextBundle, CodeVersion::Orig).await.unwrap();
        assert_eq!(store.artifact_reads(), 0);
        assert_eq!(artifacts.builds(), 1);

        artifacts.resolve(ArtifactKind::Coverage, CodeVersion::Orig).await.unwrap();
        assert_eq!(store.artifact_reads(), 1);
        assert_eq!(artifacts.builds(), 1);
    }

    #[tokio::test]
    async fn test_without_resume_rebuilds_existing() {
        let ctx = RunContext::new("t", crate::models::Mode::Graph, "m");
        let store = InMemoryStore::new().with_artifact(
            ArtifactKind::Graph,
            CodeVersion::Orig,
            json!({"old": true}),
        );
        let b = builder(false);
        let artifacts = ArtifactStore::new(&ctx, &store, &b);
        let a = artifacts.resolve(ArtifactKind::Graph, CodeVersion::Orig).await.unwrap();
        assert_eq!(a.payload["kind"], "graph");
        assert_eq!(artifacts.builds(), 1);
    }

    #[tokio::test]
    async fn test_failed_build_is_artifact_missing() {
        let ctx = RunContext::new("t", crate::models::Mode::Text, "m").with_resume(true);
        let store = InMemoryStore::new();
        let b = builder(true);
        let artifacts = ArtifactStore::new(&ctx, &store, &b);
        let err = artifacts
            .resolve(ArtifactKind::TextBundle, CodeVersion::Orig)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ArtifactMissingError");
        assert_eq!(store.artifact_writes(), 0);
    }

    #[test]
    fn test_text_bundle_skips_empty_files() {
        let v = json!({
            "file_tree": "pkg/\n  a.py",
            "files": [
                {"path": "pkg/a.py", "content": "x = 1\n"},
                {"path": "pkg/empty.py", "content": ""},
                {"content": "orphan"}
            ]
        });
        let bundle = TextBundle::from_value(&v).unwrap();
        assert_eq!(bundle.files.len(), 1);
        assert_eq!(bundle.files[0].path, "pkg/a.py");
        assert!(TextBundle::from_value(&json!({})).is_err());
    }

    #[test]
    fn test_graph_parses_int_ids_and_module_path() {
        let v = json!({
            "nodes": [
                {"id": 0, "label": "Module", "type": "Module", "name": "a", "module": "pkg/a.py",
                 "start_line": 1, "end_line": 10, "code": "..."},
                {"id": 1, "type": "Function", "qualified_name": "a.f", "path": "pkg/a.py",
                 "start_line": 2, "end_line": 4, "code": "def f():\n    pass", "parent_id": 0}
            ],
            "edges": [{"source": 0, "target": 1, "type": "CONTAINS"}]
        });
        let g = CodeGraph::from_value(&v).unwrap();
        assert_eq!(g.nodes[1].id, "1");
        assert_eq!(g.nodes[1].parent_id.as_deref(), Some("0"));
        assert_eq!(g.nodes[1].file.as_deref(), Some("pkg/a.py"));
        assert_eq!(g.nodes[1].display_name(), "a.f");
        assert_eq!(g.edges[0].kind, "CONTAINS");
    }

    #[test]
    fn test_coverage_py_and_per_test_layouts() {
        let v = json!({
            "files": {"github/Repo.py": {"executed_lines": [1, 2, 5], "missing_lines": [3, 5]}},
            "tests": {"test_repo": {"files": {"github/Issue.py": [7]}, "nodes": [12]}}
        });
        let cov = CoverageMap::from_value(&v).unwrap();
        let repo = cov.for_file("./github/Repo.py").unwrap();
        assert!(repo.executed.contains(&5));
        assert!(!repo.missing.contains(&5));
        assert!(cov.for_file("src/github/Issue.py").is_some());
        assert!(cov.executed_nodes.contains("12"));
        assert!(cov.for_file("Repo.py").is_some());
        assert!(cov.for_file("other/Repo2.py").is_none());
    }

    #[test]
    fn test_ground_truth_from_mutation_log() {
        let v = json!([
            {"rel_path": "github/Repo.py", "action": "mutated", "ok": true,
             "mutations": [{"node": "Compare", "lineno": 40, "end_lineno": 40},
                           {"node": "BinOp", "lineno": 41, "end_lineno": 42}]},
            {"rel_path": "github/Other.py", "action": "copied", "mutations": []},
            {"rel_path": "tests/test_repo.py", "action": "mutated",
             "mutations": [{"lineno": 3, "end_lineno": 3}]},
            {"dst_path": "/data/mutated/PyGithub_mutants/github/Team.py", "action": "mutated",
             "line_spans": [[5, 6]]}
        ]);
        let gt = GroundTruth::from_value(&v).unwrap();
        assert_eq!(gt.sites.len(), 2);
        assert_eq!(gt.sites["github/Repo.py"], vec![LineSpan::new(40, 42).unwrap()]);
        assert_eq!(gt.sites["github/Team.py"], vec![LineSpan::new(5, 6).unwrap()]);
    }

    #[test]
    fn test_ground_truth_direct_map() {
        let gt = GroundTruth::from_value(&json!({"pkg/a.py": [[3, 4]]})).unwrap();
        assert_eq!(gt.spans_for("a.py").unwrap().1, &[LineSpan::new(3, 4).unwrap()]);
        assert!(GroundTruth::from_value(&json!("nope")).is_err());
    }

    #[test]
    fn test_issue_parsing_sorted_by_number() {
        let v = json!([
            {"number": 9, "title": "Crash in get_repo", "body": "trace",
             "comments": [{"body": "same here"}]},
            {"number": 2, "title": "Typo", "body": ""},
            {"number": 5, "title": "", "body": ""}
        ]);
        let issues = parse_issues(&v).unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].number, Some(2));
        assert!(issues[1].full_text().contains("same here"));
    }

    #[test]
    fn test_paths() {
        assert!(paths_match("github/Repo.py", "./github/repo.py"));
        assert!(paths_match("/abs/x/github/Repo.py", "github/Repo.py"));
        assert!(!paths_match("github/MyRepo.py", "Repo.py"));
        assert_eq!(to_relative("C:\\work\\PyGithub\\github\\Repo.py"), "github/Repo.py");
        assert!(is_test_path("tests/test_a.py"));
        assert!(is_test_path("pkg/test/helpers.py"));
        assert!(!is_test_path("pkg/testing.py"));
    }
}
