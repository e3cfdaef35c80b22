//! End-to-end runs over the file store, with external builders that copy
//! fixture JSON into place and a scripted or mocked model.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use faultline::config::{ArtifactCommand, Config, ModelConfig, PathsConfig, SourcesConfig};
use faultline::progress::ProgressMode;
use faultline::run::{run, run_with_model};
use faultline_core::metrics::AnalysisReport;
use faultline_core::model::{Prompt, ScriptedModel};
use faultline_core::models::{ArtifactKind, Mode, RunContext};
use faultline_core::progress::Phase;
use faultline_core::PipelineError;
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ORIG_B: &str = "def is_positive(x):\n    return x > 0\n";
const MUT_B: &str = "def is_positive(x):\n    return x < 0\n";

fn bundle(b: &str) -> Value {
    json!({
        "file_tree": "a.py\nb.py\nc.py",
        "files": [
            {"path": "a.py", "content": "def add(x, y):\n    return x + y\n"},
            {"path": "b.py", "content": b},
            {"path": "c.py", "content": "def double(x):\n    return 2 * x\n"},
        ]
    })
}

fn write_json(path: &Path, value: &Value) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

fn copy(file: &str) -> Vec<String> {
    vec!["cp".to_string(), format!("{{src}}/{}", file), "{out}".to_string()]
}

/// Three files, one chunk each; the mutation flips the comparison in b.py.
fn setup(root: &Path) -> Config {
    let orig = root.join("repos/orig");
    let mutated = root.join("repos/mut");
    write_json(&orig.join("bundle.json"), &bundle(ORIG_B));
    write_json(&mutated.join("bundle.json"), &bundle(MUT_B));
    write_json(
        &orig.join("coverage.json"),
        &json!({"files": {"b.py": {"executed_lines": [1, 2], "missing_lines": []}}}),
    );
    write_json(
        &mutated.join("mutated_files.json"),
        &json!([
            {"rel_path": "b.py", "action": "mutated",
             "mutations": [{"lineno": 2, "end_lineno": 2}]},
            {"rel_path": "tests/test_b.py", "action": "mutated", "mutations": [{"lineno": 1}]},
        ]),
    );
    write_json(
        &root.join("issues.json"),
        &json!([{"number": 7, "title": "is_positive returns True for -3", "body": "see b.py"}]),
    );

    let mut artifacts = BTreeMap::new();
    artifacts.insert(
        ArtifactKind::TextBundle,
        ArtifactCommand {
            orig: Some(copy("bundle.json")),
            mutated: Some(copy("bundle.json")),
        },
    );
    artifacts.insert(
        ArtifactKind::Coverage,
        ArtifactCommand {
            orig: Some(copy("coverage.json")),
            mutated: None,
        },
    );

    Config {
        paths: PathsConfig {
            data_dir: root.join("data"),
            reports_dir: root.join("reports"),
        },
        artifacts,
        sources: SourcesConfig {
            orig_repo: Some(orig),
            mut_repo: Some(mutated),
            issue_files: vec![root.join("issues.json")],
            mutation_log: None,
        },
        ..Default::default()
    }
}

const NOTES: &str = r#"{"symbols": [], "intents": ["small arithmetic helper"],
    "invariants": [], "risky_spans": []}"#;
const CLEAN: &str = r#"{"suspicious": false, "confidence": 0.1, "line_spans": []}"#;
const FLAGGED: &str = r#"{"suspicious": true, "confidence": 0.9, "line_spans": [[2, 2]],
    "explanation": "comparison flipped",
    "repair": "--- a/b.py\n+++ b/b.py\n@@ -2 +2 @@\n-    return x < 0\n+    return x > 0\n"}"#;

fn answer(p: &Prompt) -> String {
    match p.phase {
        Phase::Index => NOTES.to_string(),
        Phase::Detect if p.chunk_id.starts_with("b.py") => FLAGGED.to_string(),
        Phase::Detect => CLEAN.to_string(),
    }
}

fn read_report(location: &str) -> AnalysisReport {
    serde_json::from_str(&fs::read_to_string(location).unwrap()).unwrap()
}

fn reports_in(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == "json"))
        .collect()
}

#[tokio::test]
async fn flagged_mutation_is_a_rank_one_hit() {
    let tmp = TempDir::new().unwrap();
    let config = setup(tmp.path());
    let ctx = RunContext::new("a", Mode::Text, "mistral");
    let model = ScriptedModel::new("mistral", |p| Ok(answer(p)));

    let outcome = run_with_model(&config, &ctx, ProgressMode::Off, &model).await.unwrap();
    let report = &outcome.report;
    assert!(report.localization.hit);
    assert_eq!(report.localization.rank, Some(1));
    assert_eq!(report.localization.chunk_id.as_deref(), Some("b.py#L1"));
    assert_eq!(report.ranking[0].chunk_id, "b.py#L1");
    assert_eq!(report.stats.orig_chunks, 3);
    assert_eq!(report.stats.mut_chunks, 3);
    assert_eq!(report.stats.well_formed_repairs, 1);
    assert_eq!(report.stats.repairs_touching_mutation, 1);
    assert_eq!(report.detection_metrics.file.counts.tp, 1);
    assert_eq!(report.detection_metrics.file.counts.fp, 0);
    assert_eq!(model.calls(), 6);

    // Coverage and issues reached the detect prompt of the mutated chunk.
    let b_prompt = model
        .prompts()
        .into_iter()
        .find(|p| p.phase == Phase::Detect && p.chunk_id == "b.py#L1")
        .unwrap();
    assert!(b_prompt.user.contains("executed by tests"));
    assert!(b_prompt.user.contains("#7"));

    // Test files never enter the ground truth.
    assert_eq!(report.ground_truth.keys().collect::<Vec<_>>(), vec!["b.py"]);

    let on_disk = read_report(&outcome.location);
    assert_eq!(&on_disk, report);
    assert!(outcome.location.ends_with(&report.file_name()));
    assert_eq!(reports_in(&tmp.path().join("reports")).len(), 1);

    let cache = tmp.path().join("reports/cache_text_a");
    assert_eq!(fs::read_to_string(cache.join("summaries.jsonl")).unwrap().lines().count(), 3);
    assert_eq!(fs::read_to_string(cache.join("detections.jsonl")).unwrap().lines().count(), 3);
    assert!(!cache.join("active.json").exists());
    assert!(tmp.path().join("data/orig/text-bundle.json").exists());
    assert!(tmp.path().join("data/mut/mutation-log.json").exists());
    assert!(tmp.path().join("reports/trace_text_a/trace.jsonl").exists());
}

#[tokio::test]
async fn resume_without_cache_matches_fresh_run() {
    let fresh_dir = TempDir::new().unwrap();
    let resumed_dir = TempDir::new().unwrap();
    let fresh_cfg = setup(fresh_dir.path());
    let resumed_cfg = setup(resumed_dir.path());

    let fresh_ctx = RunContext::new("b", Mode::Text, "mistral");
    let resumed_ctx = RunContext::new("b", Mode::Text, "mistral").with_resume(true);
    let m1 = ScriptedModel::new("mistral", |p| Ok(answer(p)));
    let m2 = ScriptedModel::new("mistral", |p| Ok(answer(p)));

    let fresh = run_with_model(&fresh_cfg, &fresh_ctx, ProgressMode::Off, &m1)
        .await
        .unwrap()
        .report;
    let resumed = run_with_model(&resumed_cfg, &resumed_ctx, ProgressMode::Off, &m2)
        .await
        .unwrap()
        .report;

    assert_eq!(m1.calls(), m2.calls());
    assert_eq!(fresh.localization, resumed.localization);
    assert_eq!(fresh.ranking, resumed.ranking);
    assert_eq!(fresh.results, resumed.results);
    assert_eq!(fresh.detection_metrics, resumed.detection_metrics);
    assert_eq!(fresh.artifacts, resumed.artifacts);
    assert!(resumed_dir.path().join("data/mut/text-bundle.json").exists());
}

#[tokio::test]
async fn resumed_run_reuses_everything_and_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let config = setup(tmp.path());
    let ctx = RunContext::new("idem", Mode::Text, "mistral");
    let model = ScriptedModel::new("mistral", |p| Ok(answer(p)));
    let first = run_with_model(&config, &ctx, ProgressMode::Off, &model).await.unwrap().report;

    // Report names carry a one-second timestamp.
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let silent = ScriptedModel::new("mistral", |_| panic!("resumed run must not call the model"));
    let resumed = ctx.clone().with_resume(true);
    let second = run_with_model(&config, &resumed, ProgressMode::Off, &silent)
        .await
        .unwrap()
        .report;

    assert_eq!(silent.calls(), 0);
    assert_eq!(second.stats.index.reused, 3);
    assert_eq!(second.stats.detect.reused, 3);
    assert_eq!(first.ranking, second.ranking);
    assert_eq!(first.localization, second.localization);
    assert_eq!(reports_in(&tmp.path().join("reports")).len(), 2);
}

#[tokio::test]
async fn skip_model_without_cache_reports_no_hit() {
    let tmp = TempDir::new().unwrap();
    let config = setup(tmp.path());
    let ctx = RunContext::new("dry", Mode::Text, "mistral").with_skip_model(true);
    let silent = ScriptedModel::new("mistral", |_| panic!("skip-model must not call the model"));

    let report = run_with_model(&config, &ctx, ProgressMode::Off, &silent).await.unwrap().report;
    assert!(!report.localization.hit);
    assert_eq!(report.stats.detect.skipped, 3);
    assert!(!tmp.path().join("reports/cache_text_dry/detections.jsonl").exists());
}

#[tokio::test]
async fn missing_graph_builder_is_artifact_missing() {
    let tmp = TempDir::new().unwrap();
    let config = setup(tmp.path());
    let ctx = RunContext::new("g", Mode::Graph, "mistral");
    let model = ScriptedModel::queue("mistral", vec![]);

    let err = run_with_model(&config, &ctx, ProgressMode::Off, &model).await.unwrap_err();
    let pipeline = err.downcast_ref::<PipelineError>().unwrap();
    assert_eq!(pipeline.kind(), "ArtifactMissingError");
    assert_eq!(model.calls(), 0);
    assert!(reports_in(&tmp.path().join("reports")).is_empty());
}

fn ollama_config(root: &Path, base_url: String) -> Config {
    Config {
        model: ModelConfig {
            base_url,
            timeout_secs: 5,
            max_retries: 2,
            backoff_base_ms: 1,
            temperature: None,
        },
        ..setup(root)
    }
}

/// Answers fine for both phases: notes for the indexer, a clean verdict
/// for the detector.
fn generic_reply() -> ResponseTemplate {
    let text = r#"{"intents": ["helper"], "suspicious": false, "confidence": 0.1}"#;
    ResponseTemplate::new(200).set_body_json(json!({ "response": text }))
}

#[tokio::test]
async fn exhausted_model_aborts_and_resume_continues_from_last_chunk() {
    let tmp = TempDir::new().unwrap();

    // Three summaries and one verdict succeed, then the service goes down.
    let flaky = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(generic_reply())
        .up_to_n_times(4)
        .mount(&flaky)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&flaky)
        .await;

    let config = ollama_config(tmp.path(), flaky.uri());
    let ctx = RunContext::new("c", Mode::Text, "mistral");
    let err = run(&config, &ctx, ProgressMode::Off).await.unwrap_err();
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::ModelUnavailable { attempts, .. }) => assert_eq!(*attempts, 3),
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(flaky.received_requests().await.unwrap().len(), 4 + 3);
    assert!(reports_in(&tmp.path().join("reports")).is_empty());

    let healthy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(generic_reply())
        .mount(&healthy)
        .await;

    let config = ollama_config(tmp.path(), healthy.uri());
    let resumed = ctx.with_resume(true);
    let outcome = run(&config, &resumed, ProgressMode::Off).await.unwrap();

    // Only the two verdicts that were never persisted are requested again.
    let requests = healthy.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let first_body = String::from_utf8_lossy(&requests[0].body).to_string();
    assert!(first_body.contains("File: b.py"));
    assert_eq!(outcome.report.stats.index.reused, 3);
    assert_eq!(outcome.report.stats.detect.reused, 1);
    assert!(!outcome.report.localization.hit);
}
