use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn faultline_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_faultline"))
}

fn write_config(root: &Path, extra: &str) -> PathBuf {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let content = format!(
        r#"[paths]
data_dir = "{root}/data"
reports_dir = "{root}/reports"

[model]
base_url = "http://127.0.0.1:1"
max_retries = 0
backoff_base_ms = 1
{extra}
"#,
        root = root.display(),
        extra = extra
    );
    let path = config_dir.join("faultline.toml");
    fs::write(&path, content).unwrap();
    path
}

fn run_faultline(
    config_path: &Path,
    args: &[&str],
    env: &[(&str, &str)],
) -> (String, String, bool) {
    let binary = faultline_binary();
    let mut cmd = Command::new(&binary);
    cmd.arg("--config").arg(config_path).args(args);
    for var in ["RUN_TAG", "RESUME", "SKIP_LLM", "MODEL_URL"] {
        cmd.env_remove(var);
    }
    for (k, v) in env {
        cmd.env(k, v);
    }
    let output = cmd
        .output()
        .unwrap_or_else(|e| panic!("Failed to run faultline binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_invalid_mode_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), "");
    let (_, stderr, success) = run_faultline(&config, &["ast"], &[]);
    assert!(!success);
    assert!(stderr.contains("invalid mode"), "stderr: {}", stderr);
}

#[test]
fn test_missing_config_file_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_faultline(&tmp.path().join("nope.toml"), &["text"], &[]);
    assert!(!success);
    assert!(stderr.contains("ConfigurationError"), "stderr: {}", stderr);
}

#[test]
fn test_missing_builder_exits_with_artifact_missing() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), "");
    let env = [("SKIP_LLM", "1"), ("RUN_TAG", "cli")];
    let (stdout, stderr, success) = run_faultline(&config, &["text"], &env);
    assert!(!success);
    assert!(stdout.is_empty());
    assert!(stderr.contains("ArtifactMissingError"), "stderr: {}", stderr);
    assert!(stderr.contains("transient=false"), "stderr: {}", stderr);
    assert!(stderr.contains("text-bundle"), "stderr: {}", stderr);
}

#[test]
fn test_unreachable_model_exits_with_model_unavailable() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    fs::create_dir_all(&repo).unwrap();
    fs::write(
        repo.join("bundle.json"),
        r#"{"files": [{"path": "a.py", "content": "x = 1\n"}]}"#,
    )
    .unwrap();
    fs::write(repo.join("coverage.json"), r#"{"files": {}}"#).unwrap();
    fs::write(
        repo.join("mutated_files.json"),
        r#"[{"rel_path": "a.py", "action": "mutated", "mutations": [{"lineno": 1}]}]"#,
    )
    .unwrap();
    let extra = format!(
        r#"
[sources]
orig_repo = "{repo}"
mut_repo = "{repo}"

[artifacts.text-bundle]
orig = ["cp", "{{src}}/bundle.json", "{{out}}"]
mut = ["cp", "{{src}}/bundle.json", "{{out}}"]

[artifacts.coverage]
orig = ["cp", "{{src}}/coverage.json", "{{out}}"]
"#,
        repo = repo.display()
    );
    let config = write_config(tmp.path(), &extra);

    let (_, stderr, success) =
        run_faultline(&config, &["text", "gemma2:9b", "--run-tag", "down"], &[]);
    assert!(!success);
    assert!(stderr.contains("ModelUnavailableError"), "stderr: {}", stderr);
    assert!(stderr.contains("transient=true"), "stderr: {}", stderr);
    assert!(tmp.path().join("data/orig/text-bundle.json").exists());
    assert!(tmp.path().join("reports/cache_text_down").is_dir());

    // With the model skipped the same inputs complete; nothing is flagged.
    let (stdout, stderr, success) = run_faultline(
        &config,
        &["text", "gemma2:9b", "--run-tag", "down", "--skip-llm"],
        &[],
    );
    assert!(success, "stderr: {}", stderr);
    let line: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(line["hit"], false);
    assert_eq!(line["run_tag"], "down");
    assert!(Path::new(line["report"].as_str().unwrap()).exists());
}

#[test]
fn test_run_tag_with_separator_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), "");
    let (_, stderr, success) = run_faultline(&config, &["text", "--run-tag", "../x"], &[]);
    assert!(!success);
    assert!(stderr.contains("invalid run tag"), "stderr: {}", stderr);
}
