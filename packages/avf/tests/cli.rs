//! End-to-end tests of the avf binary

use pretty_assertions::assert_eq;
use serde_json::Value;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn write_config(dir: &Path) -> std::path::PathBuf {
    let config = r#"
version: 1
repository: meta/versions.db
asset_root: assets
logging:
  level: warn
  ansi: false
backends:
  local:
    type: disk
    root: store
  vcs:
    type: git
    path: repo
"#;
    let path = dir.join("avf.yaml");
    std::fs::write(&path, config).unwrap();
    path
}

fn avf(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_avf"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("AVF_LOG")
        .output()
        .unwrap()
}

fn json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_create_find_history_get() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let file = dir.path().join("assets/chars/hero.fbx");
    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::write(&file, b"hero mesh").unwrap();

    let created = json(&avf(
        &config,
        &[
            "create",
            file.to_str().unwrap(),
            "--creator",
            "jane",
            "--tool-version",
            "maya_2024.2",
            "--tag",
            "rigged",
            "--custom-data",
            r#"{"poly_count": 1200}"#,
        ],
    ));
    assert_eq!(created["local"]["asset_path"], "chars/hero.fbx");
    assert_eq!(created["vcs"]["metadata"]["custom_data"]["poly_count"], 1200);

    let found = json(&avf(&config, &["find", "--tag", "rigged", "--creator", "jane"]));
    assert_eq!(found.as_array().unwrap().len(), 2);

    let history = json(&avf(&config, &["history", "chars/hero.fbx"]));
    assert_eq!(history["total_versions"], 2);

    let version_id = created["local"]["version_id"].as_str().unwrap();
    let target = dir.path().join("restored.fbx");
    json(&avf(
        &config,
        &["get", "local", version_id, target.to_str().unwrap()],
    ));
    assert_eq!(std::fs::read(&target).unwrap(), b"hero mesh");
}

#[test]
fn test_unknown_backend_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    let output = avf(&config, &["refs", "nowhere"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown backend 'nowhere'"));
}

#[test]
fn test_missing_config_fails() {
    let dir = TempDir::new().unwrap();
    let output = avf(&dir.path().join("absent.yaml"), &["refs", "local"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("absent.yaml"));
}
