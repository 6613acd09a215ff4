//! Integration tests for `tarn install`.

mod common;

use common::{read_json, stderr, stdout, tarn, Registry};
use serde_json::json;
use std::fs;
use tempfile::tempdir;

fn registry() -> String {
    let registry = Registry::default();
    registry.publish("left-pad", "1.3.0", json!({}));
    registry.publish("is-even", "1.0.0", json!({"dependencies": {"is-odd": "^0.1.2"}}));
    registry.publish("is-odd", "0.1.2", json!({}));
    registry.spawn()
}

#[test]
fn test_install_then_noop() {
    let url = registry();
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();
    fs::write(
        project.path().join("package.json"),
        r#"{"name":"app","dependencies":{"left-pad":"^1.0.0","is-even":"1.0.0"}}"#,
    )
    .unwrap();

    let output = tarn(home.path(), &url, project.path()).arg("install").output().unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains(" + left-pad@1.3.0"), "{out}");
    assert!(out.contains(" + is-even@1.0.0"), "{out}");
    assert!(!out.contains("is-odd@"), "transitive packages are not listed: {out}");
    assert!(out.contains(" 3 packages installed"), "{out}");
    assert!(stderr(&output).contains("Saved lockfile"));
    assert!(project.path().join("bun.lockb").is_file());
    assert_eq!(
        read_json(&project.path().join("node_modules/is-odd/package.json"))["version"],
        "0.1.2"
    );

    let again = tarn(home.path(), &url, project.path()).arg("install").output().unwrap();
    assert!(again.status.success());
    assert!(
        stdout(&again).contains("Checked 3 installs across 3 packages (no changes)"),
        "{}",
        stdout(&again)
    );
    assert!(!stderr(&again).contains("Saved lockfile"));
}

#[test]
fn test_text_lockfile_and_yarn_lock() {
    let url = registry();
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();
    fs::write(project.path().join("package.json"), r#"{"dependencies":{"left-pad":"1.3.0"}}"#).unwrap();

    let output = tarn(home.path(), &url, project.path())
        .args(["install", "--save-text-lockfile", "-y"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(!project.path().join("bun.lockb").exists());
    // The registry serves no `dist.integrity`; the hash of the download is recorded.
    let lock = fs::read_to_string(project.path().join("bun.lock")).unwrap();
    assert!(lock.contains("\"sha512-"), "{lock}");
    let yarn = fs::read_to_string(project.path().join("yarn.lock")).unwrap();
    assert!(yarn.contains("left-pad@1.3.0"), "{yarn}");
}

#[test]
fn test_lockfile_only_skips_node_modules() {
    let url = registry();
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();
    fs::write(project.path().join("package.json"), r#"{"dependencies":{"left-pad":"1.3.0"}}"#).unwrap();

    let output = tarn(home.path(), &url, project.path())
        .args(["install", "--lockfile-only", "--network-concurrency", "1"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(project.path().join("bun.lockb").is_file());
    assert!(!project.path().join("node_modules").exists());
}

#[test]
fn test_missing_version_fails() {
    let url = registry();
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();
    fs::write(project.path().join("package.json"), r#"{"dependencies":{"left-pad":"9.9.9"}}"#).unwrap();

    let output = tarn(home.path(), &url, project.path()).arg("install").output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("error: left-pad@9.9.9 failed to resolve"), "{err}");
    assert!(!project.path().join("bun.lockb").exists());
}

#[test]
fn test_invalid_cpu_is_rejected() {
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();
    fs::write(project.path().join("package.json"), "{}").unwrap();

    let output = tarn(home.path(), "http://127.0.0.1:9/", project.path())
        .args(["install", "--cpu", "z80"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("error: invalid cpu \"z80\""), "{}", stderr(&output));
}

#[test]
fn test_insecure_warning_only_with_flag() {
    let url = registry();
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();
    fs::write(project.path().join("package.json"), r#"{"dependencies":{"left-pad":"1.3.0"}}"#).unwrap();

    let plain = tarn(home.path(), &url, project.path()).arg("install").output().unwrap();
    assert!(!stderr(&plain).contains("insecure"));
    assert!(!stdout(&plain).contains("insecure"));

    let insecure = tarn(home.path(), &url, project.path())
        .args(["install", "--insecure"])
        .output()
        .unwrap();
    assert!(insecure.status.success());
    assert!(stderr(&insecure).contains("--insecure"));
}

#[test]
fn test_missing_package_json() {
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();
    let output = tarn(home.path(), "http://127.0.0.1:9/", project.path())
        .arg("install")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).starts_with("error: "));
}
