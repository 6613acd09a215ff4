//! Integration tests for `tarn add` and `tarn remove`.

mod common;

use common::{read_json, stderr, stdout, tarn, Registry};
use serde_json::json;
use std::fs;
use tempfile::tempdir;

fn registry() -> String {
    let registry = Registry::default();
    registry.publish("left-pad", "1.2.0", json!({}));
    registry.publish("left-pad", "1.3.0", json!({}));
    registry.publish("tool", "2.0.1", json!({}));
    registry.spawn()
}

#[test]
fn test_add_writes_caret_range() {
    let url = registry();
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();
    fs::write(project.path().join("package.json"), r#"{"name":"app"}"#).unwrap();

    let output = tarn(home.path(), &url, project.path())
        .args(["add", "left-pad"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains(" + left-pad@1.3.0"));

    let manifest = read_json(&project.path().join("package.json"));
    assert_eq!(manifest["dependencies"]["left-pad"], "^1.3.0");
    assert!(project.path().join("node_modules/left-pad/package.json").is_file());

    // The lockfile agrees with package.json: nothing to do afterwards.
    let again = tarn(home.path(), &url, project.path()).arg("install").output().unwrap();
    assert!(stdout(&again).contains("(no changes)"), "{}", stdout(&again));
}

#[test]
fn test_add_literal_exact_and_dev() {
    let url = registry();
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();
    fs::write(project.path().join("package.json"), r#"{"name":"app"}"#).unwrap();

    let output = tarn(home.path(), &url, project.path())
        .args(["add", "left-pad@~1.2.0"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let output = tarn(home.path(), &url, project.path())
        .args(["add", "-d", "--exact", "tool"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let manifest = read_json(&project.path().join("package.json"));
    assert_eq!(manifest["dependencies"]["left-pad"], "~1.2.0");
    assert_eq!(manifest["devDependencies"]["tool"], "2.0.1");
}

#[test]
fn test_add_local_folder_uses_its_name() {
    let url = registry();
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();
    fs::write(project.path().join("package.json"), r#"{"name":"app"}"#).unwrap();
    fs::create_dir(project.path().join("lib")).unwrap();
    fs::write(project.path().join("lib/package.json"), r#"{"name":"my-lib","version":"0.1.0"}"#).unwrap();

    let output = tarn(home.path(), &url, project.path())
        .args(["add", "file:lib"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let manifest = read_json(&project.path().join("package.json"));
    assert_eq!(manifest["dependencies"]["my-lib"], "file:lib");
    assert!(project.path().join("node_modules/my-lib/package.json").is_file());
}

#[test]
fn test_add_missing_path_leaves_package_json() {
    let url = registry();
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();
    let original = "{\n  \"name\": \"app\"\n}\n";
    fs::write(project.path().join("package.json"), original).unwrap();

    let output = tarn(home.path(), &url, project.path())
        .args(["add", "file:../definitely-missing"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("failed to resolve"), "{}", stderr(&output));
    assert_eq!(fs::read_to_string(project.path().join("package.json")).unwrap(), original);
}

#[test]
fn test_add_unknown_package_restores_package_json() {
    let url = registry();
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();
    let original = r#"{"name":"app","dependencies":{"left-pad":"1.3.0"}}"#;
    fs::write(project.path().join("package.json"), original).unwrap();

    let output = tarn(home.path(), &url, project.path())
        .args(["add", "no-such-package"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(fs::read_to_string(project.path().join("package.json")).unwrap(), original);
}

#[test]
fn test_remove_last_dependency_deletes_lockfile() {
    let url = registry();
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();
    fs::write(
        project.path().join("package.json"),
        r#"{"name":"app","dependencies":{"left-pad":"1.3.0","tool":"2.0.1"}}"#,
    )
    .unwrap();
    let output = tarn(home.path(), &url, project.path()).arg("install").output().unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let output = tarn(home.path(), &url, project.path())
        .args(["remove", "tool"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(project.path().join("bun.lockb").is_file());
    assert!(!project.path().join("node_modules/tool").exists());

    let output = tarn(home.path(), &url, project.path())
        .args(["remove", "left-pad"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let manifest = read_json(&project.path().join("package.json"));
    assert!(manifest.get("dependencies").is_none());
    assert!(!project.path().join("bun.lockb").exists());
    assert!(!project.path().join("node_modules/left-pad").exists());
}
