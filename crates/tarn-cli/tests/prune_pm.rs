//! Integration tests for `tarn prune`, `tarn pm`, `tarn link` and the
//! security scanner hook.

mod common;

use common::{stderr, stdout, tarn, Registry};
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write_package(dir: &Path, name: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("package.json"), json!({"name": name, "version": "1.0.0"}).to_string()).unwrap();
}

#[test]
fn test_prune_dry_run_then_idempotent() {
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();
    let root = project.path();
    fs::write(root.join("package.json"), r#"{"dependencies":{"kept":"1.0.0"}}"#).unwrap();
    write_package(&root.join("node_modules/kept"), "kept");
    write_package(&root.join("node_modules/stray"), "stray");
    let offline = "http://127.0.0.1:9/";

    let dry = tarn(home.path(), offline, root).args(["prune", "--dry-run"]).output().unwrap();
    assert!(dry.status.success(), "stderr: {}", stderr(&dry));
    assert!(stdout(&dry).contains(" - stray"));
    assert!(root.join("node_modules/stray").is_dir());

    let real = tarn(home.path(), offline, root).arg("prune").output().unwrap();
    assert!(real.status.success());
    assert!(stdout(&real).contains(" 1 package removed"));
    assert!(!root.join("node_modules/stray").exists());
    assert!(root.join("node_modules/kept").is_dir());

    let again = tarn(home.path(), offline, root).arg("prune").output().unwrap();
    assert!(stdout(&again).contains("no changes"));
}

#[test]
fn test_prune_without_package_json() {
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();
    let output = tarn(home.path(), "http://127.0.0.1:9/", project.path())
        .arg("prune")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("error: No package.json found, nothing to prune"));
}

#[test]
fn test_pm_ls_and_cache() {
    let registry = Registry::default();
    registry.publish("a", "1.0.0", json!({"dependencies": {"b": "1.0.0"}}));
    registry.publish("b", "1.0.0", json!({}));
    let url = registry.spawn();
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();
    fs::write(project.path().join("package.json"), r#"{"dependencies":{"a":"^1.0.0"}}"#).unwrap();
    assert!(tarn(home.path(), &url, project.path()).arg("install").status().unwrap().success());

    let ls = stdout(&tarn(home.path(), &url, project.path()).args(["pm", "ls"]).output().unwrap());
    assert!(ls.contains("└── a@1.0.0"), "{ls}");
    assert!(!ls.contains("b@1.0.0"), "{ls}");
    let all = stdout(&tarn(home.path(), &url, project.path()).args(["pm", "ls", "--all"]).output().unwrap());
    assert!(all.contains("b@1.0.0"), "{all}");

    let cache = stdout(&tarn(home.path(), &url, project.path()).args(["pm", "cache"]).output().unwrap());
    assert_eq!(cache.trim(), home.path().join("store").display().to_string());
    let rm = tarn(home.path(), &url, project.path()).args(["pm", "cache", "rm"]).output().unwrap();
    assert!(rm.status.success());
    assert!(stdout(&rm).contains("Cleared 2 cached packages"), "{}", stdout(&rm));
}

#[cfg(unix)]
#[test]
fn test_fatal_advisory_blocks_install() {
    use std::os::unix::fs::PermissionsExt;

    let registry = Registry::default();
    registry.publish("evil", "1.0.0", json!({}));
    let url = registry.spawn();
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();
    let root = project.path();
    fs::write(root.join("package.json"), r#"{"dependencies":{"evil":"1.0.0"}}"#).unwrap();
    fs::write(root.join("bunfig.toml"), "[install.security]\nscanner = \"./scanner.sh\"\n").unwrap();
    let script = root.join("scanner.sh");
    fs::write(
        &script,
        "#!/bin/sh\ncat > /dev/null\necho '{\"advisories\":[{\"level\":\"fatal\",\"package\":\"evil\",\"description\":\"malware\"}]}'\n",
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let output = tarn(home.path(), &url, root).arg("install").output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("error: "), "{}", stderr(&output));
    assert!(!root.join("node_modules").exists());
    assert!(!root.join("bun.lockb").exists());
}

#[cfg(unix)]
#[test]
fn test_link_register_and_use() {
    let home = tempdir().unwrap();
    let lib = tempdir().unwrap();
    let project = tempdir().unwrap();
    let offline = "http://127.0.0.1:9/";
    write_package(lib.path(), "shared-lib");
    fs::write(project.path().join("package.json"), r#"{"name":"app"}"#).unwrap();

    let register = tarn(home.path(), offline, lib.path()).arg("link").output().unwrap();
    assert!(register.status.success(), "stderr: {}", stderr(&register));
    assert!(stdout(&register).contains("Registered \"shared-lib\""));

    let output = tarn(home.path(), offline, project.path())
        .args(["link", "shared-lib", "--save"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let link = project.path().join("node_modules/shared-lib");
    assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(project.path().join("package.json")).unwrap()).unwrap();
    assert_eq!(manifest["dependencies"]["shared-lib"], "link:shared-lib");

    let links = stdout(&tarn(home.path(), offline, project.path()).args(["pm", "ls", "--link"]).output().unwrap());
    assert!(links.contains("└── shared-lib -> "), "{links}");

    let unknown = tarn(home.path(), offline, project.path())
        .args(["link", "never-registered"])
        .output()
        .unwrap();
    assert_eq!(unknown.status.code(), Some(1));
}
