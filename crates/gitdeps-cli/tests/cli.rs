use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::{json, Value};

fn parse_json(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("valid json")
}

#[test]
fn empty_tree_is_up_to_date() {
    let temp = tempfile::tempdir().expect("tempdir");

    let assert = cargo_bin_cmd!("gitdeps")
        .env("GITDEPS_ROOT", temp.path())
        .env("GITDEPS_JSON", "1")
        .env("GITDEPS_PROGRESS", "0")
        .assert()
        .success();
    let payload = parse_json(&assert.get_output().stdout);
    assert_eq!(payload["status"], "Ok");
    assert_eq!(payload["message"], "dependencies are up to date");
    assert_eq!(payload["details"]["files_downloaded"], 0);
}

#[test]
fn malformed_manifest_is_a_user_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let build = temp.path().join("Build");
    fs::create_dir_all(&build).expect("build dir");
    fs::write(build.join("Broken.gitdeps.json"), "{ not json").expect("write manifest");

    let assert = cargo_bin_cmd!("gitdeps")
        .env("GITDEPS_ROOT", temp.path())
        .env("GITDEPS_JSON", "1")
        .assert()
        .code(1);
    let payload = parse_json(&assert.get_output().stdout);
    assert_eq!(payload["status"], "UserError");
    assert_eq!(payload["details"]["code"], "GD100");
}

#[test]
fn invalid_setting_is_a_user_error() {
    let temp = tempfile::tempdir().expect("tempdir");

    cargo_bin_cmd!("gitdeps")
        .env("GITDEPS_ROOT", temp.path())
        .env("GITDEPS_THREADS", "many")
        .assert()
        .code(1);
}

#[test]
fn dry_run_lists_each_planned_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let blob = "ab".repeat(32);
    let pack = "cd".repeat(32);
    let manifest = json!({
        "BaseUrl": "https://cdn.example/deps",
        "Files": [
            {"Name": "Binaries/tool.dll", "Hash": blob},
            {"Name": "Content/data.pak", "Hash": blob},
        ],
        "Blobs": [{"Hash": blob, "Size": 4, "PackHash": pack, "PackOffset": 0}],
        "Packs": [{"Hash": pack, "Size": 4, "CompressedSize": 24, "RemotePath": "v1"}],
    });
    let build = temp.path().join("Build");
    fs::create_dir_all(&build).expect("build dir");
    fs::write(
        build.join("Engine.gitdeps.json"),
        serde_json::to_vec(&manifest).expect("manifest json"),
    )
    .expect("write manifest");

    let assert = cargo_bin_cmd!("gitdeps")
        .env("GITDEPS_ROOT", temp.path())
        .env("GITDEPS_DRY_RUN", "1")
        .env("GITDEPS_PROGRESS", "0")
        .env_remove("GITDEPS_JSON")
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).into_owned();
    assert!(stdout.contains("Added: Binaries/tool.dll"), "{stdout}");
    assert!(stdout.contains("Added: Content/data.pak"), "{stdout}");
    assert!(!temp.path().join("Binaries").exists());
}
