//! CLI contract tests run against a temporary root.

use std::path::Path;

use assert_cmd::Command;
use tempfile::TempDir;

const POD: &str = r#"{
  "name": "web",
  "namespace": "tenant",
  "spec": { "containers": [{ "name": "main", "image": "nginx" }] }
}"#;

const ANYTHING: &str = r#"
groups = ["system:authenticated"]
allowPrivilegedContainer = true
volumes = ["*"]
"#;

fn root() -> TempDir {
    match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(err) => panic!("failed to create tempdir: {err}"),
    }
}

fn straylight(root: &Path) -> Command {
    let mut cmd = match Command::cargo_bin("straylight") {
        Ok(cmd) => cmd,
        Err(err) => panic!("binary should build: {err}"),
    };
    cmd.arg("--root").arg(root).env("RUST_LOG", "warn");
    cmd
}

fn stdout(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8_lossy(&output).into_owned()
}

fn write(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            panic!("failed to create {}: {err}", parent.display());
        }
    }
    if let Err(err) = std::fs::write(path, contents) {
        panic!("failed to write {}: {err}", path.display());
    }
}

#[test]
fn check_policies_with_no_directory() {
    let root = root();
    let out = stdout(straylight(root.path()).arg("check-policies"));
    assert_eq!(out.trim(), "0 policies OK");
}

#[test]
fn check_policies_lists_admission_order() {
    let root = root();
    write(&root.path().join("policies/anything.toml"), ANYTHING);
    write(
        &root.path().join("policies/restricted.toml"),
        "[runAsUser]\ntype = \"MustRunAsRange\"\n[seLinuxContext]\ntype = \"MustRunAs\"\n",
    );

    let out = stdout(straylight(root.path()).arg("check-policies"));
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("restricted\tpriority=-\tscore="));
    assert!(lines[1].starts_with("anything\tpriority=-\tscore="));
    assert_eq!(lines[2], "2 policies OK");
}

#[test]
fn invalid_policy_fails_the_check() {
    let root = root();
    write(
        &root.path().join("policies/broken.toml"),
        "[runAsUser]\ntype = \"MustRunAs\"\n",
    );
    straylight(root.path()).arg("check-policies").assert().failure();
}

#[test]
fn create_namespace_once() {
    let root = root();
    let out = stdout(straylight(root.path()).args(["create-namespace", "tenant"]));
    assert_eq!(out.trim(), "namespace tenant created");
    assert!(root.path().join("straylight.db").exists());

    straylight(root.path())
        .args(["create-namespace", "tenant"])
        .assert()
        .failure();
}

#[test]
fn repair_on_unallocated_namespaces() {
    let root = root();
    stdout(straylight(root.path()).args(["create-namespace", "tenant"]));
    let out = stdout(straylight(root.path()).arg("repair"));
    assert_eq!(out.trim(), "allocated: 0  skipped: 0");
}

#[test]
fn review_names_the_admitting_policy() {
    let root = root();
    write(&root.path().join("policies/anything.toml"), ANYTHING);
    let pod = root.path().join("pod.json");
    write(&pod, POD);

    let out = stdout(
        straylight(root.path())
            .arg("review")
            .arg("--pod")
            .arg(&pod)
            .args(["--user", "alice", "--group", "system:authenticated"]),
    );
    let response: serde_json::Value = match serde_json::from_str(&out) {
        Ok(value) => value,
        Err(err) => panic!("review should print JSON: {err}\n{out}"),
    };
    assert_eq!(response["allowedBy"], "anything");
    assert_eq!(response["pod"]["annotations"]["straylight.io/policy"], "anything");
}

#[test]
fn review_reads_stdin_and_reports_refusal() {
    let root = root();
    let out = stdout(
        straylight(root.path())
            .args(["review", "--pod", "-", "--user", "alice", "--namespace", "other"])
            .write_stdin(POD),
    );
    let response: serde_json::Value = match serde_json::from_str(&out) {
        Ok(value) => value,
        Err(err) => panic!("review should print JSON: {err}\n{out}"),
    };
    assert!(response["allowedBy"].is_null());
    assert_eq!(response["reason"], "no providers available to validate pod request");
}

#[test]
fn broken_config_is_reported() {
    let root = root();
    write(&root.path().join("config.toml"), "[allocation\n");
    let assert = straylight(root.path()).arg("check-policies").assert().failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
    assert!(stderr.contains("failed to parse config"));
}
