use assert_cmd::Command;
use djvm_integration_tests::{all_classes, binary, ECHO, THROW_AND_CATCH};
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn djvm() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("djvm").unwrap()
}

fn write_classes(dir: &Path) -> PathBuf {
    let path = dir.join("classes.json");
    std::fs::write(&path, serde_json::to_string(&all_classes()).unwrap()).unwrap();
    path
}

fn stdout_json(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
}

#[test]
fn test_config_prints_defaults() {
    let json = stdout_json(djvm().arg("config"));
    assert_eq!(json["namespace"], "sandbox");
    assert_eq!(json["limits"]["max_instructions"], 1_000_000);
    assert_eq!(json["limits"]["max_call_depth"], 256);
    assert!(json["pinned_classes"]
        .as_array()
        .unwrap()
        .contains(&serde_json::json!("sandbox/java/lang/DJVM")));
}

#[test]
fn test_names() {
    let json = stdout_json(djvm().args(["names", "com.example.Foo", "java.lang.Exception", "java/lang/invoke/Foo"]));
    assert_eq!(json[0]["sandbox"], "sandbox/com/example/Foo");
    assert_eq!(json[0]["sandbox_binary"], "sandbox.com.example.Foo");
    assert_eq!(json[0]["catch_type"], "sandbox/com/example/Foo$1DJVM");
    assert_eq!(json[1]["catch_type"], "java/lang/Exception");
    assert_eq!(json[2]["sandbox"], "java/lang/invoke/Foo");
    assert_eq!(json[2]["exempt"], true);
}

#[test]
fn test_config_file_changes_namespace() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("djvm.json");
    std::fs::write(&path, r#"{"namespace": "jail"}"#).unwrap();

    let json = stdout_json(djvm().arg("--config").arg(&path).args(["names", "com.example.Foo"]));
    assert_eq!(json[0]["sandbox"], "jail/com/example/Foo");
}

#[test]
fn test_bad_config_file_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("djvm.json");
    std::fs::write(&path, r#"{"namespace": "jail", "unknown": 1}"#).unwrap();

    djvm()
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config file"));
}

#[test]
fn test_rewrite_digests() {
    let dir = TempDir::new().unwrap();
    let classes = write_classes(dir.path());

    let first = stdout_json(djvm().arg("rewrite").arg(&classes).arg("--digest-only"));
    let second = stdout_json(djvm().arg("rewrite").arg(&classes).arg("--digest-only"));
    assert_eq!(first, second);

    let entries = first.as_array().unwrap();
    assert_eq!(entries.len(), all_classes().len());
    assert_eq!(entries[0]["name"], THROW_AND_CATCH);
    assert_eq!(entries[0]["sandbox_name"], format!("sandbox/{}", THROW_AND_CATCH));
    assert_eq!(entries[0]["digest"].as_str().unwrap().len(), 64);
}

#[test]
fn test_rewrite_to_file() {
    let dir = TempDir::new().unwrap();
    let classes = write_classes(dir.path());
    let out = dir.path().join("sandboxed.json");

    let json = stdout_json(djvm().arg("rewrite").arg(&classes).arg("--out").arg(&out));
    assert_eq!(json["success"], true);

    let rewritten: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(rewritten[0]["name"], format!("sandbox/{}", THROW_AND_CATCH));
    assert_eq!(rewritten[0]["interfaces"][0], "sandbox/java/util/function/Function");
}

#[test]
fn test_run_task() {
    let dir = TempDir::new().unwrap();
    let classes = write_classes(dir.path());

    let json = stdout_json(
        djvm()
            .arg("run")
            .arg(&classes)
            .arg(binary(THROW_AND_CATCH))
            .args(["--input", r#"{"string": "Hello World"}"#]),
    );
    let elements = &json["outcome"]["returned"]["array"]["elements"];
    let texts: Vec<_> = elements
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["string"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(texts, ["FIRST FINALLY", "BASE EXCEPTION", "Hello World", "SECOND FINALLY"]);
    assert!(json["instructions_executed"].as_u64().unwrap() > 0);
}

#[test]
fn test_run_default_input_is_null() {
    let dir = TempDir::new().unwrap();
    let classes = write_classes(dir.path());

    let json = stdout_json(djvm().arg("run").arg(&classes).arg(binary(ECHO)));
    assert_eq!(json["outcome"]["returned"], "null");
}

#[test]
fn test_run_banned_class_fails() {
    let dir = TempDir::new().unwrap();
    let classes = write_classes(dir.path());

    djvm()
        .arg("run")
        .arg(&classes)
        .arg("java.lang.DJVM")
        .assert()
        .failure()
        .stderr(predicate::str::contains("java.lang.DJVM"));
}

#[test]
fn test_run_rejects_bad_input() {
    let dir = TempDir::new().unwrap();
    let classes = write_classes(dir.path());

    djvm()
        .arg("run")
        .arg(&classes)
        .arg(binary(ECHO))
        .args(["--input", "{not json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid input value"));
}
