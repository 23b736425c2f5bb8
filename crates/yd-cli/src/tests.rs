use super::*;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should be monotonic")
        .as_nanos();
    std::env::temp_dir().join(format!("yd-cli-{}-{}", name, nanos))
}

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent should be created");
    }
    fs::write(path, content).expect("file should be written");
}

const WORKSPACE: &str = r#"{
  "collections": [
    {"id": 1, "data": {"name": "api", "envs": {"dev": {"data": {"host": "api.test"}}}}}
  ],
  "requests": [
    {"id": 2, "collectionId": 1, "data": {
      "uri": "${host}/ping", "method": "GET",
      "requestScript": "env.set(\"pinged\", \"yes\"); log(\"pre\");",
      "responseScript": "describe(\"ping\", || { it(\"ok\", || { expect(res.status).to_be(200); }); });"
    }}
  ],
  "jobs": [
    {"id": 3, "collectionId": 1, "data": {"name": "nightly", "script": "let r = exec(2); log(r.status);", "selectedEnvName": "dev"}}
  ]
}"#;

fn cli(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("yd-cli").chain(args.iter().copied()))
        .expect("arguments should parse")
}

#[test]
fn interpolate_reports_value_and_errors() {
    let output = run(cli(&[
        "interpolate",
        "--value",
        r#"{"url": "${host}/x", "bad": "${nope}"}"#,
        "--env",
        r#"{"host": "h"}"#,
    ]))
    .expect("interpolate should succeed");
    assert_eq!(output[0], "RESULT:OK");
    assert_eq!(output[1], r#"VALUE_JSON:{"url":"h/x","bad":"${nope}"}"#);
    assert!(output[2].starts_with(r#"ERRORS_JSON:[{"key":"${nope}""#));
}

#[test]
fn interpolate_without_env_fails_fast() {
    let output = run(cli(&["interpolate", "--value", r#""${a}""#]))
        .expect("interpolate should succeed");
    assert_eq!(
        output[2],
        r#"ERRORS_JSON:[{"key":"env","value":"request or env not defined"}]"#
    );
}

#[test]
fn json_arguments_read_files_with_at_prefix() {
    let path = temp_path("value.json");
    write_file(&path, r#"{"a": 1}"#);
    let raw = read_json_arg(&format!("@{}", path.display())).expect("file should be read");
    assert_eq!(raw, r#"{"a": 1}"#);

    let missing = read_json_arg("@/definitely/missing.json").expect_err("missing file");
    assert_eq!(missing.code, "CLI_INPUT_NOT_FOUND");
    let invalid = parse_json_arg::<serde_json::Value>("{").expect_err("invalid json");
    assert_eq!(invalid.code, "CLI_INPUT_INVALID");
}

#[test]
fn send_runs_scripts_and_saves_state() {
    let workspace = temp_path("workspace.json");
    let state_out = temp_path("state-out.json");
    write_file(&workspace, WORKSPACE);
    let output = run(cli(&[
        "send",
        "--workspace",
        workspace.to_string_lossy().as_ref(),
        "--request-id",
        "2",
        "--env-name",
        "dev",
        "--state-out",
        state_out.to_string_lossy().as_ref(),
    ]))
    .expect("send should succeed");
    assert_eq!(output[0], "RESULT:OK");
    let response: serde_json::Value = serde_json::from_str(
        output[1]
            .strip_prefix("RESPONSE_JSON:")
            .expect("response line"),
    )
    .expect("response json");
    assert_eq!(response["status"], 200);
    assert_eq!(response["jasmineReport"]["status"], "passed");
    assert_eq!(output[2], r#"LOG_JSON:"[Request Script: 2 - dev] pre""#);

    let saved = load_workspace(state_out.to_string_lossy().as_ref()).expect("state should load");
    assert_eq!(saved.env_var(1, "dev", "pinged").as_deref(), Some("yes"));
}

#[test]
fn run_job_emits_script_result() {
    let workspace = temp_path("job-workspace.json");
    write_file(&workspace, WORKSPACE);
    let output = run(cli(&[
        "run-job",
        "--workspace",
        workspace.to_string_lossy().as_ref(),
        "--job-id",
        "3",
    ]))
    .expect("job should run");
    let result: serde_json::Value = serde_json::from_str(
        output[1]
            .strip_prefix("SCRIPT_RESULT_JSON:")
            .expect("result line"),
    )
    .expect("result json");
    assert_eq!(result["success"], true);
    assert_eq!(result["envName"], "dev");
}

#[test]
fn report_rejects_malformed_input() {
    let error = run(cli(&["report", "--suites", "nope", "--specs", "[]"]))
        .expect_err("report should fail");
    assert_eq!(error.code, "CLI_REPORT_INVALID");

    let output = run(cli(&[
        "report",
        "--suites",
        r#"[{"id": "suite1", "description": "s"}]"#,
        "--specs",
        r#"[{"id": "spec0", "parentSuiteId": "suite1", "status": "failed"}]"#,
    ]))
    .expect("report should parse");
    assert!(output[1].contains(r#""status":"failed""#));
}
