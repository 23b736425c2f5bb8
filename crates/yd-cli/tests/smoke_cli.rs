use std::process::Command;

#[test]
fn interpolate_prints_line_protocol() {
    let bin = env!("CARGO_BIN_EXE_yd-cli");
    let output = Command::new(bin)
        .arg("interpolate")
        .arg("--value")
        .arg(r#"{"uri": "${proto}://${host}", "n": 3}"#)
        .arg("--env")
        .arg(r#"{"proto": "https", "host": "example.org"}"#)
        .output()
        .expect("cli should execute");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines = stdout.lines().collect::<Vec<_>>();
    assert_eq!(
        lines,
        vec![
            "RESULT:OK",
            r#"VALUE_JSON:{"uri":"https://example.org","n":3}"#,
            "ERRORS_JSON:[]",
        ]
    );
}

#[test]
fn template_print_does_not_reach_stdout() {
    let bin = env!("CARGO_BIN_EXE_yd-cli");
    let output = Command::new(bin)
        .arg("interpolate")
        .arg("--value")
        .arg(r#"{"a": "[${print(\"leak\")}${debug(\"leak\")}]"}"#)
        .arg("--env")
        .arg("{}")
        .output()
        .expect("cli should execute");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("leak"), "stdout: {}", stdout);
    let lines = stdout.lines().collect::<Vec<_>>();
    assert_eq!(
        lines,
        vec!["RESULT:OK", r#"VALUE_JSON:{"a":"[]"}"#, "ERRORS_JSON:[]"]
    );
}

#[test]
fn missing_workspace_is_reported_as_error() {
    let bin = env!("CARGO_BIN_EXE_yd-cli");
    let output = Command::new(bin)
        .arg("send")
        .arg("--workspace")
        .arg("/definitely/missing/workspace.json")
        .arg("--request-id")
        .arg("1")
        .output()
        .expect("cli should execute");

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("RESULT:ERROR"));
    assert!(stdout.contains("ERROR_CODE:CLI_INPUT_NOT_FOUND"));
    assert!(stdout.contains("ERROR_MSG_JSON:"));
}
