use std::fmt::Debug;
use std::path::Path;
use std::rc::Rc;

use serde::Serialize;
use yd_api::{EchoTransport, RequestSender, SenderOptions, Workspace, WorkspaceFile};
use yd_core::{EnvData, InterpolationResult, RestResponse, TestReport, YaadeError};
use yd_interp::{interpolate_with, InterpolatorOptions};
use yd_sandbox::parse_report;

use crate::source::read_case;
use crate::{CaseCheck, ConformanceCase, ExpectedError, YdToolError};

/// What running a case produced, before comparison.
#[derive(Debug)]
pub enum Observed {
    Interpolation(InterpolationResult),
    Report(Option<TestReport>),
    Send {
        response: Result<RestResponse, YaadeError>,
        logs: Vec<String>,
        env: EnvData,
    },
}

pub fn run_case(case: &ConformanceCase) -> Result<Observed, YdToolError> {
    match &case.check {
        CaseCheck::Interpolate {
            value, env, seed, ..
        } => Ok(Observed::Interpolation(interpolate_with(
            value,
            env.as_ref(),
            InterpolatorOptions {
                random_seed: Some(seed.unwrap_or(1)),
                ..InterpolatorOptions::default()
            },
        ))),
        CaseCheck::Report { suites, specs, .. } => Ok(Observed::Report(parse_report(
            &to_json(suites)?,
            &to_json(specs)?,
        ))),
        CaseCheck::Send {
            workspace,
            request_id,
            env_name,
            ..
        } => {
            let file = serde_json::from_value::<WorkspaceFile>(workspace.clone()).map_err(
                |error| {
                    YdToolError::Engine(YaadeError::new(
                        "WORKSPACE_INVALID",
                        format!("Workspace JSON is invalid: {}", error),
                    ))
                },
            )?;
            let shared = Workspace::from_file(file).into_shared();
            let sender = RequestSender::new(
                Rc::clone(&shared),
                Rc::new(EchoTransport),
                SenderOptions {
                    random_seed: Some(1),
                    ..SenderOptions::default()
                },
            );
            let response = sender.send(*request_id, env_name.as_deref());
            let logs = sender
                .logs()
                .take()
                .into_iter()
                .map(|entry| entry.message)
                .collect();
            let workspace = shared.borrow();
            let env = workspace
                .request(*request_id)
                .and_then(|request| {
                    workspace.merged_env_data(request.collection_id, env_name.as_deref())
                })
                .unwrap_or_default();
            Ok(Observed::Send {
                response,
                logs,
                env,
            })
        }
    }
}

fn to_json(value: &impl Serialize) -> Result<String, YdToolError> {
    serde_json::to_string(value).map_err(YdToolError::Serialize)
}

fn expect_eq<T: PartialEq + Debug>(field: &str, expected: &T, actual: &T) -> Result<(), YdToolError> {
    if expected == actual {
        return Ok(());
    }
    Err(YdToolError::Mismatch {
        field: field.to_string(),
        expected: format!("{:?}", expected),
        actual: format!("{:?}", actual),
    })
}

pub fn assert_case(case_path: &Path) -> Result<(), YdToolError> {
    let case = read_case(case_path)?;
    let observed = run_case(&case)?;

    match (&case.check, observed) {
        (
            CaseCheck::Interpolate {
                expected_value,
                expected_errors,
                ..
            },
            Observed::Interpolation(outcome),
        ) => {
            if let Some(expected) = expected_value {
                expect_eq("value", expected, &outcome.result)?;
            }
            let actual = outcome
                .errors
                .iter()
                .zip(expected_errors.iter())
                .map(|(actual, expected)| ExpectedError {
                    key: actual.key.clone(),
                    value: expected.value.as_ref().map(|_| actual.value.clone()),
                })
                .collect::<Vec<_>>();
            expect_eq("errors.len", &expected_errors.len(), &outcome.errors.len())?;
            expect_eq("errors", expected_errors, &actual)
        }
        (
            CaseCheck::Report {
                expected_status,
                expected_root_ids,
                expected_spec_ids,
                expect_none,
                ..
            },
            Observed::Report(report),
        ) => {
            let Some(report) = report else {
                return expect_eq("report.present", &!expect_none, &false);
            };
            expect_eq("report.present", &!expect_none, &true)?;
            if let Some(status) = expected_status {
                expect_eq("report.status", status, &report.status)?;
            }
            if let Some(ids) = expected_root_ids {
                let roots = report
                    .suites
                    .iter()
                    .map(|suite| suite.id.clone())
                    .collect::<Vec<_>>();
                expect_eq("report.roots", ids, &roots)?;
            }
            if let Some(ids) = expected_spec_ids {
                let specs = report
                    .suites
                    .iter()
                    .flat_map(|suite| suite.specs.iter().map(|spec| spec.id.clone()))
                    .collect::<Vec<_>>();
                expect_eq("report.specs", ids, &specs)?;
            }
            Ok(())
        }
        (
            CaseCheck::Send {
                expected_uri,
                expected_error,
                expected_error_code,
                expected_env,
                expected_logs,
                expected_report_status,
                ..
            },
            Observed::Send {
                response,
                logs,
                env,
            },
        ) => {
            match response {
                Ok(response) => {
                    expect_eq("send.error", expected_error, &None)?;
                    if let Some(uri) = expected_uri {
                        let body = serde_json::from_str::<serde_json::Value>(&response.body)
                            .map_err(YdToolError::Serialize)?;
                        expect_eq("send.uri", &Some(uri.as_str()), &body["uri"].as_str())?;
                    }
                    if let Some(status) = expected_report_status {
                        let actual = response.test_report.as_ref().map(|report| report.status);
                        expect_eq("send.report", &Some(*status), &actual)?;
                    }
                }
                Err(error) => {
                    expect_eq("send.error", expected_error, &Some(error.message))?;
                    if let Some(code) = expected_error_code {
                        expect_eq("send.error_code", code, &error.code)?;
                    }
                }
            }
            for (key, value) in expected_env {
                expect_eq(
                    &format!("env.{}", key),
                    &Some(value.clone()),
                    &env.get(key).cloned(),
                )?;
            }
            if let Some(expected) = expected_logs {
                expect_eq("send.logs", expected, &logs)?;
            }
            Ok(())
        }
        (check, observed) => Err(YdToolError::Mismatch {
            field: "kind".to_string(),
            expected: check.kind_name().to_string(),
            actual: format!("{:?}", observed),
        }),
    }
}

#[cfg(test)]
mod runner_tests {
    use super::*;
    use serde_json::json;

    fn case(check: serde_json::Value) -> ConformanceCase {
        serde_json::from_value(json!({
            "schemaVersion": "yd-conformance.v1",
            "check": check
        }))
        .expect("case should deserialize")
    }

    #[test]
    fn run_case_interpolates_with_fixed_seed() {
        let observed = run_case(&case(json!({
            "kind": "interpolate",
            "value": {"a": "${x}-${x}"},
            "env": {"x": "1"}
        })))
        .expect("case should run");
        match observed {
            Observed::Interpolation(outcome) => {
                assert_eq!(outcome.result, json!({"a": "1-1"}));
                assert!(outcome.errors.is_empty());
            }
            other => panic!("unexpected observation {:?}", other),
        }
    }

    #[test]
    fn run_case_sends_through_echo_transport() {
        let observed = run_case(&case(json!({
            "kind": "send",
            "workspace": {
                "collections": [{"id": 1, "data": {"envs": {"dev": {"data": {"h": "x.test"}}}}}],
                "requests": [{"id": 2, "collectionId": 1, "data": {"uri": "${h}"}}]
            },
            "requestId": 2,
            "envName": "dev"
        })))
        .expect("case should run");
        match observed {
            Observed::Send { response, env, .. } => {
                let response = response.expect("send should work");
                assert!(response.body.contains("http://x.test"));
                assert_eq!(env["h"], "x.test");
            }
            other => panic!("unexpected observation {:?}", other),
        }
    }

    #[test]
    fn expect_eq_reports_mismatch() {
        let error = expect_eq("field", &1, &2).expect_err("should mismatch");
        assert_eq!(
            error.to_string(),
            "Mismatch in field. expected=1 actual=2"
        );
    }
}
