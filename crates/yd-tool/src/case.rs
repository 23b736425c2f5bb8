use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use yd_core::{EnvData, TestStatus};

pub const CONFORMANCE_SCHEMA_V1: &str = "yd-conformance.v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConformanceCase {
    pub schema_version: String,
    #[serde(default)]
    pub description: String,
    pub check: CaseCheck,
}

/// An expected interpolation error. `value` is only compared when given,
/// since evaluation messages come from the expression engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedError {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CaseCheck {
    #[serde(rename_all = "camelCase")]
    Interpolate {
        value: Value,
        #[serde(default)]
        env: Option<EnvData>,
        #[serde(default)]
        seed: Option<u32>,
        #[serde(default)]
        expected_value: Option<Value>,
        #[serde(default)]
        expected_errors: Vec<ExpectedError>,
    },
    #[serde(rename_all = "camelCase")]
    Report {
        suites: Value,
        specs: Value,
        #[serde(default)]
        expected_status: Option<TestStatus>,
        #[serde(default)]
        expected_root_ids: Option<Vec<String>>,
        #[serde(default)]
        expected_spec_ids: Option<Vec<String>>,
        #[serde(default)]
        expect_none: bool,
    },
    /// Sends `request_id` from `workspace` through an echo transport.
    #[serde(rename_all = "camelCase")]
    Send {
        workspace: Value,
        request_id: i64,
        #[serde(default)]
        env_name: Option<String>,
        #[serde(default)]
        expected_uri: Option<String>,
        #[serde(default)]
        expected_error: Option<String>,
        #[serde(default)]
        expected_error_code: Option<String>,
        #[serde(default)]
        expected_env: BTreeMap<String, String>,
        #[serde(default)]
        expected_logs: Option<Vec<String>>,
        #[serde(default)]
        expected_report_status: Option<TestStatus>,
    },
}

impl CaseCheck {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Interpolate { .. } => "interpolate",
            Self::Report { .. } => "report",
            Self::Send { .. } => "send",
        }
    }
}
