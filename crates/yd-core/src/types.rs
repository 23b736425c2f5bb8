use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Flat variable set of one named environment.
pub type EnvData = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpolationError {
    pub key: String,
    pub value: String,
}

impl InterpolationError {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Output of a full interpolation pass. `result` has the same shape as the
/// input; it is only trustworthy when `errors` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolationResult {
    pub result: Value,
    pub errors: Vec<InterpolationError>,
}

impl InterpolationResult {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptLog {
    pub time: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptResult {
    pub success: bool,
    pub execution_time: i64,
    #[serde(
        default,
        rename = "jasmineReport",
        skip_serializing_if = "Option::is_none"
    )]
    pub test_report: Option<TestReport>,
    #[serde(default)]
    pub logs: Vec<ScriptLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    #[default]
    Passed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecStatus {
    #[default]
    Passed,
    Failed,
    Pending,
    Excluded,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedExpectation {
    #[serde(default)]
    pub matcher_name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub passed: bool,
}

/// Flat spec entry as emitted by the test harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecRecord {
    pub id: String,
    #[serde(default)]
    pub parent_suite_id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub status: SpecStatus,
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub failed_expectations: Vec<FailedExpectation>,
}

/// Flat suite entry as emitted by the test harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteRecord {
    pub id: String,
    #[serde(default)]
    pub parent_suite_id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuite {
    pub id: String,
    pub description: String,
    pub full_name: String,
    pub duration: u64,
    pub status: TestStatus,
    pub specs: Vec<SpecRecord>,
    pub children: Vec<TestSuite>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub suites: Vec<TestSuite>,
    pub status: TestStatus,
}
