use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{EnvData, ScriptResult, TestReport};

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KvRow {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default = "enabled_by_default")]
    pub is_enabled: bool,
}

impl KvRow {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            is_enabled: true,
        }
    }
}

/// Collapses header rows into a map; later rows win.
pub fn kv_rows_to_map(rows: &[KvRow]) -> BTreeMap<String, String> {
    rows.iter()
        .filter(|row| row.is_enabled)
        .map(|row| (row.key.clone(), row.value.clone()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthData {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub headers: Vec<KvRow>,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_script: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestRequest {
    pub id: i64,
    pub collection_id: i64,
    #[serde(default)]
    pub data: RequestData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestResponse {
    pub status: i64,
    #[serde(default)]
    pub headers: Vec<KvRow>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub time: u64,
    #[serde(
        default,
        rename = "jasmineReport",
        skip_serializing_if = "Option::is_none"
    )]
    pub test_report: Option<TestReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    #[serde(default)]
    pub data: EnvData,
    #[serde(default)]
    pub proxy: String,
    /// Values substituted for `$S{...}` on the server only.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: EnvData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_env_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionData {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub envs: BTreeMap<String, Environment>,
    #[serde(default)]
    pub headers: Vec<KvRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_script: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: i64,
    #[serde(default)]
    pub data: CollectionData,
}

fn default_store_max_results() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobScriptData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub script: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_env_name: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<i64>,
    /// Newest first.
    #[serde(default)]
    pub results: Vec<ScriptResult>,
    #[serde(default = "default_store_max_results")]
    pub store_max_results: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobScript {
    pub id: i64,
    pub collection_id: i64,
    pub data: JobScriptData,
}

#[cfg(test)]
mod model_tests {
    use super::*;

    #[test]
    fn kv_rows_to_map_skips_disabled_rows_and_keeps_last_value() {
        let mut disabled = KvRow::new("X-Skip", "1");
        disabled.is_enabled = false;
        let rows = vec![
            KvRow::new("Accept", "text/plain"),
            disabled,
            KvRow::new("Accept", "application/json"),
        ];
        let map = kv_rows_to_map(&rows);
        assert_eq!(map.len(), 1);
        assert_eq!(map["Accept"], "application/json");
    }

    #[test]
    fn collection_deserializes_from_persisted_shape() {
        let collection: Collection = serde_json::from_str(
            r#"{
  "id": 3,
  "data": {
    "name": "api",
    "envs": {
      "dev": {"data": {"host": "localhost"}, "proxy": "server", "parentEnvName": "base"}
    },
    "headers": [{"key": "Accept", "value": "*/*"}]
  }
}"#,
        )
        .expect("collection should deserialize");
        let env = &collection.data.envs["dev"];
        assert_eq!(env.data["host"], "localhost");
        assert_eq!(env.parent_env_name.as_deref(), Some("base"));
        assert!(collection.data.headers[0].is_enabled);
    }

    #[test]
    fn job_script_defaults_history_cap() {
        let job: JobScript = serde_json::from_str(
            r#"{"id": 1, "collectionId": 2, "data": {"script": "log(1);"}}"#,
        )
        .expect("job should deserialize");
        assert_eq!(job.data.store_max_results, 10);
        assert!(job.data.results.is_empty());
    }
}
