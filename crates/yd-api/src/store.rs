use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use yd_core::{
    AuthData, Collection, EnvData, JobScript, KvRow, RestRequest, ScriptResult, YaadeError,
};
use yd_sandbox::EnvAccess;

/// Serialized form of a [`Workspace`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceFile {
    #[serde(default)]
    pub collections: Vec<Collection>,
    #[serde(default)]
    pub requests: Vec<RestRequest>,
    #[serde(default)]
    pub jobs: Vec<JobScript>,
}

/// Collections, requests and job scripts of one user session.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    collections: BTreeMap<i64, Collection>,
    requests: BTreeMap<i64, RestRequest>,
    jobs: BTreeMap<i64, JobScript>,
    version: u64,
}

pub type SharedWorkspace = Rc<RefCell<Workspace>>;

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(file: WorkspaceFile) -> Self {
        let mut workspace = Self::new();
        for collection in file.collections {
            workspace.insert_collection(collection);
        }
        for request in file.requests {
            workspace.insert_request(request);
        }
        for job in file.jobs {
            workspace.insert_job(job);
        }
        workspace
    }

    pub fn from_json(text: &str) -> Result<Self, YaadeError> {
        let file = serde_json::from_str::<WorkspaceFile>(text).map_err(|error| {
            YaadeError::new(
                "WORKSPACE_INVALID",
                format!("Workspace JSON is invalid: {}", error),
            )
        })?;
        Ok(Self::from_file(file))
    }

    pub fn to_file(&self) -> WorkspaceFile {
        WorkspaceFile {
            collections: self.collections.values().cloned().collect(),
            requests: self.requests.values().cloned().collect(),
            jobs: self.jobs.values().cloned().collect(),
        }
    }

    pub fn into_shared(self) -> SharedWorkspace {
        Rc::new(RefCell::new(self))
    }

    pub fn insert_collection(&mut self, collection: Collection) {
        self.collections.insert(collection.id, collection);
    }

    pub fn insert_request(&mut self, request: RestRequest) {
        self.requests.insert(request.id, request);
    }

    pub fn insert_job(&mut self, job: JobScript) {
        self.jobs.insert(job.id, job);
    }

    pub fn collection(&self, id: i64) -> Option<&Collection> {
        self.collections.get(&id)
    }

    pub fn request(&self, id: i64) -> Option<&RestRequest> {
        self.requests.get(&id)
    }

    pub fn job(&self, id: i64) -> Option<&JobScript> {
        self.jobs.get(&id)
    }

    /// Incremented by every environment write.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The collection followed by its ancestors, nearest first. A cycle in
    /// the parent links ends the walk.
    pub fn parent_tree(&self, collection_id: i64) -> Vec<&Collection> {
        let mut tree = Vec::new();
        let mut seen = BTreeSet::new();
        let mut next = Some(collection_id);
        while let Some(id) = next {
            if !seen.insert(id) {
                warn!(collection_id, "collection parent chain loops back on itself");
                break;
            }
            let Some(collection) = self.collections.get(&id) else {
                break;
            };
            tree.push(collection);
            next = collection.data.parent_id;
        }
        tree
    }

    /// Variables of `env_name` merged with the environments it inherits
    /// from up the collection tree. Nearer environments win.
    pub fn merged_env_data(&self, collection_id: i64, env_name: Option<&str>) -> Option<EnvData> {
        let env_name = env_name.filter(|name| !name.is_empty())?;
        let collection = self.collections.get(&collection_id)?;
        collection.data.envs.get(env_name)?;

        let mut layers = Vec::new();
        let mut current = env_name.to_string();
        for collection in self.parent_tree(collection_id) {
            let Some(env) = collection.data.envs.get(&current) else {
                break;
            };
            layers.push(&env.data);
            match &env.parent_env_name {
                Some(parent) if !parent.is_empty() => current = parent.clone(),
                _ => break,
            }
        }

        let mut merged = EnvData::new();
        for layer in layers.into_iter().rev() {
            merged.extend(layer.iter().map(|(key, value)| (key.clone(), value.clone())));
        }
        Some(merged)
    }

    /// Secrets of the named environment of the collection itself.
    pub fn secrets(&self, collection_id: i64, env_name: Option<&str>) -> Option<EnvData> {
        let env_name = env_name?;
        self.collections
            .get(&collection_id)?
            .data
            .envs
            .get(env_name)
            .map(|env| env.secrets.clone())
    }

    /// Enabled headers of the collection tree (nearest first) followed by the
    /// request's own.
    pub fn merged_headers(&self, request: &RestRequest) -> Vec<KvRow> {
        self.parent_tree(request.collection_id)
            .into_iter()
            .flat_map(|collection| collection.data.headers.iter())
            .chain(request.data.headers.iter())
            .filter(|row| row.is_enabled)
            .cloned()
            .collect()
    }

    /// The request's auth when enabled, otherwise its collection's.
    pub fn effective_auth(&self, request: &RestRequest) -> Option<AuthData> {
        match &request.data.auth {
            Some(auth) if auth.enabled => Some(auth.clone()),
            _ => self
                .collections
                .get(&request.collection_id)
                .and_then(|collection| collection.data.auth.clone()),
        }
    }

    pub fn env_var(&self, collection_id: i64, env_name: &str, key: &str) -> Option<String> {
        self.merged_env_data(collection_id, Some(env_name))?
            .get(key)
            .cloned()
    }

    /// Writes one variable into the collection's own environment and
    /// returns the new workspace version.
    pub fn set_env_var(
        &mut self,
        collection_id: i64,
        env_name: &str,
        key: &str,
        value: &str,
    ) -> Result<u64, YaadeError> {
        let collection = self.collections.get_mut(&collection_id).ok_or_else(|| {
            YaadeError::new(
                "ENV_COLLECTION_NOT_FOUND",
                format!("Collection with id {} not found", collection_id),
            )
        })?;
        let env = collection.data.envs.get_mut(env_name).ok_or_else(|| {
            YaadeError::new(
                "ENV_NOT_FOUND",
                format!(
                    "Environment {} not found in collection {}",
                    env_name, collection_id
                ),
            )
        })?;
        env.data.insert(key.to_string(), value.to_string());
        self.version += 1;
        debug!(collection_id, env_name, key, version = self.version, "env var set");
        Ok(self.version)
    }

    /// Prepends `result` to the job's history, keeping at most
    /// `store_max_results` entries.
    pub fn record_result(&mut self, job_id: i64, result: ScriptResult) -> Result<(), YaadeError> {
        let job = self.jobs.get_mut(&job_id).ok_or_else(|| {
            YaadeError::new(
                "JOB_NOT_FOUND",
                format!("Script not found for id: {}", job_id),
            )
        })?;
        record_result(&mut job.data, result);
        Ok(())
    }
}

pub fn record_result(job: &mut yd_core::JobScriptData, result: ScriptResult) {
    job.last_run = Some(result.execution_time);
    job.results.insert(0, result);
    job.results.truncate(job.store_max_results.max(1));
}

/// `env` binding backed by a shared workspace.
pub struct WorkspaceEnv {
    workspace: SharedWorkspace,
    collection_id: i64,
    env_name: Option<String>,
}

impl WorkspaceEnv {
    pub fn new(workspace: SharedWorkspace, collection_id: i64, env_name: Option<String>) -> Self {
        Self {
            workspace,
            collection_id,
            env_name,
        }
    }
}

impl EnvAccess for WorkspaceEnv {
    fn get(&self, key: &str) -> Option<String> {
        let env_name = self.env_name.as_deref()?;
        self.workspace
            .borrow()
            .env_var(self.collection_id, env_name, key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), YaadeError> {
        let Some(env_name) = self.env_name.as_deref() else {
            warn!(key, "env.set ignored: no environment selected");
            return Ok(());
        };
        self.workspace
            .borrow_mut()
            .set_env_var(self.collection_id, env_name, key, value)
            .map(|_| ())
    }
}

#[cfg(test)]
mod store_tests {
    use super::*;
    use yd_core::{CollectionData, Environment, JobScriptData, RequestData};

    fn env(pairs: &[(&str, &str)], parent: Option<&str>) -> Environment {
        Environment {
            data: pairs
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            parent_env_name: parent.map(str::to_string),
            ..Environment::default()
        }
    }

    fn collection(id: i64, parent: Option<i64>, envs: Vec<(&str, Environment)>) -> Collection {
        Collection {
            id,
            data: CollectionData {
                name: format!("c{}", id),
                parent_id: parent,
                envs: envs
                    .into_iter()
                    .map(|(name, env)| (name.to_string(), env))
                    .collect(),
                ..CollectionData::default()
            },
        }
    }

    fn nested() -> Workspace {
        let mut workspace = Workspace::new();
        workspace.insert_collection(collection(
            1,
            None,
            vec![("base", env(&[("host", "root"), ("port", "80")], None))],
        ));
        workspace.insert_collection(collection(
            2,
            Some(1),
            vec![("dev", env(&[("host", "child")], Some("base")))],
        ));
        workspace
    }

    #[test]
    fn merged_env_data_lets_children_win() {
        let merged = nested()
            .merged_env_data(2, Some("dev"))
            .expect("env should exist");
        assert_eq!(merged["host"], "child");
        assert_eq!(merged["port"], "80");
    }

    #[test]
    fn merged_env_data_needs_a_name_and_a_local_env() {
        let workspace = nested();
        assert!(workspace.merged_env_data(2, None).is_none());
        assert!(workspace.merged_env_data(2, Some("base")).is_none());
        assert!(workspace.merged_env_data(9, Some("dev")).is_none());
    }

    #[test]
    fn parent_tree_stops_on_cycles() {
        let mut workspace = Workspace::new();
        workspace.insert_collection(collection(1, Some(2), Vec::new()));
        workspace.insert_collection(collection(2, Some(1), Vec::new()));
        let ids = workspace
            .parent_tree(1)
            .iter()
            .map(|collection| collection.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn merged_headers_skip_disabled_rows() {
        let mut workspace = nested();
        let mut parent = workspace.collection(1).cloned().expect("collection");
        let mut off = KvRow::new("X-Off", "1");
        off.is_enabled = false;
        parent.data.headers = vec![KvRow::new("X-Root", "r"), off];
        workspace.insert_collection(parent);
        let request = RestRequest {
            id: 5,
            collection_id: 2,
            data: RequestData {
                headers: vec![KvRow::new("Accept", "*/*")],
                ..RequestData::default()
            },
        };
        let keys = workspace
            .merged_headers(&request)
            .into_iter()
            .map(|row| row.key)
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["X-Root", "Accept"]);
    }

    #[test]
    fn set_env_var_bumps_version_and_is_last_write_wins() {
        let workspace = nested().into_shared();
        let access = WorkspaceEnv::new(workspace.clone(), 2, Some("dev".to_string()));
        access.set("token", "a").expect("set should work");
        access.set("token", "b").expect("set should work");
        assert_eq!(access.get("token").as_deref(), Some("b"));
        assert_eq!(workspace.borrow().version(), 2);

        let missing = WorkspaceEnv::new(workspace.clone(), 2, Some("prod".to_string()));
        let error = missing.set("x", "1").expect_err("unknown env should fail");
        assert_eq!(error.code, "ENV_NOT_FOUND");

        let unselected = WorkspaceEnv::new(workspace.clone(), 2, None);
        unselected.set("x", "1").expect("no env is a no-op");
        assert_eq!(workspace.borrow().version(), 2);
    }

    #[test]
    fn record_result_keeps_newest_first_up_to_the_cap() {
        let mut job = JobScriptData {
            name: "nightly".to_string(),
            script: String::new(),
            selected_env_name: None,
            enabled: true,
            last_run: None,
            results: Vec::new(),
            store_max_results: 2,
        };
        for time in 1..=3 {
            record_result(
                &mut job,
                ScriptResult {
                    success: true,
                    execution_time: time,
                    test_report: None,
                    logs: Vec::new(),
                    error: None,
                    env_name: None,
                },
            );
        }
        let times = job
            .results
            .iter()
            .map(|result| result.execution_time)
            .collect::<Vec<_>>();
        assert_eq!(times, vec![3, 2]);
        assert_eq!(job.last_run, Some(3));
    }

    #[test]
    fn workspace_loads_from_json() {
        let workspace = Workspace::from_json(
            r#"{"collections": [{"id": 1, "data": {"envs": {"dev": {"data": {"a": "1"}}}}}],
                "requests": [{"id": 4, "collectionId": 1, "data": {"uri": "${a}"}}]}"#,
        )
        .expect("workspace should load");
        assert_eq!(workspace.request(4).map(|r| r.data.uri.as_str()), Some("${a}"));
        assert_eq!(workspace.env_var(1, "dev", "a").as_deref(), Some("1"));
        assert_eq!(
            Workspace::from_json("[]").expect_err("should fail").code,
            "WORKSPACE_INVALID"
        );
    }
}
