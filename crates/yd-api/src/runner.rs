//! Standalone job scripts: run once with env, exec, log and test bindings and
//! always produce a [`ScriptResult`].

use std::rc::Rc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use yd_core::{JobScript, ScriptResult, YaadeError};
use yd_sandbox::{execute_job_script, SandboxOptions};

use crate::sender::RequestSender;

pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub timeout: Duration,
    pub sandbox: SandboxOptions,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SCRIPT_TIMEOUT,
            sandbox: SandboxOptions::default(),
        }
    }
}

pub struct ScriptRunner {
    sender: Rc<RequestSender>,
    options: RunnerOptions,
}

impl ScriptRunner {
    /// Requests sent through `exec` go through `sender`, which also owns the
    /// workspace the job reads and writes.
    pub fn new(sender: Rc<RequestSender>, options: RunnerOptions) -> Self {
        Self { sender, options }
    }

    pub fn run(&self, job: &JobScript) -> ScriptResult {
        let env_name = job.data.selected_env_name.clone();
        let sandbox = SandboxOptions {
            timeout: Some(self.options.timeout),
            ..self.options.sandbox.clone()
        };
        // Logs of requests sent through `exec` land in the same buffer.
        let host = self
            .sender
            .host_for(job.collection_id, env_name.as_deref(), 0, sandbox);
        host.logs.take();

        let outcome = execute_job_script(job.id, &job.data.script, &host);
        if let Some(error) = &outcome.error {
            warn!(job_id = job.id, %error, "job script failed");
        } else {
            info!(job_id = job.id, "job script finished");
        }

        ScriptResult {
            success: outcome.error.is_none(),
            execution_time: Utc::now().timestamp_millis(),
            test_report: outcome.report,
            logs: host.logs.take(),
            error: outcome.error,
            env_name,
        }
    }

    /// Runs the stored job and records the result in its history.
    pub fn run_job(&self, job_id: i64) -> Result<ScriptResult, YaadeError> {
        let job = self.sender.workspace().borrow().job(job_id).cloned();
        let job = job.ok_or_else(|| {
            YaadeError::new(
                "JOB_NOT_FOUND",
                format!("Script not found for id: {}", job_id),
            )
        })?;
        let result = self.run(&job);
        self.sender
            .workspace()
            .borrow_mut()
            .record_result(job_id, result.clone())?;
        Ok(result)
    }
}

#[cfg(test)]
mod runner_tests {
    use super::*;
    use yd_core::{
        Collection, CollectionData, Environment, JobScriptData, KvRow, RestRequest, RequestData,
        TestStatus,
    };
    use yd_sandbox::TIMED_OUT;

    use crate::sender::{EchoTransport, SenderOptions};
    use crate::store::Workspace;

    fn job(id: i64, script: &str) -> JobScript {
        JobScript {
            id,
            collection_id: 1,
            data: JobScriptData {
                name: "job".to_string(),
                script: script.to_string(),
                selected_env_name: Some("dev".to_string()),
                enabled: true,
                last_run: None,
                results: Vec::new(),
                store_max_results: 10,
            },
        }
    }

    fn runner(jobs: Vec<JobScript>, options: RunnerOptions) -> ScriptRunner {
        let mut workspace = Workspace::new();
        let mut env = Environment::default();
        env.data.insert("host".to_string(), "api.test".to_string());
        workspace.insert_collection(Collection {
            id: 1,
            data: CollectionData {
                envs: [("dev".to_string(), env)].into_iter().collect(),
                ..CollectionData::default()
            },
        });
        workspace.insert_request(RestRequest {
            id: 5,
            collection_id: 1,
            data: RequestData {
                uri: "${host}/health".to_string(),
                method: "GET".to_string(),
                headers: vec![KvRow::new("Accept", "application/json")],
                ..RequestData::default()
            },
        });
        for job in jobs {
            workspace.insert_job(job);
        }
        let sender = RequestSender::new(
            workspace.into_shared(),
            Rc::new(EchoTransport),
            SenderOptions::default(),
        );
        ScriptRunner::new(sender, options)
    }

    #[test]
    fn job_with_exec_and_tests_succeeds() {
        let runner = runner(Vec::new(), RunnerOptions::default());
        let result = runner.run(&job(
            1,
            r#"
let res = exec(5, "dev");
log(res.status);
describe("health", || {
    it("is up", || { expect(jp("$.uri", res.body)).to_be("http://api.test/health"); });
});
"#,
        ));
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.env_name.as_deref(), Some("dev"));
        assert_eq!(result.logs[0].message, "[Job Script: 1 - dev] 200");
        let report = result.test_report.expect("report");
        assert_eq!(report.status, TestStatus::Passed);
    }

    #[test]
    fn runaway_job_times_out() {
        let runner = runner(
            Vec::new(),
            RunnerOptions {
                timeout: Duration::from_millis(30),
                ..RunnerOptions::default()
            },
        );
        let result = runner.run(&job(1, "loop {}"));
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(TIMED_OUT));
    }

    #[test]
    fn run_job_records_history() {
        let runner = runner(
            vec![job(3, r#"env.set("seen", "yes");"#)],
            RunnerOptions::default(),
        );
        runner.run_job(3).expect("job should run");
        runner.run_job(3).expect("job should run");
        let workspace = runner.sender.workspace().borrow();
        let stored = workspace.job(3).expect("job");
        assert_eq!(stored.data.results.len(), 2);
        assert!(stored.data.last_run.is_some());
        assert_eq!(workspace.env_var(1, "dev", "seen").as_deref(), Some("yes"));
        drop(workspace);

        let error = runner.run_job(42).expect_err("unknown job");
        assert_eq!(error.code, "JOB_NOT_FOUND");
    }
}
