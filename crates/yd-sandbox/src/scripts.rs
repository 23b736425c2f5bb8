use std::rc::Rc;

use tracing::{debug, info_span};
use yd_core::{RestRequest, RestResponse, TestReport, YaadeError};
use yd_interp::host::RandomSource;

use crate::bindings::{
    base_bindings, register_host_functions, request_value, response_value, EnvAccess, EnvHandle,
    ExecFn, HostFunctions, LogBuffer,
};
use crate::harness::TestHarness;
use crate::sandbox::{build_sandboxed_callable, sandbox_engine, SandboxOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLevel {
    Request,
    Collection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Request,
    Response,
}

impl ScriptKind {
    fn label(self) -> &'static str {
        match self {
            ScriptKind::Request => "Request",
            ScriptKind::Response => "Response",
        }
    }

    fn error_prefix(self, request_id: i64) -> String {
        format!(
            "Error in {} script [id: {}]: ",
            self.label().to_ascii_lowercase(),
            request_id
        )
    }
}

/// Everything a script can reach outside its own text.
#[derive(Clone)]
pub struct ScriptHost {
    pub env: Rc<dyn EnvAccess>,
    pub env_name: Option<String>,
    pub exec: Option<ExecFn>,
    pub logs: LogBuffer,
    pub options: SandboxOptions,
    pub random_seed: Option<u32>,
}

impl ScriptHost {
    pub fn new(env: Rc<dyn EnvAccess>, env_name: Option<String>) -> Self {
        Self {
            env,
            env_name,
            exec: None,
            logs: LogBuffer::new(),
            options: SandboxOptions::default(),
            random_seed: None,
        }
    }

    fn random(&self) -> RandomSource {
        self.random_seed
            .map(RandomSource::new)
            .unwrap_or_else(RandomSource::auto_seeded)
    }

    fn env_handle(&self) -> EnvHandle {
        EnvHandle::new(Rc::clone(&self.env), self.env_name.clone())
    }
}

pub fn log_prefix(
    kind: ScriptKind,
    level: ScriptLevel,
    request: &RestRequest,
    env_name: Option<&str>,
) -> String {
    let env = env_name.unwrap_or("NO_ENV");
    match level {
        ScriptLevel::Request => format!("[{} Script: {} - {}]", kind.label(), request.id, env),
        ScriptLevel::Collection => format!(
            "[Collection {} Script: {} - {}]",
            kind.label(),
            request.collection_id,
            env
        ),
    }
}

/// Prefixes a script failure with its origin unless a nested script already did.
fn prefixed(kind: ScriptKind, request_id: i64, error: YaadeError) -> YaadeError {
    if error.message.starts_with("Error in request script")
        || error.message.starts_with("Error in response script")
    {
        return error;
    }
    YaadeError::new(
        error.code,
        format!("{}{}", kind.error_prefix(request_id), error.message),
    )
}

pub fn execute_request_script(
    request: &RestRequest,
    script: &str,
    host: &ScriptHost,
    level: ScriptLevel,
) -> Result<(), YaadeError> {
    let span = info_span!("request_script", request_id = request.id, ?level);
    let _guard = span.enter();

    let mut engine = sandbox_engine();
    register_host_functions(
        &mut engine,
        &HostFunctions {
            logs: host.logs.clone(),
            log_prefix: log_prefix(
                ScriptKind::Request,
                level,
                request,
                host.env_name.as_deref(),
            ),
            exec: host.exec.clone(),
        },
    );
    let mut bindings = base_bindings(host.env_handle(), host.random());
    bindings.push(("req".to_string(), request_value(&request.data)));

    build_sandboxed_callable(engine, bindings, script, &host.options)
        .and_then(|callable| callable.call())
        .map(|_| debug!("request script finished"))
        .map_err(|error| prefixed(ScriptKind::Request, request.id, error))
}

/// Runs a response script and returns its test report, if it declared any tests.
pub fn execute_response_script(
    request: &RestRequest,
    response: &RestResponse,
    script: &str,
    host: &ScriptHost,
    level: ScriptLevel,
) -> Result<Option<TestReport>, YaadeError> {
    let span = info_span!("response_script", request_id = request.id, ?level);
    let _guard = span.enter();

    let mut engine = sandbox_engine();
    register_host_functions(
        &mut engine,
        &HostFunctions {
            logs: host.logs.clone(),
            log_prefix: log_prefix(
                ScriptKind::Response,
                level,
                request,
                host.env_name.as_deref(),
            ),
            exec: host.exec.clone(),
        },
    );
    let harness = TestHarness::new();
    harness.register(&mut engine);
    let mut bindings = base_bindings(host.env_handle(), host.random());
    bindings.push(("res".to_string(), response_value(response)));

    let callable = build_sandboxed_callable(engine, bindings, script, &host.options)
        .map_err(|error| prefixed(ScriptKind::Response, request.id, error))?;
    callable
        .call()
        .map_err(|error| prefixed(ScriptKind::Response, request.id, error))?;
    let run = harness.run(callable.engine(), callable.ast());
    debug!(specs = run.specs.len(), "response script finished");
    Ok(run.into_report())
}

/// Result of a standalone job script. The report is kept even when the
/// script body failed part way.
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    pub report: Option<TestReport>,
    pub error: Option<String>,
}

pub fn execute_job_script(job_id: i64, script: &str, host: &ScriptHost) -> JobOutcome {
    let span = info_span!("job_script", job_id);
    let _guard = span.enter();

    let mut engine = sandbox_engine();
    register_host_functions(
        &mut engine,
        &HostFunctions {
            logs: host.logs.clone(),
            log_prefix: format!(
                "[Job Script: {} - {}]",
                job_id,
                host.env_name.as_deref().unwrap_or("NO_ENV")
            ),
            exec: host.exec.clone(),
        },
    );
    let harness = TestHarness::new();
    harness.register(&mut engine);
    let bindings = base_bindings(host.env_handle(), host.random());

    let callable = match build_sandboxed_callable(engine, bindings, script, &host.options) {
        Ok(callable) => callable,
        Err(error) => {
            return JobOutcome {
                report: None,
                error: Some(error.message),
            }
        }
    };
    let error = callable.call().err().map(|error| error.message);
    let report = harness.run(callable.engine(), callable.ast()).into_report();
    JobOutcome { report, error }
}
