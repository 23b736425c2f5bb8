pub mod bindings;
pub mod harness;
pub mod jsonpath;
pub mod report;
mod sandbox;
pub mod scripts;

pub use bindings::{EnvAccess, EnvHandle, ExecFn, LogBuffer};
pub use harness::{HarnessRun, TestHarness};
pub use report::{build_report, parse_report};
pub use sandbox::{
    build_sandboxed_callable, call_sandboxed, check_script_syntax, error_message, sandbox_engine,
    Bindings, SandboxOptions, SandboxedCallable, TIMED_OUT,
};
pub use scripts::{
    execute_job_script, execute_request_script, execute_response_script, log_prefix, JobOutcome,
    ScriptHost, ScriptKind, ScriptLevel,
};
