use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;
use yd_api::{EchoTransport, RequestSender, RunnerOptions, ScriptRunner, SenderOptions};
use yd_core::{EnvData, YaadeError};
use yd_interp::{interpolate_with, InterpolatorOptions};
use yd_sandbox::parse_report;

use crate::{
    json_text, load_workspace, parse_json_arg, read_json_arg, save_workspace, InterpolateArgs,
    ReportArgs, RunJobArgs, SendArgs,
};

/// Lines written to stdout on success.
pub(crate) type Output = Vec<String>;

fn json_line(label: &str, value: &impl Serialize) -> Result<String, YaadeError> {
    Ok(format!("{}_JSON:{}", label, json_text(value)?))
}

pub(crate) fn run_interpolate(args: InterpolateArgs) -> Result<Output, YaadeError> {
    let value = parse_json_arg::<serde_json::Value>(&args.value)?;
    let env = args
        .env
        .as_deref()
        .map(parse_json_arg::<EnvData>)
        .transpose()?;
    let outcome = interpolate_with(
        &value,
        env.as_ref(),
        InterpolatorOptions {
            random_seed: args.seed,
            ..InterpolatorOptions::default()
        },
    );
    debug!(errors = outcome.errors.len(), "interpolated");
    Ok(vec![
        "RESULT:OK".to_string(),
        json_line("VALUE", &outcome.result)?,
        json_line("ERRORS", &outcome.errors)?,
    ])
}

fn log_lines(sender: &RequestSender) -> Result<Output, YaadeError> {
    sender
        .logs()
        .take()
        .iter()
        .map(|entry| json_line("LOG", &entry.message))
        .collect()
}

pub(crate) fn run_send(args: SendArgs) -> Result<Output, YaadeError> {
    let workspace = load_workspace(&args.workspace)?.into_shared();
    let sender = RequestSender::new(
        Rc::clone(&workspace),
        Rc::new(EchoTransport),
        SenderOptions {
            random_seed: args.seed,
            ..SenderOptions::default()
        },
    );
    let outcome = sender.send(args.request_id, args.env_name.as_deref());
    let logs = log_lines(&sender)?;
    let response = outcome?;

    if let Some(path) = &args.state_out {
        save_workspace(Path::new(path), &workspace.borrow())?;
    }
    let mut output = vec!["RESULT:OK".to_string(), json_line("RESPONSE", &response)?];
    output.extend(logs);
    Ok(output)
}

pub(crate) fn run_job(args: RunJobArgs) -> Result<Output, YaadeError> {
    let workspace = load_workspace(&args.workspace)?.into_shared();
    let sender = RequestSender::new(
        Rc::clone(&workspace),
        Rc::new(EchoTransport),
        SenderOptions {
            random_seed: args.seed,
            ..SenderOptions::default()
        },
    );
    let mut options = RunnerOptions::default();
    if let Some(timeout_ms) = args.timeout_ms {
        options.timeout = Duration::from_millis(timeout_ms);
    }
    let runner = ScriptRunner::new(sender, options);
    let result = runner.run_job(args.job_id)?;

    if let Some(path) = &args.state_out {
        save_workspace(Path::new(path), &workspace.borrow())?;
    }
    Ok(vec![
        "RESULT:OK".to_string(),
        json_line("SCRIPT_RESULT", &result)?,
    ])
}

pub(crate) fn run_report(args: ReportArgs) -> Result<Output, YaadeError> {
    let suites = read_json_arg(&args.suites)?;
    let specs = read_json_arg(&args.specs)?;
    let report = parse_report(&suites, &specs).ok_or_else(|| {
        YaadeError::new(
            "CLI_REPORT_INVALID",
            "Suites or specs are not valid test report JSON",
        )
    })?;
    Ok(vec!["RESULT:OK".to_string(), json_line("REPORT", &report)?])
}
