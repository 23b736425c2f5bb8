use clap::{Args, Parser, Subcommand};

/// JSON arguments accept either inline JSON or `@path` to read a file.
#[derive(Debug, Parser)]
#[command(name = "yd-cli")]
#[command(about = "Template interpolation, request scripts and test reports")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Mode,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Mode {
    Interpolate(InterpolateArgs),
    Send(SendArgs),
    RunJob(RunJobArgs),
    Report(ReportArgs),
}

#[derive(Debug, Args)]
pub(crate) struct InterpolateArgs {
    #[arg(long = "value")]
    pub(crate) value: String,
    #[arg(long = "env")]
    pub(crate) env: Option<String>,
    #[arg(long = "seed")]
    pub(crate) seed: Option<u32>,
}

#[derive(Debug, Args)]
pub(crate) struct SendArgs {
    #[arg(long = "workspace")]
    pub(crate) workspace: String,
    #[arg(long = "request-id")]
    pub(crate) request_id: i64,
    #[arg(long = "env-name")]
    pub(crate) env_name: Option<String>,
    #[arg(long = "seed")]
    pub(crate) seed: Option<u32>,
    #[arg(long = "state-out")]
    pub(crate) state_out: Option<String>,
}

#[derive(Debug, Args)]
pub(crate) struct RunJobArgs {
    #[arg(long = "workspace")]
    pub(crate) workspace: String,
    #[arg(long = "job-id")]
    pub(crate) job_id: i64,
    #[arg(long = "timeout-ms")]
    pub(crate) timeout_ms: Option<u64>,
    #[arg(long = "seed")]
    pub(crate) seed: Option<u32>,
    #[arg(long = "state-out")]
    pub(crate) state_out: Option<String>,
}

#[derive(Debug, Args)]
pub(crate) struct ReportArgs {
    #[arg(long = "suites")]
    pub(crate) suites: String,
    #[arg(long = "specs")]
    pub(crate) specs: String,
}
