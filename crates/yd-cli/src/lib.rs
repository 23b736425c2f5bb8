use std::ffi::OsString;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use yd_core::YaadeError;

mod cli_args;
mod commands;
mod error_map;
mod source_loader;

pub(crate) use cli_args::{Cli, InterpolateArgs, Mode, ReportArgs, RunJobArgs, SendArgs};
pub(crate) use commands::Output;
pub(crate) use error_map::{
    emit_error, json_text, map_cli_input_invalid, map_cli_input_read, map_cli_state_write,
};
pub(crate) use source_loader::{load_workspace, parse_json_arg, read_json_arg, save_workspace};

/// Logs go to stderr so stdout carries only the line protocol.
fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

pub fn run_cli_from_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return error.exit_code();
        }
    };
    init_tracing();
    match run(cli) {
        Ok(lines) => {
            for line in lines {
                println!("{}", line);
            }
            0
        }
        Err(error) => emit_error(error),
    }
}

fn run(cli: Cli) -> Result<Output, YaadeError> {
    match cli.command {
        Mode::Interpolate(args) => commands::run_interpolate(args),
        Mode::Send(args) => commands::run_send(args),
        Mode::RunJob(args) => commands::run_job(args),
        Mode::Report(args) => commands::run_report(args),
    }
}

#[cfg(test)]
mod tests;
