mod app;
mod cli;
mod comparison;
mod error;
mod model_download;
mod pipeline;
mod types;

use std::{
    env,
    ffi::OsString,
    panic::{self, UnwindSafe},
    process::ExitCode,
};

use anyhow::Result;
use clap::{Parser, error::ErrorKind};

use cli::{Args, DemoConfig};

const INTERNAL_ERROR: &str = "[ ERROR ] Unknown/internal exception happened.";

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure(String),
}

fn main() -> ExitCode {
    env_logger::init();

    println!(
        "{} v{} (ONNX Runtime backend)",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    match execute(env::args_os().collect()) {
        Outcome::Success => ExitCode::SUCCESS,
        Outcome::Failure(line) => {
            eprintln!("{line}");
            ExitCode::FAILURE
        }
    }
}

fn execute(argv: Vec<OsString>) -> Outcome {
    guarded(move || run_demo(argv))
}

/// Runs `job`, turning both errors and panics into a `[ ERROR ]` line.
fn guarded<F>(job: F) -> Outcome
where
    F: FnOnce() -> Result<()> + UnwindSafe,
{
    match panic::catch_unwind(job) {
        Ok(Ok(())) => Outcome::Success,
        Ok(Err(err)) => Outcome::Failure(format!("[ ERROR ] {err:#}")),
        Err(_) => Outcome::Failure(INTERNAL_ERROR.to_string()),
    }
}

fn run_demo(argv: Vec<OsString>) -> Result<()> {
    let args = match Args::try_parse_from(argv) {
        Ok(args) => args,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.print()?;
            if err.kind() == ErrorKind::DisplayHelp {
                println!("\nAvailable target devices: {}", available_devices());
            }
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    println!("Parsing input parameters");
    let config = DemoConfig::from_args(args)?;
    log::info!("running on {} with model {}", config.device, config.model);

    app::run(&config)?;

    println!("Execution successful");
    Ok(())
}

fn available_devices() -> &'static str {
    if cfg!(feature = "cuda") { "CPU CUDA" } else { "CPU" }
}
