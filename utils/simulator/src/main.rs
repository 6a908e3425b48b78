use std::process::ExitCode;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use cosim::{
    BUILTIN_MODELS, Bus, CancelToken, ModelDescriptor, RunConfig, RunError, RunResult, Scheduler,
    Termination,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cosim-driver")]
#[command(about = "Steps hardware models in lockstep until one of them finishes")]
#[command(version)]
struct Args {
    /// YAML run config listing the models in stepping order
    #[arg(value_name = "CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Model kind to append after the config's models (repeatable)
    #[arg(short, long = "model", value_name = "KIND")]
    models: Vec<String>,

    /// Stop after this many rounds; runs are unbounded by default
    #[arg(long, value_parser = parse_rounds)]
    max_rounds: Option<u64>,

    /// List available models and exit
    #[arg(long)]
    list_models: bool,
}

fn parse_rounds(s: &str) -> Result<u64, String> {
    match cosim::parse_hex(s) {
        Ok(0) => Err("must be at least 1".into()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

const EXIT_SUCCESS: u8 = 0;
const EXIT_FAILURE: u8 = 1;
/// Round limit hit before any model signaled done.
const EXIT_ROUND_LIMIT: u8 = 2;
/// 128 + SIGINT
const EXIT_CANCELLED: u8 = 130;

/// Process exit status for the outcome of a run.
fn exit_status(outcome: &Result<RunResult, RunError>) -> u8 {
    match outcome {
        Ok(result) => match result.termination {
            Termination::Finished { .. } => EXIT_SUCCESS,
            Termination::RoundLimit => EXIT_ROUND_LIMIT,
            Termination::Cancelled => EXIT_CANCELLED,
        },
        Err(_) => EXIT_FAILURE,
    }
}

static CANCEL: OnceLock<CancelToken> = OnceLock::new();

#[cfg(unix)]
extern "C" fn on_sigint(_: libc::c_int) {
    if let Some(token) = CANCEL.get() {
        token.cancel();
    }
}

#[cfg(unix)]
fn install_sigint_handler(token: CancelToken) {
    let _ = CANCEL.set(token);
    let handler: extern "C" fn(libc::c_int) = on_sigint;
    // SAFETY: the handler only performs an atomic store.
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }
}

#[cfg(not(unix))]
fn install_sigint_handler(_token: CancelToken) {}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Args::parse()) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    if args.list_models {
        println!("Available models:");
        for (kind, about) in BUILTIN_MODELS {
            println!("  - {kind:<14} {about}");
        }
        return Ok(ExitCode::from(EXIT_SUCCESS));
    }

    let mut config = match &args.config {
        Some(path) => {
            RunConfig::load(path).with_context(|| format!("Failed to load run config {path}"))?
        }
        None => RunConfig::default(),
    };
    config
        .models
        .extend(args.models.iter().map(ModelDescriptor::new));
    if args.max_rounds.is_some() {
        config.max_rounds = args.max_rounds;
    }
    if config.models.is_empty() {
        anyhow::bail!("No models given; pass a CONFIG file or --model KIND");
    }

    let bus = Bus::new();
    let mut scheduler =
        Scheduler::from_config(&config, &bus).context("Failed to construct co-simulation")?;
    install_sigint_handler(scheduler.cancel_token());
    let names: Vec<String> = scheduler
        .handles()
        .iter()
        .map(|handle| handle.name().to_owned())
        .collect();

    let outcome = scheduler.run();
    let status = exit_status(&outcome);
    let result = match outcome {
        Ok(result) => result,
        Err(RunError::Step { source, teardown }) => {
            if let Some(teardown) = teardown {
                error!("{teardown}");
            }
            return Err(anyhow::Error::new(source).context("Simulation aborted"));
        }
        Err(e) => return Err(anyhow::Error::new(e).context("Simulation failed")),
    };

    match &result.termination {
        Termination::Finished { by } => {
            let by: Vec<&str> = by.iter().map(|&id| names[id].as_str()).collect();
            info!(rounds = result.rounds, "finished by {}", by.join(", "));
        }
        Termination::RoundLimit => info!(rounds = result.rounds, "round limit reached"),
        Termination::Cancelled => info!(rounds = result.rounds, "interrupted"),
    }
    Ok(ExitCode::from(status))
}
