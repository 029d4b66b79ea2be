//! dispatchd - multi-turn task dispatch controller
//!
//! Reads one task request as JSON, drives the worker through its turns and
//! prints the execution result as JSON on stdout. Logs go to stderr.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::io::Read;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use dispatch_core::{ControllerConfig, ExecutionResult, TaskRequest};
use eyre::WrapErr;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "dispatchd", about = "Multi-turn task dispatch controller", version)]
struct Cli {
    /// Config file (key=value). Defaults to ~/.config/dispatchd/config if present.
    #[arg(long, global = true, env = "DISPATCHD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a single task request
    Run {
        /// Request JSON file; `-` or absent reads stdin
        #[arg(long)]
        request: Option<PathBuf>,

        /// Worker CLI binary (overrides config)
        #[arg(long, env = "DISPATCHD_WORKER_BIN")]
        worker_bin: Option<PathBuf>,

        /// Worker gateway address (overrides config)
        #[arg(long, env = "DISPATCHD_GATEWAY")]
        gateway: Option<String>,

        /// Do not probe the gateway before the first turn
        #[arg(long)]
        skip_readiness: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            error!("{err:#}");
            std::process::exit(1);
        }
    }
}

/// Returns whether the task succeeded.
fn run(cli: Cli) -> eyre::Result<bool> {
    let Command::Run {
        request,
        worker_bin,
        gateway,
        skip_readiness,
    } = cli.command;

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(worker_bin) = worker_bin {
        config.worker_bin = worker_bin;
    }
    if let Some(gateway) = gateway {
        config.gateway_addr = gateway;
    }

    let body = read_request(request.as_deref())?;
    let request = match TaskRequest::from_json(&body) {
        Ok(request) => request,
        Err(err) => {
            error!(error = %err, "invalid task request");
            print_result(&ExecutionResult::failed_before_start(
                format!("invalid request: {err}"),
                0,
            ))?;
            return Ok(false);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("failed to create tokio runtime")?;

    let controller = dispatchd::controller_from_config(&config, skip_readiness);
    let result = runtime.block_on(controller.execute(&request));
    print_result(&result)?;
    Ok(result.success)
}

fn load_config(explicit: Option<&Path>) -> eyre::Result<ControllerConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => dispatchd::default_config_path().filter(|p| p.exists()),
    };
    match path {
        Some(path) => {
            info!(path = %path.display(), "loading config");
            ControllerConfig::from_file(&path)
                .wrap_err_with(|| format!("failed to load config {}", path.display()))
        }
        None => Ok(ControllerConfig::default()),
    }
}

fn read_request(path: Option<&Path>) -> eyre::Result<String> {
    match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read request {}", path.display())),
        _ => {
            let mut body = String::new();
            std::io::stdin()
                .read_to_string(&mut body)
                .wrap_err("failed to read request from stdin")?;
            Ok(body)
        }
    }
}

fn print_result(result: &ExecutionResult) -> eyre::Result<()> {
    let json = serde_json::to_string(result).wrap_err("failed to encode result")?;
    println!("{json}");
    Ok(())
}
