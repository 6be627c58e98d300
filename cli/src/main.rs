//! spawnkit CLI binary
//!
//! Runs a single command over piped stdio and reports how it terminated.

#![allow(unused_crate_dependencies)]

use clap::{Args, Parser, Subcommand};
use cli::LaunchArgs;
use std::path::PathBuf;
use tracing::error;

#[derive(Parser)]
#[command(name = "spawnkit")]
#[command(about = "Run commands over piped stdio and report their exit status")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command to completion and print its stdout
    Run(Launch),
    /// Stream a command's output and print its exit report as JSON
    Status(Launch),
}

#[derive(Args)]
struct Launch {
    /// TOML launch file; flags given here override its fields
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Working directory for the child
    #[arg(long, value_name = "DIR")]
    cwd: Option<String>,
    /// Set an environment variable in the child
    #[arg(long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,
    /// Remove a variable from the child's inherited environment
    #[arg(long = "unset", value_name = "KEY")]
    unset: Vec<String>,
    /// Text written to the child's stdin before it is closed
    #[arg(long)]
    input: Option<String>,
    /// Program and arguments
    #[arg(last = true, value_name = "ARGV")]
    argv: Vec<String>,
}

impl From<Launch> for LaunchArgs {
    fn from(launch: Launch) -> Self {
        LaunchArgs {
            config: launch.config,
            cwd: launch.cwd,
            env: launch.env,
            unset: launch.unset,
            input: launch.input,
            argv: launch.argv,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let _ = spawnkit_core::utils::init_tracing(&cli.log_level);

    let result = match cli.command {
        Commands::Run(launch) => match cli::resolve_launch(&launch.into()) {
            Ok(spec) => cli::run(spec).await,
            Err(e) => Err(e),
        },
        Commands::Status(launch) => match cli::resolve_launch(&launch.into()) {
            Ok(spec) => cli::status(spec)
                .await
                .map(|report| cli::shell_exit_code(report.exit_code, report.signal)),
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Command failed [{}]: {}", e.code(), e);
            eprintln!("spawnkit: {}", e);
            std::process::exit(1);
        }
    }
}
