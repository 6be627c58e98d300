//! Library side of the `spawnkit` binary
//!
//! Turns command-line flags (optionally layered over a TOML launch file) into
//! a validated [`LaunchSpec`] and runs it.

pub mod error;

pub use error::{CliError, Result};

use schema::{LaunchSpec, ProcessExit};
use spawnkit_core::config::{launch_spec_into_parts, load_launch_spec_from_toml_path, validate_launch_spec};
use spawnkit_core::process::{run_collecting, spawn, ExitStatus};
use spawnkit_core::CoreError;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

/// Launch flags shared by every subcommand
#[derive(Debug, Clone, Default)]
pub struct LaunchArgs {
    pub config: Option<PathBuf>,
    pub cwd: Option<String>,
    pub env: Vec<String>,
    pub unset: Vec<String>,
    pub input: Option<String>,
    pub argv: Vec<String>,
}

/// Build the launch spec: config file first, then flags on top.
///
/// A non-empty `argv` on the command line replaces the file's argv; `--cwd`
/// and `--input` replace theirs; `--env` and `--unset` are merged in, with a
/// later `--unset` cancelling an earlier `--env` of the same name and vice
/// versa.
pub fn resolve_launch(args: &LaunchArgs) -> Result<LaunchSpec> {
    let mut spec = match &args.config {
        Some(path) => {
            load_launch_spec_from_toml_path(path).map_err(|e| CliError::ConfigError(e.to_string()))?
        }
        None => LaunchSpec::default(),
    };

    if !args.argv.is_empty() {
        spec.argv = args.argv.clone();
    }
    if let Some(cwd) = &args.cwd {
        spec.working_directory = Some(cwd.clone());
    }
    if let Some(input) = &args.input {
        spec.input = Some(input.clone());
    }
    for pair in &args.env {
        let (key, value) = parse_env_pair(pair)?;
        spec.unset.retain(|k| k != &key);
        spec.environment.insert(key, value);
    }
    for key in &args.unset {
        spec.environment.remove(key);
        if !spec.unset.contains(key) {
            spec.unset.push(key.clone());
        }
    }

    validate_launch_spec(&spec).map_err(|e| CliError::InvalidArgument(e.to_string()))?;
    debug!("Resolved launch spec: {:?}", spec);
    Ok(spec)
}

/// Parse a `KEY=VALUE` pair; the value may itself contain `=`
pub fn parse_env_pair(pair: &str) -> Result<(String, String)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(CliError::InvalidArgument(format!(
            "--env expects KEY=VALUE, got '{}'",
            pair
        ))),
    }
}

/// Shell-style exit code for a terminated child
pub fn shell_exit_code(exit_code: i32, signal: i32) -> i32 {
    if signal != 0 {
        128 + signal
    } else {
        exit_code
    }
}

/// Run to completion, copying stdout to ours; returns the code to exit with.
///
/// On failure the child's stderr is forwarded to ours.
pub async fn run(spec: LaunchSpec) -> Result<i32> {
    let (argv, options) = launch_spec_into_parts(spec);
    match run_collecting(argv, options).await {
        Ok(out) => {
            std::io::stdout().write_all(&out)?;
            Ok(0)
        }
        Err(CoreError::NonZeroExit {
            exit_code,
            signal,
            stderr,
        }) => {
            if !stderr.is_empty() {
                eprintln!("{}", stderr);
            }
            Ok(shell_exit_code(exit_code, signal))
        }
        Err(e) => Err(e.into()),
    }
}

/// Stream the child's output line by line, tagged with the stream name, then
/// print its exit report as JSON.
pub async fn status(spec: LaunchSpec) -> Result<ProcessExit> {
    let (argv, options) = launch_spec_into_parts(spec);
    let mut record = tokio::task::spawn_blocking(move || spawn(argv, options))
        .await
        .map_err(|e| CliError::Core(CoreError::Other(format!("spawn task failed: {}", e))))??;
    record.close_stdin();
    info!("Started pid {}: {}", record.pid(), record.cmdline());

    let stdout = record.take_stdout().map(|p| p.into_async()).transpose()?;
    let stderr = record.take_stderr().map(|p| p.into_async()).transpose()?;

    let forward_stdout = async move {
        if let Some(pipe) = stdout {
            let mut lines = BufReader::new(pipe).lines();
            while let Some(line) = lines.next_line().await? {
                println!("[stdout] {}", line);
            }
        }
        Ok::<_, std::io::Error>(())
    };
    let forward_stderr = async move {
        if let Some(pipe) = stderr {
            let mut lines = BufReader::new(pipe).lines();
            while let Some(line) = lines.next_line().await? {
                println!("[stderr] {}", line);
            }
        }
        Ok::<_, std::io::Error>(())
    };
    tokio::try_join!(forward_stdout, forward_stderr)?;

    let status: ExitStatus = record.wait_async().await?;
    let report = status.to_exit_report(record.pid());
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report)
}
