//! Configuration loading and validation for spawnkit
//!
//! Two kinds of configuration live here:
//!
//! - Launch files: a TOML description of one process launch parsed into
//!   `schema::LaunchSpec`, validated with field-path error messages and turned
//!   into the arguments of [`spawn`](crate::process::spawn).
//! - Reaper tuning read from the environment when the reaper is first installed.

use crate::{CoreError, Result};
use schema::LaunchSpec;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable overriding [`ReaperConfig::poll_interval`], in milliseconds
pub const REAP_POLL_ENV: &str = "SPAWNKIT_REAP_POLL_MS";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Tuning for the SIGCHLD reaper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperConfig {
    /// How often an explicit wait re-drains terminated children while it
    /// blocks, covering notifications coalesced or lost by the kernel
    pub poll_interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ReaperConfig {
    /// Read overrides from the process environment
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(REAP_POLL_ENV).ok().as_deref())
    }

    fn from_env_value(value: Option<&str>) -> Self {
        let mut config = Self::default();
        if let Some(raw) = value {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.poll_interval = Duration::from_millis(ms),
                _ => warn!(
                    "Ignoring {}={:?}: expected a positive number of milliseconds",
                    REAP_POLL_ENV, raw
                ),
            }
        }
        config
    }
}

/// Validate a launch spec, returning field-path errors
pub fn validate_launch_spec(spec: &LaunchSpec) -> Result<()> {
    if spec.argv.is_empty() {
        return Err(CoreError::ValidationError(
            "argv: must contain at least the program".to_string(),
        ));
    }
    for (i, arg) in spec.argv.iter().enumerate() {
        if arg.contains('\0') {
            return Err(CoreError::ValidationError(format!(
                "argv[{}]: cannot contain NUL",
                i
            )));
        }
    }
    if spec.argv[0].trim().is_empty() {
        return Err(CoreError::ValidationError(
            "argv[0]: program cannot be empty".to_string(),
        ));
    }
    if let Some(dir) = &spec.working_directory {
        if dir.trim().is_empty() {
            return Err(CoreError::ValidationError(
                "workingDirectory: cannot be empty".to_string(),
            ));
        }
    }
    for key in spec.environment.keys() {
        if key.trim().is_empty() || key.contains('=') {
            return Err(CoreError::ValidationError(format!(
                "environment.{}: invalid variable name",
                key
            )));
        }
    }
    for (i, key) in spec.unset.iter().enumerate() {
        if key.trim().is_empty() || key.contains('=') {
            return Err(CoreError::ValidationError(format!(
                "unset[{}]: invalid variable name '{}'",
                i, key
            )));
        }
        if spec.environment.contains_key(key) {
            return Err(CoreError::ValidationError(format!(
                "unset[{}]: '{}' is also set in environment",
                i, key
            )));
        }
    }
    debug!("Launch spec validated: {:?}", spec.argv);
    Ok(())
}

/// Load a launch spec from a TOML file path
pub fn load_launch_spec_from_toml_path(path: impl AsRef<Path>) -> Result<LaunchSpec> {
    let data = fs::read_to_string(&path).map_err(|e| {
        CoreError::ConfigurationError(format!("Failed to read config {:?}: {}", path.as_ref(), e))
    })?;
    load_launch_spec_from_toml_str(&data)
}

/// Load a launch spec from a TOML string
pub fn load_launch_spec_from_toml_str(input: &str) -> Result<LaunchSpec> {
    let spec: LaunchSpec = toml::from_str(input)
        .map_err(|e| CoreError::ConfigurationError(format!("TOML parse error: {}", e)))?;
    validate_launch_spec(&spec)?;
    Ok(spec)
}

#[cfg(unix)]
impl From<LaunchSpec> for crate::process::SpawnOptions {
    fn from(spec: LaunchSpec) -> Self {
        let mut options = crate::process::SpawnOptions::new();
        if let Some(dir) = spec.working_directory {
            options = options.working_directory(dir);
        }
        for (key, value) in spec.environment {
            options = options.env(key, value);
        }
        for key in spec.unset {
            options = options.env_remove(key);
        }
        if let Some(input) = spec.input {
            options = options.input(input);
        }
        options
    }
}

/// Split a validated launch spec into argv and spawn options
#[cfg(unix)]
pub fn launch_spec_into_parts(mut spec: LaunchSpec) -> (Vec<String>, crate::process::SpawnOptions) {
    let argv = std::mem::take(&mut spec.argv);
    (argv, spec.into())
}
