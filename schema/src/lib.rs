//! Schema definitions for spawnkit
//!
//! This crate contains the data structures that cross the boundary of the
//! spawn library: launch specifications read from configuration files and the
//! exit reports produced once a child has been reaped. All types here implement
//! JSON Schema generation for external consumption.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// Declarative description of a single process launch
///
/// Mirrors the options accepted by `spawnkit_core::process::spawn`. The
/// environment is split in two so the file format never needs an explicit
/// null: `environment` sets or overwrites variables and `unset` removes them
/// from the inherited environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchSpec {
    /// Program followed by its arguments
    pub argv: Vec<String>,

    /// Directory to launch the child in (defaults to the caller's cwd)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,

    /// Variables to set in the child's environment
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    /// Variables to remove from the child's inherited environment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unset: Vec<String>,

    /// Text written to the child's stdin before it is closed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
}

/// Report describing how a reaped child terminated
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessExit {
    /// Process ID that exited
    pub pid: u32,

    /// Exit code passed to `exit(2)`; 0 when the child was killed by a signal
    pub exit_code: i32,

    /// Signal that terminated the child, 0 if it exited normally
    pub signal: i32,

    /// Whether the kernel wrote a core dump
    pub core_dumped: bool,

    /// Timestamp when the report was produced
    pub timestamp: String,
}

impl ProcessExit {
    /// Check if this represents a clean exit (code 0, no signal)
    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && self.signal == 0
    }

    /// Create a current timestamp string in RFC3339 format
    #[must_use]
    pub fn current_timestamp() -> String {
        humantime::format_rfc3339_seconds(SystemTime::now()).to_string()
    }
}
