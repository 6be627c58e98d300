//! Spawning child processes over stdio pipes
//!
//! [`spawn`] forks and execs a program with its stdin, stdout and stderr
//! connected to fresh pipes and returns a [`ProcessRecord`] holding the
//! parent ends. Exit statuses are collected by a process-wide SIGCHLD reaper
//! (see [`reaper`]) so children never linger as zombies, whether or not their
//! owner ever calls [`ProcessRecord::wait`].
//!
//! ## Platform Support
//!
//! - **Unix**: fork/exec with `waitpid`-based reaping
//!
//! ## Safety
//!
//! The child side of the fork runs only async-signal-safe calls on data
//! prepared by the parent, so spawning is safe from multi-threaded programs
//! including a tokio runtime.

mod launcher;
pub(crate) mod pipes;
pub mod options;
pub mod reaper;
pub mod record;
pub(crate) mod registry;
pub mod resolve;
pub mod run;
pub mod status;

pub use launcher::{spawn, CHILD_SETUP_FAILED_EXIT};
pub use options::{EnvOverrides, OnExit, SpawnOptions};
pub use reaper::{pending_children, reap_now};
pub use record::{ChildStderr, ChildStdin, ChildStdout, ProcessRecord, ProcessState};
pub use resolve::resolve_program;
pub use run::{run_collecting, run_collecting_blocking};
pub use status::ExitStatus;
