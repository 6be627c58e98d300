//! SIGCHLD-driven reaping of spawned children
//!
//! A single process-wide [`Reaper`] owns the registry of live children. It is
//! installed on the first spawn and stays installed for the lifetime of the
//! process:
//!
//! - The SIGCHLD handler is registered through `signal-hook`'s self-pipe. The
//!   handler itself only writes a byte to a non-blocking socket (and saves and
//!   restores `errno` around it), so it is async-signal-safe.
//! - A dedicated `spawnkit-reaper` thread blocks on the other end of that
//!   socket and drains terminated children whenever it becomes readable.
//! - Explicit waits run the same drain on the caller's thread, then sleep on
//!   the record's condition variable.
//!
//! ## Ordering
//!
//! The drain takes the registry lock before calling `waitpid`, and the
//! launcher holds the same lock from just before `fork` until the new record
//! is inserted. A child that exits immediately therefore cannot be reaped
//! before its record is visible.

use super::record::ProcessState;
use super::registry::ReapRegistry;
use super::status::ExitStatus;
use crate::config::ReaperConfig;
use crate::{CoreError, Result};
use nix::unistd::Pid;
use std::io::{self, Read};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;
use tracing::{debug, error, info, warn};

/// Global reaper instance (lazily initialized)
static REAPER: OnceLock<Reaper> = OnceLock::new();

/// Outcome of installing the SIGCHLD handler and reaper thread, computed once
static INSTALLED: OnceLock<std::result::Result<(), String>> = OnceLock::new();

/// Singleton dispatcher for child termination
pub(crate) struct Reaper {
    registry: Mutex<ReapRegistry>,
    config: ReaperConfig,
}

/// Result of one drain pass
#[derive(Debug, Default)]
pub(crate) struct Drain {
    /// Registered children reaped by this pass
    pub(crate) reaped: usize,
    /// Children reaped that were not in the registry
    pub(crate) unknown: usize,
    /// False once `waitpid` reported that no children exist at all
    pub(crate) children_remain: bool,
}

/// Get the reaper, installing the SIGCHLD handler and thread on first use
pub(crate) fn reaper() -> Result<&'static Reaper> {
    let reaper = REAPER.get_or_init(|| Reaper::new(ReaperConfig::from_env()));
    INSTALLED
        .get_or_init(|| reaper.install())
        .as_ref()
        .map_err(|e| CoreError::InitializationError(e.clone()))?;
    Ok(reaper)
}

/// Block until `state` has an exit status
pub(crate) fn wait_for(state: &Arc<ProcessState>) -> Result<ExitStatus> {
    reaper()?.wait_for(state)
}

/// Reap every terminated child right now, without waiting for SIGCHLD
pub fn reap_now() -> Result<usize> {
    Ok(reaper()?.drain().reaped)
}

/// Number of spawned children not yet reaped
pub fn pending_children() -> usize {
    REAPER.get().map_or(0, |r| r.lock_registry().len())
}

impl Reaper {
    fn new(config: ReaperConfig) -> Self {
        Self {
            registry: Mutex::new(ReapRegistry::new()),
            config,
        }
    }

    fn install(&'static self) -> std::result::Result<(), String> {
        let (reader, writer) = UnixStream::pair()
            .map_err(|e| format!("failed to create SIGCHLD notification socket: {}", e))?;
        writer
            .set_nonblocking(true)
            .map_err(|e| format!("failed to make SIGCHLD socket non-blocking: {}", e))?;

        signal_hook::low_level::pipe::register(signal_hook::consts::SIGCHLD, writer)
            .map_err(|e| format!("failed to register SIGCHLD handler: {}", e))?;

        thread::Builder::new()
            .name("spawnkit-reaper".to_string())
            .spawn(move || self.run(reader))
            .map_err(|e| format!("failed to start reaper thread: {}", e))?;

        info!(
            "SIGCHLD reaper installed (poll interval {:?})",
            self.config.poll_interval
        );
        Ok(())
    }

    /// Reaper thread body: one drain per batch of notifications
    fn run(&self, mut notifications: UnixStream) {
        let mut buf = [0u8; 64];
        loop {
            match notifications.read(&mut buf) {
                Ok(0) => {
                    error!("SIGCHLD notification socket closed, reaper thread exiting");
                    return;
                }
                Ok(n) => {
                    let drain = self.drain();
                    debug!(
                        "SIGCHLD x{}: reaped {} registered, {} unknown",
                        n, drain.reaped, drain.unknown
                    );
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Reading SIGCHLD notifications failed: {}, reaper thread exiting", e);
                    return;
                }
            }
        }
    }

    pub(crate) fn lock_registry(&self) -> MutexGuard<'_, ReapRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Collect every terminated child without blocking.
    ///
    /// Status publication and registry removal happen under the registry lock;
    /// `on_exit` callbacks run after it is released so they may spawn or wait.
    pub(crate) fn drain(&self) -> Drain {
        let mut outcome = Drain {
            children_remain: true,
            ..Default::default()
        };
        let mut finished: Vec<Arc<ProcessState>> = Vec::new();
        {
            let mut registry = self.lock_registry();
            loop {
                let mut raw: libc::c_int = 0;
                // SAFETY: plain syscall writing into a local
                let rc = unsafe { libc::waitpid(-1, &mut raw, libc::WNOHANG) };
                if rc == 0 {
                    break;
                }
                if rc < 0 {
                    let err = io::Error::last_os_error();
                    match err.raw_os_error() {
                        Some(libc::EINTR) => continue,
                        Some(libc::ECHILD) => outcome.children_remain = false,
                        _ => warn!("waitpid(-1) failed while draining: {}", err),
                    }
                    break;
                }

                let pid = Pid::from_raw(rc);
                let status = ExitStatus::from_raw(raw);
                match registry.complete(pid, status) {
                    Some(state) => {
                        outcome.reaped += 1;
                        finished.push(state);
                    }
                    None => {
                        outcome.unknown += 1;
                        warn!("Reaped unknown child pid {} ({})", pid, status);
                    }
                }
            }
        }
        for state in finished {
            state.run_on_exit();
        }
        outcome
    }

    /// Block until `state` has a published status.
    ///
    /// Drains on the calling thread first, then sleeps on the record's
    /// condition variable, draining again every poll interval in case a
    /// notification was lost.
    pub(crate) fn wait_for(&self, state: &Arc<ProcessState>) -> Result<ExitStatus> {
        loop {
            if let Some(status) = state.status() {
                return Ok(status);
            }
            let drain = self.drain();
            if let Some(status) = state.status() {
                return Ok(status);
            }
            if !drain.children_remain {
                return Err(self.lost(state));
            }
            if let Some(status) = state.wait_timeout(self.config.poll_interval) {
                return Ok(status);
            }
        }
    }

    /// `waitpid` reports no children while `state` never got a status: the
    /// child was reaped by someone else (or SIGCHLD is ignored).
    fn lost(&self, state: &Arc<ProcessState>) -> CoreError {
        let forgotten = self.lock_registry().forget(state);
        warn!(
            "Pid {} was reaped outside spawnkit (dropped from registry: {}); exit status unknown",
            state.pid(),
            forgotten
        );
        CoreError::ProcessWait(format!(
            "pid {} is no longer a child of this process; its exit status was collected elsewhere",
            state.pid()
        ))
    }
}
