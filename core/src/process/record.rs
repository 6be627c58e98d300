//! Process records: launch parameters, parent-side pipe handles and the
//! termination state shared with the reaper

use super::options::{EnvOverrides, OnExit};
use super::reaper;
use super::status::ExitStatus;
use crate::{CoreError, Result};
use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow, Signal};
use nix::unistd::Pid;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, IntoRawFd, OwnedFd, RawFd};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, warn};

/// State of one spawned process shared between its owner and the reaper
///
/// The pid and launch parameters never change after construction. The exit
/// status moves from unset to set exactly once, under the reaper's registry
/// lock, and is immutable afterwards.
pub struct ProcessState {
    pid: Pid,
    argv: Vec<String>,
    working_directory: PathBuf,
    environment: EnvOverrides,
    status: Mutex<Option<ExitStatus>>,
    exited: Condvar,
    on_exit: Mutex<Option<OnExit>>,
}

impl ProcessState {
    pub(crate) fn new(
        pid: Pid,
        argv: Vec<String>,
        working_directory: PathBuf,
        environment: EnvOverrides,
        on_exit: Option<OnExit>,
    ) -> Self {
        Self {
            pid,
            argv,
            working_directory,
            environment,
            status: Mutex::new(None),
            exited: Condvar::new(),
            on_exit: Mutex::new(on_exit),
        }
    }

    /// Get the process ID
    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    pub(crate) fn raw_pid(&self) -> Pid {
        self.pid
    }

    /// Resolved argv; the first element is the executable path
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Resolved argv joined with spaces, for logs and diagnostics
    pub fn cmdline(&self) -> String {
        self.argv.join(" ")
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn environment_overrides(&self) -> &EnvOverrides {
        &self.environment
    }

    /// Exit status if the child has been reaped
    pub fn status(&self) -> Option<ExitStatus> {
        *self.lock_status()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.status().map(|s| s.code())
    }

    pub fn signal(&self) -> Option<i32> {
        self.status().map(|s| s.signal())
    }

    pub fn core_dumped(&self) -> Option<bool> {
        self.status().map(|s| s.core_dumped())
    }

    /// Record the exit status and wake waiters.
    ///
    /// Returns false if a status was already recorded; the first one wins.
    pub(crate) fn publish(&self, status: ExitStatus) -> bool {
        let mut slot = self.lock_status();
        if let Some(previous) = *slot {
            warn!(
                "Ignoring second exit status {} for pid {} (already {})",
                status, self.pid, previous
            );
            return false;
        }
        *slot = Some(status);
        drop(slot);
        self.exited.notify_all();
        debug!("Pid {} terminated with {}", self.pid, status);
        true
    }

    /// Run the completion callback, at most once over the record's lifetime
    pub(crate) fn run_on_exit(&self) {
        let callback = self
            .on_exit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            if catch_unwind(AssertUnwindSafe(|| callback(self))).is_err() {
                error!("on_exit callback for pid {} panicked", self.pid);
            }
        }
    }

    /// Block up to `timeout` for the status to be published
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Option<ExitStatus> {
        let guard = self.lock_status();
        let (guard, _) = self
            .exited
            .wait_timeout_while(guard, timeout, |status| status.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    fn lock_status(&self) -> MutexGuard<'_, Option<ExitStatus>> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessState")
            .field("pid", &self.pid)
            .field("argv", &self.argv)
            .field("working_directory", &self.working_directory)
            .field("environment", &self.environment)
            .field("status", &self.status())
            .finish()
    }
}

macro_rules! pipe_handle {
    ($(#[$meta:meta])* $name:ident, $async_ty:ty) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name {
            inner: File,
        }

        impl $name {
            /// Convert into a tokio pipe endpoint; must be called within a runtime
            pub fn into_async(self) -> io::Result<$async_ty> {
                <$async_ty>::from_owned_fd(OwnedFd::from(self.inner))
            }
        }

        impl From<OwnedFd> for $name {
            fn from(fd: OwnedFd) -> Self {
                Self { inner: File::from(fd) }
            }
        }

        impl From<$name> for OwnedFd {
            fn from(handle: $name) -> Self {
                OwnedFd::from(handle.inner)
            }
        }

        impl AsFd for $name {
            fn as_fd(&self) -> BorrowedFd<'_> {
                self.inner.as_fd()
            }
        }

        impl AsRawFd for $name {
            fn as_raw_fd(&self) -> RawFd {
                self.inner.as_raw_fd()
            }
        }
    };
}

pipe_handle!(
    /// Parent-side write end of the child's stdin
    ChildStdin,
    tokio::net::unix::pipe::Sender
);
pipe_handle!(
    /// Parent-side read end of the child's stdout
    ChildStdout,
    tokio::net::unix::pipe::Receiver
);
pipe_handle!(
    /// Parent-side read end of the child's stderr
    ChildStderr,
    tokio::net::unix::pipe::Receiver
);

impl Write for ChildStdin {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Read for ChildStdout {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Read for ChildStderr {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// A spawned child process as seen by its owner
///
/// Holds the parent-side pipe handles (each independently closable) and the
/// termination state shared with the reaper. Dropping a record closes any
/// handles still open; it never waits, and the reaper still collects the
/// child's status when it exits.
#[derive(Debug)]
pub struct ProcessRecord {
    state: Arc<ProcessState>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl ProcessRecord {
    pub(crate) fn new(state: Arc<ProcessState>, stdin: OwnedFd, stdout: OwnedFd, stderr: OwnedFd) -> Self {
        Self {
            state,
            stdin: Some(ChildStdin::from(stdin)),
            stdout: Some(ChildStdout::from(stdout)),
            stderr: Some(ChildStderr::from(stderr)),
        }
    }

    /// Get the process ID
    pub fn pid(&self) -> u32 {
        self.state.pid()
    }

    pub fn argv(&self) -> &[String] {
        self.state.argv()
    }

    pub fn cmdline(&self) -> String {
        self.state.cmdline()
    }

    pub fn working_directory(&self) -> &Path {
        self.state.working_directory()
    }

    pub fn environment_overrides(&self) -> &EnvOverrides {
        self.state.environment_overrides()
    }

    /// Shared termination state, as handed to `on_exit` callbacks
    pub fn state(&self) -> &Arc<ProcessState> {
        &self.state
    }

    /// Exit status if the reaper has already recorded it
    pub fn status(&self) -> Option<ExitStatus> {
        self.state.status()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.state.exit_code()
    }

    pub fn signal(&self) -> Option<i32> {
        self.state.signal()
    }

    pub fn core_dumped(&self) -> Option<bool> {
        self.state.core_dumped()
    }

    pub fn stdin(&mut self) -> Option<&mut ChildStdin> {
        self.stdin.as_mut()
    }

    pub fn stdout(&mut self) -> Option<&mut ChildStdout> {
        self.stdout.as_mut()
    }

    pub fn stderr(&mut self) -> Option<&mut ChildStderr> {
        self.stderr.as_mut()
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    pub fn is_stdin_open(&self) -> bool {
        self.stdin.is_some()
    }

    /// Block until the exit status is recorded and return it.
    ///
    /// Returns immediately if the reaper already recorded the status; calling
    /// it again returns the same value.
    pub fn wait(&self) -> Result<ExitStatus> {
        reaper::wait_for(&self.state)
    }

    /// Async variant of [`wait`](Self::wait) that blocks on tokio's blocking pool
    pub async fn wait_async(&self) -> Result<ExitStatus> {
        if let Some(status) = self.state.status() {
            return Ok(status);
        }
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || reaper::wait_for(&state))
            .await
            .map_err(|e| {
                CoreError::ProcessWait(format!("wait task for pid {} failed: {}", self.pid(), e))
            })?
    }

    /// Close stdin so the child sees EOF; stdout and stderr stay open
    pub fn close_stdin(&mut self) {
        if let Some(stdin) = self.stdin.take() {
            close_handle(self.state.raw_pid(), "stdin", stdin.into());
        }
    }

    /// Close every handle still open. Safe to call repeatedly and after exit.
    pub fn close(&mut self) {
        let pid = self.state.raw_pid();
        self.close_stdin();
        if let Some(stdout) = self.stdout.take() {
            close_handle(pid, "stdout", stdout.into());
        }
        if let Some(stderr) = self.stderr.take() {
            close_handle(pid, "stderr", stderr.into());
        }
    }

    /// Write `input` in full to stdin, then close it.
    ///
    /// A child that exits without reading its input turns the write into a
    /// broken pipe; that is logged, not returned.
    pub(crate) fn feed_input(&mut self, input: &[u8]) -> Result<()> {
        let Some(mut stdin) = self.stdin.take() else {
            return Ok(());
        };
        let written = match SigpipeBlock::new() {
            Ok(block) => {
                let written = stdin.write_all(input);
                if matches!(&written, Err(e) if e.kind() == io::ErrorKind::BrokenPipe) {
                    block.consume();
                }
                written
            }
            Err(e) => Err(e),
        };
        close_handle(self.state.raw_pid(), "stdin", stdin.into());
        match written {
            Ok(()) => {
                debug!("Wrote {} bytes of input to pid {}", input.len(), self.state.pid);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                warn!(
                    "Pid {} closed stdin before consuming {} bytes of input",
                    self.state.pid,
                    input.len()
                );
                Ok(())
            }
            Err(e) => Err(CoreError::IoError(e)),
        }
    }
}

/// Blocks SIGPIPE on the calling thread until dropped.
///
/// A write to a pipe whose reader is gone then fails with EPIPE instead of
/// killing the process, whatever the process-wide SIGPIPE disposition is.
struct SigpipeBlock {
    previous: SigSet,
    already_pending: bool,
}

impl SigpipeBlock {
    fn new() -> io::Result<Self> {
        let mut block = SigSet::empty();
        block.add(Signal::SIGPIPE);
        let mut previous = SigSet::empty();
        pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&block), Some(&mut previous))
            .map_err(io::Error::from)?;
        Ok(Self {
            previous,
            already_pending: sigpipe_pending(),
        })
    }

    /// Discard the SIGPIPE raised by a failed write so it is not delivered
    /// once the previous mask is restored
    fn consume(&self) {
        if self.already_pending || !sigpipe_pending() {
            return;
        }
        let mut set = SigSet::empty();
        set.add(Signal::SIGPIPE);
        if let Err(e) = set.wait() {
            warn!("Failed to consume pending SIGPIPE: {}", e);
        }
    }
}

impl Drop for SigpipeBlock {
    fn drop(&mut self) {
        if let Err(e) = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None) {
            error!("Failed to restore signal mask after writing input: {}", e);
        }
    }
}

fn sigpipe_pending() -> bool {
    let mut set = std::mem::MaybeUninit::<libc::sigset_t>::uninit();
    // SAFETY: sigemptyset initialises the set before sigpending fills it
    unsafe {
        libc::sigemptyset(set.as_mut_ptr());
        if libc::sigpending(set.as_mut_ptr()) != 0 {
            return false;
        }
        libc::sigismember(set.as_ptr(), libc::SIGPIPE) == 1
    }
}

/// Close `fd` explicitly so a failing `close(2)` is reported instead of ignored
fn close_handle(pid: Pid, name: &str, fd: OwnedFd) {
    let raw = fd.into_raw_fd();
    if let Err(e) = nix::unistd::close(raw) {
        warn!("Failed to close {} (fd {}) of pid {}: {}", name, raw, pid, e);
    }
}
