//! Fork/exec handshake
//!
//! Everything the child needs is rendered into C strings and pointer arrays
//! before `fork`. After `fork` the child only makes async-signal-safe calls
//! (`sigprocmask`, `signal`, `chdir`, `dup2`, `close`, `execve`, `write`,
//! `_exit`) on that prepared data: no allocation, no locks, no destructors.
//! The parent branch never reads anything the child produces after the fork
//! except through the pipes.

use super::options::SpawnOptions;
use super::pipes::{ChildFds, PipeSet};
use super::reaper;
use super::record::{ProcessRecord, ProcessState};
use super::resolve::resolve_program;
use crate::{CoreError, Result};
use nix::errno::Errno;
use nix::unistd::{fork, ForkResult};
use std::ffi::{CString, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error};

/// Exit code of a child that failed before reaching the target program
pub const CHILD_SETUP_FAILED_EXIT: i32 = 127;

/// Spawn `argv` with its stdin, stdout and stderr connected to pipes.
///
/// Returns once the child is forked, registered with the reaper and (if
/// requested) has been sent its input. The child's exit status is collected
/// asynchronously on SIGCHLD; use [`ProcessRecord::wait`] to block for it.
///
/// Errors before the fork leave nothing behind: no child, no descriptors.
/// Failures inside the child after the fork (directory change, exec) cannot
/// be returned here; the child writes a `spawnkit:` diagnostic to its stderr
/// pipe and exits with [`CHILD_SETUP_FAILED_EXIT`].
///
/// ## Example
///
/// ```rust,no_run
/// use spawnkit_core::process::{spawn, SpawnOptions};
/// use std::io::Read;
///
/// let mut record = spawn(["echo", "hello", "world"], SpawnOptions::new())?;
/// let mut out = String::new();
/// record.stdout().unwrap().read_to_string(&mut out)?;
/// let status = record.wait()?;
/// assert!(status.success());
/// # Ok::<(), spawnkit_core::CoreError>(())
/// ```
pub fn spawn<I, S>(argv: I, options: SpawnOptions) -> Result<ProcessRecord>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut argv: Vec<String> = argv.into_iter().map(Into::into).collect();
    validate_argv(&argv)?;
    argv[0] = resolve_program(&argv[0])?
        .into_os_string()
        .into_string()
        .map_err(|p| CoreError::CommandNotFound(format!("{:?} is not valid UTF-8", p)))?;

    let SpawnOptions {
        working_directory,
        environment,
        input,
        on_exit,
    } = options;
    environment.validate()?;

    let working_directory = match working_directory {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    check_working_directory(&working_directory)?;

    let plan = ExecPlan::new(&argv, &working_directory, environment.apply(std::env::vars_os()))?;
    let reaper = reaper::reaper()?;
    let pipes = PipeSet::new()?;
    let child_fds = pipes.child_fds();

    debug!("Spawning process: {:?} in {}", argv, working_directory.display());

    let state = {
        // Held across fork so the drain cannot reap the child before it is registered
        let mut registry = reaper.lock_registry();

        // SAFETY: the child branch only performs async-signal-safe calls on
        // data prepared above and never returns.
        match unsafe { fork() } {
            Err(e) => {
                error!("Failed to fork for '{}': {}", argv[0], e);
                return Err(CoreError::ForkFailed(e.to_string()));
            }
            Ok(ForkResult::Child) => unsafe { plan.exec_child(child_fds) },
            Ok(ForkResult::Parent { child }) => {
                let state = Arc::new(ProcessState::new(
                    child,
                    argv,
                    working_directory,
                    environment,
                    on_exit,
                ));
                registry.insert(Arc::clone(&state));
                state
            }
        }
    };
    drop(plan);

    let (stdin, stdout, stderr) = pipes.into_parent_ends();
    let mut record = ProcessRecord::new(state, stdin, stdout, stderr);
    debug!("Successfully spawned pid {}: {}", record.pid(), record.cmdline());

    if let Some(input) = input {
        record.feed_input(&input)?;
    }
    Ok(record)
}

fn validate_argv(argv: &[String]) -> Result<()> {
    if argv.is_empty() {
        return Err(CoreError::InvalidArgv("argv must not be empty".to_string()));
    }
    if let Some(i) = argv.iter().position(|a| a.contains('\0')) {
        return Err(CoreError::InvalidArgv(format!("argv[{}] contains a NUL byte", i)));
    }
    Ok(())
}

fn check_working_directory(dir: &Path) -> Result<()> {
    match std::fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(CoreError::ChildSetupFailed(format!(
            "cannot change directory to {}: not a directory",
            dir.display()
        ))),
        Err(e) => Err(CoreError::ChildSetupFailed(format!(
            "cannot change directory to {}: {}",
            dir.display(),
            e
        ))),
    }
}

/// Everything the child touches after `fork`, prepared in the parent
struct ExecPlan {
    program: CString,
    _argv: Vec<CString>,
    argv_ptrs: Vec<*const libc::c_char>,
    _envp: Vec<CString>,
    envp_ptrs: Vec<*const libc::c_char>,
    cwd: CString,
    chdir_diagnostic: Vec<u8>,
    exec_diagnostic: Vec<u8>,
}

impl ExecPlan {
    fn new<E>(argv: &[String], cwd: &Path, env: E) -> Result<Self>
    where
        E: IntoIterator<Item = (OsString, OsString)>,
    {
        let to_cstring = |bytes: Vec<u8>, what: &str| {
            CString::new(bytes).map_err(|_| CoreError::InvalidArgv(format!("{} contains a NUL byte", what)))
        };

        let argv_c = argv
            .iter()
            .map(|a| to_cstring(a.clone().into_bytes(), "argv"))
            .collect::<Result<Vec<_>>>()?;
        let envp_c = env
            .into_iter()
            .map(|(k, v)| {
                let mut entry = k.as_bytes().to_vec();
                entry.push(b'=');
                entry.extend_from_slice(v.as_bytes());
                CString::new(entry).map_err(|_| {
                    CoreError::ValidationError(format!(
                        "environment.{}: contains a NUL byte",
                        k.to_string_lossy()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let cwd_c = CString::new(cwd.as_os_str().as_bytes()).map_err(|_| {
            CoreError::ChildSetupFailed(format!("{} contains a NUL byte", cwd.display()))
        })?;

        let argv_ptrs = null_terminated(&argv_c);
        let envp_ptrs = null_terminated(&envp_c);

        Ok(Self {
            program: argv_c[0].clone(),
            _argv: argv_c,
            argv_ptrs,
            _envp: envp_c,
            envp_ptrs,
            cwd: cwd_c,
            chdir_diagnostic: format!("spawnkit: chdir({}) failed: errno ", cwd.display()).into_bytes(),
            exec_diagnostic: format!("spawnkit: exec({}) failed: errno ", argv[0]).into_bytes(),
        })
    }

    /// Child side of the handshake. Never returns.
    ///
    /// # Safety
    ///
    /// Must only be called in the child immediately after `fork`.
    unsafe fn exec_child(&self, fds: ChildFds) -> ! {
        // Ignored signals and the blocked mask survive exec; start the target clean
        let mut empty: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut empty);
        libc::pthread_sigmask(libc::SIG_SETMASK, &empty, std::ptr::null_mut());
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);

        if libc::chdir(self.cwd.as_ptr()) == -1 {
            let errno = Errno::last_raw();
            write_diagnostic(fds.stderr, &self.chdir_diagnostic, errno);
            libc::_exit(CHILD_SETUP_FAILED_EXIT);
        }

        // Pipe descriptors all sit above 2, so no dup2 here clobbers another end
        for (fd, target) in [
            (fds.stdin, libc::STDIN_FILENO),
            (fds.stdout, libc::STDOUT_FILENO),
            (fds.stderr, libc::STDERR_FILENO),
        ] {
            while libc::dup2(fd, target) == -1 {
                let errno = Errno::last_raw();
                if errno != libc::EINTR {
                    write_diagnostic(fds.stderr, b"spawnkit: dup2 failed: errno ", errno);
                    libc::_exit(CHILD_SETUP_FAILED_EXIT);
                }
            }
        }
        for fd in fds.all() {
            libc::close(fd);
        }

        libc::execve(self.program.as_ptr(), self.argv_ptrs.as_ptr(), self.envp_ptrs.as_ptr());
        let errno = Errno::last_raw();
        write_diagnostic(libc::STDERR_FILENO, &self.exec_diagnostic, errno);
        libc::_exit(CHILD_SETUP_FAILED_EXIT);
    }
}

fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

/// Write `prefix`, the decimal `errno` and a newline to `fd` using only a
/// stack buffer.
fn write_diagnostic(fd: libc::c_int, prefix: &[u8], errno: i32) {
    let mut digits = [0u8; 12];
    let mut n = errno.unsigned_abs();
    let mut start = digits.len() - 1;
    digits[start] = b'\n';
    loop {
        start -= 1;
        digits[start] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    // SAFETY: write(2) on valid buffers; failures are ignored, there is nowhere to report them
    unsafe {
        libc::write(fd, prefix.as_ptr().cast(), prefix.len());
        libc::write(fd, digits[start..].as_ptr().cast(), digits.len() - start);
    }
}
