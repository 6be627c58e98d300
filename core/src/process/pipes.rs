//! Allocation of the three stdio pipes shared between parent and child

use crate::{CoreError, Result};
use nix::fcntl::{fcntl, FcntlArg};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tracing::{debug, error};

/// One unidirectional pipe: the end the parent keeps and the end the child keeps
#[derive(Debug)]
pub(crate) struct Pipe {
    pub(crate) parent: OwnedFd,
    pub(crate) child: OwnedFd,
}

impl Pipe {
    /// Pipe the child reads from (its stdin)
    fn to_child() -> Result<Self> {
        let (read, write) = cloexec_pipe()?;
        Ok(Self {
            parent: write,
            child: read,
        })
    }

    /// Pipe the child writes into (its stdout or stderr)
    fn from_child() -> Result<Self> {
        let (read, write) = cloexec_pipe()?;
        Ok(Self {
            parent: read,
            child: write,
        })
    }
}

/// Raw descriptors the forked child needs; plain integers so the child branch
/// touches no allocator and runs no destructors.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChildFds {
    pub(crate) stdin: RawFd,
    pub(crate) stdout: RawFd,
    pub(crate) stderr: RawFd,
    pub(crate) parent_ends: [RawFd; 3],
}

impl ChildFds {
    /// Every pipe descriptor, both ends
    pub(crate) fn all(&self) -> [RawFd; 6] {
        [
            self.stdin,
            self.stdout,
            self.stderr,
            self.parent_ends[0],
            self.parent_ends[1],
            self.parent_ends[2],
        ]
    }
}

/// The stdin/stdout/stderr pipes for one spawn
///
/// If any allocation fails the pipes created so far are dropped, which closes
/// their descriptors before the error reaches the caller.
#[derive(Debug)]
pub(crate) struct PipeSet {
    pub(crate) stdin: Pipe,
    pub(crate) stdout: Pipe,
    pub(crate) stderr: Pipe,
}

impl PipeSet {
    pub(crate) fn new() -> Result<Self> {
        let stdin = Pipe::to_child()?;
        let stdout = Pipe::from_child()?;
        let stderr = Pipe::from_child()?;
        debug!(
            "Allocated stdio pipes: stdin={}<-{}, stdout={}->{}, stderr={}->{}",
            stdin.child.as_raw_fd(),
            stdin.parent.as_raw_fd(),
            stdout.child.as_raw_fd(),
            stdout.parent.as_raw_fd(),
            stderr.child.as_raw_fd(),
            stderr.parent.as_raw_fd()
        );
        Ok(Self {
            stdin,
            stdout,
            stderr,
        })
    }

    pub(crate) fn child_fds(&self) -> ChildFds {
        ChildFds {
            stdin: self.stdin.child.as_raw_fd(),
            stdout: self.stdout.child.as_raw_fd(),
            stderr: self.stderr.child.as_raw_fd(),
            parent_ends: [
                self.stdin.parent.as_raw_fd(),
                self.stdout.parent.as_raw_fd(),
                self.stderr.parent.as_raw_fd(),
            ],
        }
    }

    /// Close the child-side ends and hand back the parent-side ones
    pub(crate) fn into_parent_ends(self) -> (OwnedFd, OwnedFd, OwnedFd) {
        let PipeSet {
            stdin,
            stdout,
            stderr,
        } = self;
        drop((stdin.child, stdout.child, stderr.child));
        (stdin.parent, stdout.parent, stderr.parent)
    }
}

/// Create a close-on-exec pipe whose ends both sit above the stdio range.
///
/// A parent started with a closed stdin/stdout/stderr gets pipe descriptors
/// in 0..=2; if they stayed there the child's `dup2` onto 0/1/2 could
/// overwrite an end it has not remapped yet.
fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let (read, write) = raw_pipe().map_err(|e| {
        error!("Failed to allocate pipe: {}", e);
        CoreError::PipeAllocationFailed(e.to_string())
    })?;
    Ok((lift_above_stdio(read)?, lift_above_stdio(write)?))
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
    target_os = "illumos",
))]
fn raw_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
    target_os = "illumos",
)))]
fn raw_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    let (read, write) = nix::unistd::pipe()?;
    fcntl(read.as_raw_fd(), FcntlArg::F_SETFD(nix::fcntl::FdFlag::FD_CLOEXEC))?;
    fcntl(write.as_raw_fd(), FcntlArg::F_SETFD(nix::fcntl::FdFlag::FD_CLOEXEC))?;
    Ok((read, write))
}

fn lift_above_stdio(fd: OwnedFd) -> Result<OwnedFd> {
    let raw = fd.as_raw_fd();
    if raw > libc::STDERR_FILENO {
        return Ok(fd);
    }
    let lifted = fcntl(raw, FcntlArg::F_DUPFD_CLOEXEC(libc::STDERR_FILENO + 1)).map_err(|e| {
        error!("Failed to move pipe descriptor {} above stdio: {}", raw, e);
        CoreError::PipeAllocationFailed(e.to_string())
    })?;
    debug!("Moved pipe descriptor {} to {}", raw, lifted);
    // SAFETY: F_DUPFD_CLOEXEC returned a fresh descriptor that nothing else owns
    Ok(unsafe { OwnedFd::from_raw_fd(lifted) })
}
