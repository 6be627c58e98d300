//! Decoding of raw `waitpid` status words

use schema::ProcessExit;
use std::fmt;
use tracing::warn;

/// How a reaped child terminated
///
/// The three fields are always produced together from one raw status word and
/// published as one value, so a reader never sees an exit code without its
/// matching signal and core-dump flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitStatus {
    code: i32,
    signal: i32,
    core_dumped: bool,
}

impl ExitStatus {
    /// Build a status for a normal exit with `code`
    pub const fn exited(code: i32) -> Self {
        Self {
            code,
            signal: 0,
            core_dumped: false,
        }
    }

    /// Build a status for a child terminated by `signal`
    pub const fn signaled(signal: i32, core_dumped: bool) -> Self {
        Self {
            code: 0,
            signal,
            core_dumped,
        }
    }

    /// Decode the status word returned by `waitpid(2)`.
    ///
    /// A word that is neither a normal exit nor a signal termination should not
    /// be reported without `WUNTRACED`/`WCONTINUED`, but some kernels have been
    /// seen to hand one back anyway. It is treated as a clean exit.
    pub fn from_raw(raw: libc::c_int) -> Self {
        if libc::WIFEXITED(raw) {
            Self::exited(libc::WEXITSTATUS(raw))
        } else if libc::WIFSIGNALED(raw) {
            Self::signaled(libc::WTERMSIG(raw), libc::WCOREDUMP(raw))
        } else {
            warn!("waitpid returned undecodable status {:#x}, treating as exit 0", raw);
            Self::exited(0)
        }
    }

    /// Exit code, 0 when the child was killed by a signal
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Terminating signal, 0 when the child exited normally
    pub fn signal(&self) -> i32 {
        self.signal
    }

    pub fn core_dumped(&self) -> bool {
        self.core_dumped
    }

    /// Exit code 0 and no signal
    pub fn success(&self) -> bool {
        self.code == 0 && self.signal == 0
    }

    /// Produce a serializable report for `pid`
    pub fn to_exit_report(&self, pid: u32) -> ProcessExit {
        ProcessExit {
            pid,
            exit_code: self.code,
            signal: self.signal,
            core_dumped: self.core_dumped,
            timestamp: ProcessExit::current_timestamp(),
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.signal != 0 {
            write!(f, "signal {}", self.signal)?;
            if self.core_dumped {
                write!(f, " (core dumped)")?;
            }
            Ok(())
        } else {
            write!(f, "exit code {}", self.code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Linux encoding: exit code in bits 8..16, signal in the low 7 bits,
    // core flag at 0x80.
    #[cfg(target_os = "linux")]
    #[test]
    fn test_from_raw_exit_code() {
        let status = ExitStatus::from_raw(3 << 8);
        assert_eq!(status.code(), 3);
        assert_eq!(status.signal(), 0);
        assert!(!status.core_dumped());
        assert!(!status.success());
        assert!(ExitStatus::from_raw(0).success());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_from_raw_signal_with_core() {
        let status = ExitStatus::from_raw(libc::SIGSEGV | 0x80);
        assert_eq!(status.code(), 0);
        assert_eq!(status.signal(), libc::SIGSEGV);
        assert!(status.core_dumped());
        assert!(!status.success());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_from_raw_stopped_is_treated_as_clean_exit() {
        // WIFSTOPPED encoding: 0x7f in the low byte
        let status = ExitStatus::from_raw((libc::SIGSTOP << 8) | 0x7f);
        assert_eq!(status, ExitStatus::exited(0));
    }

    #[test]
    fn test_display() {
        assert_eq!(ExitStatus::exited(1).to_string(), "exit code 1");
        assert_eq!(ExitStatus::signaled(9, false).to_string(), "signal 9");
        assert_eq!(ExitStatus::signaled(11, true).to_string(), "signal 11 (core dumped)");
    }

    #[test]
    fn test_exit_report() {
        let report = ExitStatus::signaled(15, false).to_exit_report(1234);
        assert_eq!(report.pid, 1234);
        assert_eq!(report.exit_code, 0);
        assert_eq!(report.signal, 15);
        assert!(!report.is_success());
    }
}
