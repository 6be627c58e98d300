//! Input delivery when SIGPIPE has its default disposition
//!
//! Rust binaries ignore SIGPIPE, but a C host or a cdylib consumer may not.
//! Restoring the default is process-wide, so this lives in its own test
//! binary with a single test.

#![cfg(unix)]
#![allow(unsafe_code)] // Required for libc calls in tests

use spawnkit_core::process::{spawn, ExitStatus, SpawnOptions};

const PROBE: &str = env!("CARGO_BIN_EXE_spawnkit-probe");

#[test]
fn test_unread_input_with_default_sigpipe() {
    // SAFETY: changes only this test process's disposition
    let previous = unsafe { libc::signal(libc::SIGPIPE, libc::SIG_DFL) };
    assert_ne!(previous, libc::SIG_ERR);

    let record = spawn(
        [PROBE, "exit", "0"],
        SpawnOptions::new().input(vec![b'x'; 1 << 20]),
    )
    .expect("spawn returns despite the broken pipe");
    assert!(!record.is_stdin_open());
    assert_eq!(record.wait().unwrap(), ExitStatus::exited(0));

    // Input the child does consume is still delivered under the default disposition
    let mut record = spawn([PROBE, "echo"], SpawnOptions::new().input("still works")).unwrap();
    let mut out = String::new();
    std::io::Read::read_to_string(record.stdout().unwrap(), &mut out).unwrap();
    assert_eq!(out, "still works");
    assert!(record.wait().unwrap().success());

    // The calling thread's mask is restored after the write
    let mut current: libc::sigset_t = unsafe { std::mem::zeroed() };
    unsafe {
        libc::sigemptyset(&mut current);
        libc::pthread_sigmask(libc::SIG_BLOCK, std::ptr::null(), &mut current);
        assert_eq!(libc::sigismember(&current, libc::SIGPIPE), 0);
        libc::signal(libc::SIGPIPE, previous);
    }
}
