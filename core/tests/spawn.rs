//! Integration tests for spawning and reaping children
//!
//! The child side is the `spawnkit-probe` helper binary, which reports what
//! it observed (argv, cwd, environment, stdin) as JSON or performs a single
//! action such as exiting with a given code.

#![cfg(unix)]
#![allow(unsafe_code)] // Required for libc calls in tests

use serde_json::Value;
use serial_test::serial;
use spawnkit_core::process::{
    run_collecting, run_collecting_blocking, spawn, ExitStatus, ProcessRecord,
    SpawnOptions, CHILD_SETUP_FAILED_EXIT,
};
use spawnkit_core::CoreError;
use std::io::Read;
use std::sync::mpsc;
use std::time::{Duration, Instant};

const PROBE: &str = env!("CARGO_BIN_EXE_spawnkit-probe");

fn probe(args: &[&str]) -> Vec<String> {
    std::iter::once(PROBE)
        .chain(args.iter().copied())
        .map(String::from)
        .collect()
}

fn read_stdout(record: &mut ProcessRecord) -> String {
    let mut out = String::new();
    record
        .stdout()
        .expect("stdout open")
        .read_to_string(&mut out)
        .expect("read stdout");
    out
}

fn read_stderr(record: &mut ProcessRecord) -> String {
    let mut err = String::new();
    record
        .stderr()
        .expect("stderr open")
        .read_to_string(&mut err)
        .expect("read stderr");
    err
}

fn report(record: &mut ProcessRecord) -> Value {
    let out = read_stdout(record);
    serde_json::from_str(out.trim()).unwrap_or_else(|e| panic!("bad report {:?}: {}", out, e))
}

/// Test the plain success path: exit 0, no signal, no core
#[test]
fn test_spawn_and_wait_success() {
    let mut record = spawn(probe(&["exit", "0"]), SpawnOptions::new()).expect("spawn");
    assert!(record.pid() > 0);
    assert_eq!(record.argv()[0], PROBE);

    let status = record.wait().expect("wait");
    assert_eq!(status, ExitStatus::exited(0));
    assert!(status.success());
    assert_eq!(record.exit_code(), Some(0));
    assert_eq!(record.signal(), Some(0));
    assert_eq!(record.core_dumped(), Some(false));
    record.close();
}

/// Test that argv reaches the child untouched
#[test]
fn test_argv_passed_verbatim() {
    let mut record = spawn(
        probe(&["report", "with space", "", "ünïcode"]),
        SpawnOptions::new(),
    )
    .expect("spawn");
    record.close_stdin();

    let report = report(&mut record);
    let argv: Vec<String> = serde_json::from_value(report["argv"].clone()).unwrap();
    assert_eq!(&argv[1..], &["report", "with space", "", "ünïcode"]);
    assert!(record.wait().unwrap().success());
}

/// Test that input is delivered in full and stdin is closed afterwards
#[test]
fn test_input_is_written_then_stdin_closed() {
    let mut record = spawn(probe(&["report"]), SpawnOptions::new().input("hello")).expect("spawn");
    assert!(!record.is_stdin_open());
    assert!(record.stdin().is_none());

    let report = report(&mut record);
    assert_eq!(report["stdin"], "hello");
    assert!(record.wait().unwrap().success());
}

/// Test that empty input still closes stdin
#[test]
fn test_empty_input_closes_stdin() {
    let mut record = spawn(probe(&["report"]), SpawnOptions::new().input("")).expect("spawn");
    assert!(!record.is_stdin_open());

    let report = report(&mut record);
    assert_eq!(report["stdin"], "");
    assert!(record.wait().unwrap().success());
}

/// Test that input the child never reads is dropped with a warning
#[test]
fn test_unread_input_larger_than_pipe_buffer() {
    let record = spawn(probe(&["exit", "0"]), SpawnOptions::new().input(vec![b'x'; 1 << 20]))
        .expect("spawn returns despite the broken pipe");
    assert!(!record.is_stdin_open());

    let status = record.wait().unwrap();
    assert_eq!(status, ExitStatus::exited(0));
}

/// Test that stdin stays open for the caller when no input is given
#[test]
fn test_stdin_left_open_without_input() {
    let mut record = spawn(probe(&["stdin-open"]), SpawnOptions::new()).expect("spawn");
    assert!(record.is_stdin_open());

    let report = report(&mut record);
    assert_eq!(report["stdinOpen"], true);
    record.close_stdin();
    assert!(record.wait().unwrap().success());
}

/// Test writing through the stdin handle and reading the echo back
#[test]
fn test_interactive_echo() {
    use std::io::Write;

    let mut record = spawn(probe(&["echo"]), SpawnOptions::new()).expect("spawn");
    record
        .stdin()
        .expect("stdin open")
        .write_all(b"ping\n")
        .unwrap();
    record.close_stdin();
    assert_eq!(read_stdout(&mut record), "ping\n");
    assert!(record.wait().unwrap().success());
}

/// Test that stderr is a separate stream from stdout
#[test]
fn test_stderr_and_exit_code() {
    let mut record = spawn(probe(&["stderr", "boom", "3"]), SpawnOptions::new()).expect("spawn");
    assert_eq!(read_stderr(&mut record), "boom");
    assert_eq!(read_stdout(&mut record), "");

    let status = record.wait().unwrap();
    assert_eq!(status.code(), 3);
    assert_eq!(status.signal(), 0);
    assert!(!status.success());
}

/// Test the working directory option
#[test]
fn test_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    let mut record = spawn(
        probe(&["report"]),
        SpawnOptions::new().working_directory(dir.path()),
    )
    .expect("spawn");
    record.close_stdin();

    let report = report(&mut record);
    let reported = std::path::PathBuf::from(report["cwd"].as_str().unwrap());
    assert_eq!(
        std::fs::canonicalize(reported).unwrap(),
        std::fs::canonicalize(dir.path()).unwrap()
    );
    assert_eq!(record.working_directory(), dir.path());
    assert!(record.wait().unwrap().success());
}

/// Test that a missing working directory fails before anything is created
#[test]
fn test_missing_working_directory_fails_spawn() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist");
    let err = spawn(probe(&["exit", "0"]), SpawnOptions::new().working_directory(&missing))
        .unwrap_err();
    assert!(matches!(err, CoreError::ChildSetupFailed(_)), "{:?}", err);
    assert!(err.to_string().contains("does-not-exist"));
}

/// Test setting, overriding and removing environment variables
#[test]
#[serial]
fn test_environment_overrides() {
    std::env::set_var("SPAWNKIT_TEST_INHERITED", "parent");
    std::env::set_var("SPAWNKIT_TEST_REMOVED", "parent");

    let options = SpawnOptions::new()
        .env("SPAWNKIT_TEST_ADDED", "child")
        .env("SPAWNKIT_TEST_INHERITED", "overridden")
        .env_remove("SPAWNKIT_TEST_REMOVED")
        .env_remove("SPAWNKIT_TEST_NEVER_SET");
    let mut record = spawn(probe(&["report"]), options).expect("spawn");
    record.close_stdin();
    let report = report(&mut record);

    std::env::remove_var("SPAWNKIT_TEST_INHERITED");
    std::env::remove_var("SPAWNKIT_TEST_REMOVED");

    let env = &report["env"];
    assert_eq!(env["SPAWNKIT_TEST_ADDED"], "child");
    assert_eq!(env["SPAWNKIT_TEST_INHERITED"], "overridden");
    assert!(env.get("SPAWNKIT_TEST_REMOVED").is_none());
    assert!(env.get("SPAWNKIT_TEST_NEVER_SET").is_none());
    assert!(env.get("PATH").is_some(), "inherited variables survive");
    assert!(record.wait().unwrap().success());
}

/// Test that the inherited environment passes through unchanged by default
#[test]
#[serial]
fn test_environment_inherited_by_default() {
    std::env::set_var("SPAWNKIT_TEST_PASSTHROUGH", "yes");
    let mut record = spawn(probe(&["report"]), SpawnOptions::new()).expect("spawn");
    std::env::remove_var("SPAWNKIT_TEST_PASSTHROUGH");
    record.close_stdin();

    let report = report(&mut record);
    assert_eq!(report["env"]["SPAWNKIT_TEST_PASSTHROUGH"], "yes");
    record.wait().unwrap();
}

/// Test that invalid environment names are rejected before forking
#[test]
fn test_invalid_environment_name_rejected() {
    let err = spawn(probe(&["exit", "0"]), SpawnOptions::new().env("BAD=NAME", "x")).unwrap_err();
    assert!(matches!(err, CoreError::ValidationError(_)), "{:?}", err);
}

/// Test command lookup failures
#[test]
fn test_command_not_found() {
    let err = spawn(["spawnkit-definitely-not-a-command"], SpawnOptions::new()).unwrap_err();
    assert!(matches!(err, CoreError::CommandNotFound(_)), "{:?}", err);

    let err = spawn(["/no/such/dir/program"], SpawnOptions::new()).unwrap_err();
    assert!(matches!(err, CoreError::CommandNotFound(_)), "{:?}", err);
}

/// Test argv validation
#[test]
fn test_invalid_argv() {
    let err = spawn(Vec::<String>::new(), SpawnOptions::new()).unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgv(_)), "{:?}", err);

    let err = spawn([PROBE, "nul\0byte"], SpawnOptions::new()).unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgv(_)), "{:?}", err);
}

/// Test that a file that cannot be executed produces the child diagnostic
#[test]
fn test_exec_failure_reported_on_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("not-executable");
    std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();

    let mut record = spawn([script.to_str().unwrap()], SpawnOptions::new()).expect("spawn");
    let stderr = read_stderr(&mut record);
    assert!(stderr.starts_with("spawnkit: exec("), "{:?}", stderr);
    assert!(stderr.contains("failed: errno 13"), "{:?}", stderr);

    let status = record.wait().unwrap();
    assert_eq!(status.code(), CHILD_SETUP_FAILED_EXIT);
}

/// Test close and wait idempotence
#[test]
fn test_close_and_wait_are_idempotent() {
    let mut record = spawn(probe(&["exit", "4"]), SpawnOptions::new()).expect("spawn");
    record.close();
    record.close();
    record.close_stdin();
    assert!(record.stdout().is_none());
    assert!(record.stderr().is_none());

    let first = record.wait().unwrap();
    let second = record.wait().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.code(), 4);
    record.close();
}

/// Test termination by signal
#[test]
fn test_signal_termination() {
    let mut record = spawn(probe(&["sleep", "10000"]), SpawnOptions::new()).expect("spawn");
    record.close_stdin();
    let rc = unsafe { libc::kill(record.pid() as i32, libc::SIGTERM) };
    assert_eq!(rc, 0);

    let status = record.wait().unwrap();
    assert_eq!(status.signal(), libc::SIGTERM);
    assert_eq!(status.code(), 0);
    assert!(!status.core_dumped());
    assert!(!status.success());
}

/// Test a child that kills itself
#[test]
fn test_self_inflicted_signal() {
    let record = spawn(
        probe(&["kill-self", &libc::SIGKILL.to_string()]),
        SpawnOptions::new(),
    )
    .expect("spawn");
    let status = record.wait().unwrap();
    assert_eq!(status.signal(), libc::SIGKILL);
    assert!(!status.success());
}

/// Test many overlapping children each get their own status
#[test]
fn test_concurrent_children_get_distinct_statuses() {
    let handles: Vec<_> = (0..16u8)
        .map(|code| {
            std::thread::spawn(move || {
                let mut record =
                    spawn(probe(&["exit", &code.to_string()]), SpawnOptions::new()).expect("spawn");
                record.close();
                (code, record.wait().expect("wait"))
            })
        })
        .collect();

    for handle in handles {
        let (code, status) = handle.join().unwrap();
        assert_eq!(status.code(), i32::from(code));
    }
}

/// Test that children are reaped even when nobody waits for them
#[test]
fn test_dropped_record_is_still_reaped() {
    let record = spawn(probe(&["exit", "9"]), SpawnOptions::new()).expect("spawn");
    let state = record.state().clone();
    drop(record);

    let deadline = Instant::now() + Duration::from_secs(10);
    while state.status().is_none() {
        assert!(Instant::now() < deadline, "child was never reaped");
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(state.exit_code(), Some(9));
}

/// Test the completion callback
#[test]
fn test_on_exit_callback_runs_once() {
    let (tx, rx) = mpsc::channel();
    let record = spawn(
        probe(&["exit", "5"]),
        SpawnOptions::new().on_exit(move |state| {
            tx.send((state.pid(), state.exit_code())).unwrap();
        }),
    )
    .expect("spawn");
    let pid = record.pid();
    record.wait().unwrap();

    let (seen_pid, code) = rx.recv_timeout(Duration::from_secs(10)).expect("callback ran");
    assert_eq!(seen_pid, pid);
    assert_eq!(code, Some(5));
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

/// Test the blocking collector
#[test]
fn test_run_collecting_blocking() {
    let out = run_collecting_blocking(probe(&["echo"]), SpawnOptions::new().input("abc")).unwrap();
    assert_eq!(out, b"abc");

    let err = run_collecting_blocking(probe(&["stderr", "bad\n", "2"]), SpawnOptions::new())
        .unwrap_err();
    match err {
        CoreError::NonZeroExit {
            exit_code,
            signal,
            stderr,
        } => {
            assert_eq!(exit_code, 2);
            assert_eq!(signal, 0);
            assert_eq!(stderr, "bad");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

/// Test the async collector
#[tokio::test]
async fn test_run_collecting_async() {
    let out = run_collecting(probe(&["echo"]), SpawnOptions::new().input("from tokio"))
        .await
        .unwrap();
    assert_eq!(out, b"from tokio");

    let err = run_collecting(probe(&["stderr", "nope", "7"]), SpawnOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), Some(7));
}

/// Test waiting from async code
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wait_async() {
    let mut record = spawn(probe(&["sleep", "20"]), SpawnOptions::new()).expect("spawn");
    record.close();
    let status = record.wait_async().await.unwrap();
    assert!(status.success());
    assert_eq!(record.wait_async().await.unwrap(), status);
}
