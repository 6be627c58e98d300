//! Helper child used by the integration tests
//!
//! Each subcommand exercises one thing a spawned child can observe or do:
//!
//! - `report`: print argv, cwd, environment and everything read from stdin as JSON
//! - `echo`: copy stdin to stdout
//! - `exit <code>`: exit with `code`
//! - `stderr <text> <code>`: write `text` to stderr, then exit with `code`
//! - `sleep <ms>`: sleep, then exit 0
//! - `stdin-open`: report whether stdin was still open (no EOF within 200ms)
//! - `kill-self <signal>`: terminate with `signal`

use serde_json::json;
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::process::ExitCode;
use std::time::Duration;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("spawnkit-probe: {}", e);
            ExitCode::from(2)
        }
    }
}

fn run(args: &[String]) -> Result<ExitCode, String> {
    let command = args.get(1).map(String::as_str).unwrap_or("report");
    match command {
        "report" => {
            let mut input = String::new();
            io::stdin()
                .read_to_string(&mut input)
                .map_err(|e| format!("reading stdin: {}", e))?;
            let env: BTreeMap<String, String> = std::env::vars().collect();
            let cwd = std::env::current_dir().map_err(|e| format!("cwd: {}", e))?;
            let report = json!({
                "argv": args,
                "cwd": cwd,
                "env": env,
                "stdin": input,
            });
            println!("{}", report);
            Ok(ExitCode::SUCCESS)
        }
        "echo" => {
            io::copy(&mut io::stdin(), &mut io::stdout()).map_err(|e| format!("echo: {}", e))?;
            Ok(ExitCode::SUCCESS)
        }
        "exit" => Ok(ExitCode::from(parse::<u8>(args.get(2), "exit code")?)),
        "stderr" => {
            let text = args.get(2).ok_or("stderr: missing text")?;
            eprint!("{}", text);
            io::stderr().flush().map_err(|e| format!("flush: {}", e))?;
            Ok(ExitCode::from(parse::<u8>(args.get(3), "exit code")?))
        }
        "sleep" => {
            let ms = parse::<u64>(args.get(2), "milliseconds")?;
            std::thread::sleep(Duration::from_millis(ms));
            Ok(ExitCode::SUCCESS)
        }
        "stdin-open" => Ok(stdin_open()),
        "kill-self" => {
            let signal = parse::<i32>(args.get(2), "signal")?;
            // SAFETY: plain syscalls on our own pid
            unsafe {
                libc::signal(signal, libc::SIG_DFL);
                libc::kill(libc::getpid(), signal);
            }
            std::thread::sleep(Duration::from_secs(5));
            Err(format!("still alive after signal {}", signal))
        }
        other => Err(format!("unknown command '{}'", other)),
    }
}

fn stdin_open() -> ExitCode {
    let mut pfd = libc::pollfd {
        fd: libc::STDIN_FILENO,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: one valid pollfd
    let ready = unsafe { libc::poll(&mut pfd, 1, 200) };
    let open = ready == 0;
    println!("{}", json!({ "stdinOpen": open }));
    ExitCode::SUCCESS
}

fn parse<T: std::str::FromStr>(arg: Option<&String>, what: &str) -> Result<T, String> {
    arg.ok_or_else(|| format!("missing {}", what))?
        .parse()
        .map_err(|_| format!("invalid {}", what))
}
