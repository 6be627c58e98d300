//! Run a command to completion and collect its output

use super::launcher::spawn;
use super::options::SpawnOptions;
use super::record::ProcessRecord;
use crate::{CoreError, Result};
use std::io::Read;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Spawn `argv`, read stdout and stderr to EOF concurrently, wait for exit.
///
/// Returns stdout on success. A non-zero exit code or a terminating signal
/// yields [`CoreError::NonZeroExit`] carrying the captured stderr. Stdin is
/// closed straight away when `options` carries no input.
pub async fn run_collecting<I, S>(argv: I, options: SpawnOptions) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
    let mut record = tokio::task::spawn_blocking(move || spawn(argv, options))
        .await
        .map_err(|e| CoreError::Other(format!("spawn task failed: {}", e)))??;
    record.close_stdin();

    let stdout = take_async_stdout(&mut record)?;
    let stderr = take_async_stderr(&mut record)?;

    let read_stdout = async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stdout {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    };
    let read_stderr = async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stderr {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    };
    let (out, err) = tokio::try_join!(read_stdout, read_stderr)?;

    let status = record.wait_async().await?;
    finish(&record, status, out, err)
}

/// Blocking variant of [`run_collecting`]; stderr is drained on a helper thread
pub fn run_collecting_blocking<I, S>(argv: I, options: SpawnOptions) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut record = spawn(argv, options)?;
    record.close_stdin();

    let stderr_reader = record.take_stderr().map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf).map(|_| buf)
        })
    });

    let mut out = Vec::new();
    if let Some(pipe) = record.stdout() {
        pipe.read_to_end(&mut out)?;
    }
    let err = match stderr_reader {
        Some(handle) => handle
            .join()
            .map_err(|_| CoreError::Other("stderr reader thread panicked".to_string()))??,
        None => Vec::new(),
    };

    let status = record.wait()?;
    finish(&record, status, out, err)
}

fn take_async_stdout(
    record: &mut ProcessRecord,
) -> Result<Option<tokio::net::unix::pipe::Receiver>> {
    Ok(record.take_stdout().map(|p| p.into_async()).transpose()?)
}

fn take_async_stderr(
    record: &mut ProcessRecord,
) -> Result<Option<tokio::net::unix::pipe::Receiver>> {
    Ok(record.take_stderr().map(|p| p.into_async()).transpose()?)
}

fn finish(
    record: &ProcessRecord,
    status: super::status::ExitStatus,
    out: Vec<u8>,
    err: Vec<u8>,
) -> Result<Vec<u8>> {
    debug!(
        "pid {} finished with {} ({} bytes stdout, {} bytes stderr)",
        record.pid(),
        status,
        out.len(),
        err.len()
    );
    if status.success() {
        Ok(out)
    } else {
        Err(CoreError::NonZeroExit {
            exit_code: status.code(),
            signal: status.signal(),
            stderr: crate::utils::lossy_output(&err),
        })
    }
}
