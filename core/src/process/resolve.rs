//! Command-path resolution for `argv[0]`

use crate::{CoreError, Result};
use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolve `program` to the path that will be executed.
///
/// An existing file is used as given (made absolute, since the child may
/// change directory before exec). Anything containing a `/` that does not
/// exist is an error; a bare name is searched for on `PATH`.
pub fn resolve_program(program: &str) -> Result<PathBuf> {
    resolve_program_in(program, std::env::var_os("PATH").as_deref())
}

/// Same as [`resolve_program`] with an explicit search path
pub fn resolve_program_in(program: &str, search_path: Option<&OsStr>) -> Result<PathBuf> {
    if program.is_empty() {
        return Err(CoreError::InvalidArgv("argv[0] cannot be empty".to_string()));
    }

    let path = Path::new(program);
    if path.is_file() {
        return absolute(path);
    }
    if program.contains('/') {
        return Err(CoreError::CommandNotFound(program.to_string()));
    }

    if let Some(search_path) = search_path {
        for dir in std::env::split_paths(search_path) {
            let candidate = dir.join(program);
            if is_executable(&candidate) {
                debug!("Resolved {} to {}", program, candidate.display());
                return absolute(&candidate);
            }
        }
    }

    Err(CoreError::CommandNotFound(program.to_string()))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
