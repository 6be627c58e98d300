//! Core functionality for spawnkit
//!
//! Fork/exec child processes with piped stdio, reap them on SIGCHLD, and
//! load launch descriptions from TOML. Shared by the `spawnkit` CLI and the
//! integration test helper binary.

pub mod config;
pub mod error;
#[cfg(unix)]
pub mod process;


// Re-export schema types for convenience
pub use schema::*;

pub use error::{CoreError, Result};

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for the application
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| crate::CoreError::InitializationError(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }

    /// Render bytes captured from a child for display
    pub fn lossy_output(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).trim_end_matches('\n').to_string()
    }
}
