//! Core error types and utilities

use thiserror::Error;

/// Core-specific error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("Invalid argv: {0}")]
    InvalidArgv(String),

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Pipe allocation failed: {0}")]
    PipeAllocationFailed(String),

    #[error("Fork failed: {0}")]
    ForkFailed(String),

    #[error("Child setup failed: {0}")]
    ChildSetupFailed(String),

    #[error("Process wait error: {0}")]
    ProcessWait(String),

    #[error("Process exited with code {exit_code} (signal {signal}): {stderr}")]
    NonZeroExit {
        exit_code: i32,
        signal: i32,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Generic error: {0}")]
    Other(String),
}

impl CoreError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ConfigurationError(_) => "CORE001",
            CoreError::ValidationError(_) => "CORE002",
            CoreError::InitializationError(_) => "CORE003",
            CoreError::InvalidArgv(_) => "CORE010",
            CoreError::CommandNotFound(_) => "CORE011",
            CoreError::PipeAllocationFailed(_) => "CORE012",
            CoreError::ForkFailed(_) => "CORE013",
            CoreError::ChildSetupFailed(_) => "CORE014",
            CoreError::ProcessWait(_) => "CORE015",
            CoreError::NonZeroExit { .. } => "CORE016",
            CoreError::IoError(_) => "CORE005",
            CoreError::SerializationError(_) => "CORE006",
            CoreError::Other(_) => "CORE999",
        }
    }

    /// Exit code carried by a `NonZeroExit` error
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            CoreError::NonZeroExit { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;

// Convenience implementations
impl From<&str> for CoreError {
    fn from(s: &str) -> Self {
        CoreError::Other(s.to_string())
    }
}

impl From<String> for CoreError {
    fn from(s: String) -> Self {
        CoreError::Other(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(CoreError::ConfigurationError("test".to_string()).code(), "CORE001");
        assert_eq!(CoreError::InvalidArgv("test".to_string()).code(), "CORE010");
        assert_eq!(CoreError::CommandNotFound("test".to_string()).code(), "CORE011");
        assert_eq!(CoreError::ForkFailed("test".to_string()).code(), "CORE013");
        assert_eq!(CoreError::Other("test".to_string()).code(), "CORE999");
    }

    #[test]
    fn test_non_zero_exit_display() {
        let error = CoreError::NonZeroExit {
            exit_code: 2,
            signal: 0,
            stderr: "no such file".to_string(),
        };
        assert_eq!(error.to_string(), "Process exited with code 2 (signal 0): no such file");
        assert_eq!(error.exit_code(), Some(2));
        assert_eq!(CoreError::Other("x".to_string()).exit_code(), None);
    }

    #[test]
    fn test_from_implementations() {
        let error: CoreError = "test error".into();
        assert_eq!(error.to_string(), "Generic error: test error");

        let error: CoreError = "test error".to_string().into();
        assert_eq!(error.to_string(), "Generic error: test error");
    }
}
