//! Error types for the playback engine

use thiserror::Error;

/// Main error type for the engine
///
/// Command-level validation failures are returned synchronously to the caller.
/// Stage failures never cross task boundaries as `Err`; they travel as
/// [`StageEvent`](crate::pipeline::stage::StageEvent)s and drive the state machine.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Reserved policy error; most out-of-state commands are no-ops instead.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Not produced by the buffering logic, which has no hard timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine is shut down")]
    EngineClosed,
}

/// Pipeline stage errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("Failed to open source: {0}")]
    Open(String),

    #[error("Read failed: {0}")]
    Read(String),

    #[error("Decoding failed: {0}")]
    Decode(String),

    #[error("Output failed: {0}")]
    Output(String),

    #[error("Failed to spawn stage: {0}")]
    Spawn(String),

    #[error("Unsupported source: {0}")]
    Unsupported(String),
}

/// Settings persistence errors
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Settings IO failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable kind, used by the control surface
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid_argument",
            Error::InvalidState(_) => "invalid_state",
            Error::ResourceExhausted(_) => "resource_exhausted",
            Error::Timeout(_) => "timeout",
            Error::Fatal(_) | Error::Stage(_) => "fatal",
            Error::Settings(_) | Error::Io(_) => "io",
            Error::Config(_) => "config",
            Error::EngineClosed => "closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_converts() {
        let err: Error = StageError::Decode("bad frame".into()).into();
        assert_eq!(err.kind(), "fatal");
        assert!(err.to_string().contains("bad frame"));
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(Error::InvalidArgument("x".into()).kind(), "invalid_argument");
        assert_eq!(Error::EngineClosed.kind(), "closed");
    }
}
