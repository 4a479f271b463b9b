// Run Errors
// Error taxonomy for a pipeline run and its exit-code mapping

use crate::spec::SpecError;

use std::io;
use std::process::ExitStatus;
use thiserror::Error;

/// Result type for pipeline run operations
pub type RunResult<T> = Result<T, RunError>;

/// Errors that can end a pipeline run
#[derive(Debug, Error)]
pub enum RunError {
    /// The pipeline specification was malformed or unreadable. Fatal before
    /// any stage is spawned; no telemetry has been emitted.
    #[error("configuration error: {0}")]
    Config(#[from] SpecError),

    /// A stage executable could not be located or failed to start.
    #[error("failed to spawn stage '{stage}': {source}")]
    Spawn {
        stage: String,
        #[source]
        source: io::Error,
    },

    /// A link's relay loop hit an unrecoverable read or write fault.
    #[error("relay I/O error on link '{link}': {source}")]
    RelayIo {
        link: String,
        #[source]
        source: io::Error,
    },

    /// A stage process terminated with a non-success status.
    #[error("stage '{stage}' failed ({status})")]
    StageExit { stage: String, status: ExitStatus },

    /// The run was cancelled by an external interrupt (SIGINT).
    #[error("pipeline interrupted")]
    Interrupted,

    /// An I/O failure outside the relay loops (reaping a child, writing
    /// telemetry to the output channel).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl RunError {
    /// Process exit code for this failure. Configuration and spawn errors
    /// happen before any data flows and map to 2; mid-pipeline failures map
    /// to 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Config(_) | RunError::Spawn { .. } => 2,
            RunError::RelayIo { .. }
            | RunError::StageExit { .. }
            | RunError::Interrupted
            | RunError::Io(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_config_errors() {
        let err = RunError::Config(SpecError::Empty);
        assert_eq!(err.exit_code(), 2);

        let err = RunError::Spawn {
            stage: "sed".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_runtime_errors() {
        let err = RunError::RelayIo {
            link: "cat-to-sed".to_string(),
            source: io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"),
        };
        assert_eq!(err.exit_code(), 1);
        assert_eq!(RunError::Interrupted.exit_code(), 1);
    }

    #[test]
    fn test_display_names_the_stage() {
        let err = RunError::Spawn {
            stage: "sed".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        assert!(err.to_string().contains("sed"));
    }
}
