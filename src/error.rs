//! Error types for the backend pipeline.
//!
//! Using thiserror for more idiomatic error handling. Every variant except
//! [`PipelineError::FrontendErrors`] corresponds to a diagnostic the driver
//! reports exactly once before aborting; `FrontendErrors` is a silent abort
//! because the originating collaborator already reported the problem.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no target registered for triple '{triple}': {reason}")]
    UnknownTarget { triple: String, reason: String },

    #[error("cannot create target machine for '{triple}': {reason}")]
    TargetMachineCreation { triple: String, reason: String },

    #[error("cannot open output file '{}': {source}", .path.display())]
    OutputOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write output file '{}': {source}", .path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot initialize code generation: {reason}")]
    CodegenInit { reason: String },

    #[error("frontend reported errors; no output produced")]
    FrontendErrors,
}

/// Result type alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = PipelineError::UnknownTarget {
            triple: "bogus-unknown-none".to_string(),
            reason: "unknown architecture 'bogus'".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("bogus-unknown-none"));
        assert!(text.contains("unknown architecture"));
    }
}
