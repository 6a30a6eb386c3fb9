//! Error types for ondemand.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Unsupported directive or property, or a layout missing a required container.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing or malformed ambient configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Failure reported by the orchestrator (throttling, capacity, consistency lag).
    #[error("orchestrator error: {0}")]
    Orchestrator(String),

    #[error("task submission failed after {attempts} attempts: {last_error}")]
    SubmissionExhausted { attempts: u32, last_error: String },

    #[error("template library error: {0}")]
    TemplateLibrary(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether handling the same job again later could succeed. Validation and
    /// configuration failures repeat identically on every attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Orchestrator(_) | Error::SubmissionExhausted { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_submission_failures_are_transient() {
        assert!(Error::Orchestrator("throttled".to_string()).is_transient());
        assert!(
            Error::SubmissionExhausted {
                attempts: 5,
                last_error: "capacity".to_string()
            }
            .is_transient()
        );
        assert!(!Error::Validation("bad directive".to_string()).is_transient());
        assert!(!Error::Configuration("no subnets".to_string()).is_transient());
        assert!(!Error::TemplateLibrary("missing".to_string()).is_transient());
        assert!(!Error::Internal("digest".to_string()).is_transient());
    }
}
