use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoreError {
    #[error("Failed to extract text from {file_name}: {reason}")]
    Extraction { file_name: String, reason: String },
    #[error("Failed to parse resume: {0}")]
    Parse(String),
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Persistence failed: {message}")]
    Persistence { message: String, retryable: bool },
    #[error("Job not found: {0}")]
    JobNotFound(String),
    #[error("Candidate not found: {0}")]
    CandidateNotFound(String),
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl CoreError {
    pub fn persistence(message: impl Into<String>, retryable: bool) -> Self {
        CoreError::Persistence {
            message: message.into(),
            retryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Persistence {
                retryable: true,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_persistence_errors_are_retryable() {
        assert!(CoreError::persistence("pool timeout", true).is_retryable());
        assert!(!CoreError::persistence("constraint violated", false).is_retryable());
        assert!(!CoreError::Configuration("weights".into()).is_retryable());
    }
}
