use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid UniProt accession: {0}")]
    InvalidAccession(String),

    #[error("invalid ProteomeXchange project accession: {0}")]
    InvalidProjectAccession(String),

    #[error("invalid peptide sequence: {0}")]
    InvalidPeptide(String),

    #[error("malformed USI: {0}")]
    MalformedUsi(String),

    #[error("unknown source database: {0}")]
    UnknownSource(String),

    #[error("{source_name} returned status {status} for {url}")]
    UpstreamStatus {
        source_name: String,
        status: u16,
        url: String,
    },

    #[error("network failure: {0}")]
    TransientNetwork(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("{source_name} response could not be interpreted: {message}")]
    MalformedResponse {
        source_name: String,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid mapper transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid task state transition from {from} to {to}")]
    InvalidTaskState { from: String, to: String },

    #[error("task {task} failed: {message}")]
    TaskRunning { task: String, message: String },

    #[error("missing query config file")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl KiraError {
    /// Failures worth another attempt after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, KiraError::TransientNetwork(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_failures_are_transient() {
        assert!(KiraError::TransientNetwork("timeout".to_string()).is_transient());
        assert!(
            !KiraError::UpstreamStatus {
                source_name: "PRIDE".to_string(),
                status: 404,
                url: "https://example.org".to_string(),
            }
            .is_transient()
        );
        assert!(!KiraError::Http("builder".to_string()).is_transient());
    }
}
