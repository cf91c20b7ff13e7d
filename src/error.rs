use crate::config::ConfigError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DenoiseError>;

#[derive(Error, Debug)]
pub enum DenoiseError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Failed to read input audio {}: {reason}", .path.display())]
    InputRead { path: PathBuf, reason: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error(
        "Stream interrupted after {chunks_sent} chunks sent and {responses_received} responses received: {reason}"
    )]
    StreamInterrupted {
        reason: String,
        chunks_sent: usize,
        responses_received: usize,
    },

    #[error("Timed out after {after:?} waiting for the response to chunk {sequence}")]
    Timeout { sequence: usize, after: Duration },

    #[error("Streaming was cancelled")]
    Cancelled,

    #[error("Failed to write output audio {}: {reason}", .path.display())]
    OutputWrite { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl DenoiseError {
    /// True for failures that happened mid-stream, where the partial output is discarded.
    pub fn is_stream_interruption(&self) -> bool {
        matches!(
            self,
            DenoiseError::StreamInterrupted { .. } | DenoiseError::Timeout { .. }
        )
    }

    pub(crate) fn input_read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        DenoiseError::InputRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn output_write(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        DenoiseError::OutputWrite {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
