use thiserror::Error;

use crate::alphabet::SearchSpace;

/// Errors raised while configuring a search or touching its checkpoints.
///
/// Oracle failures are not part of this enum: they are counted per attempt
/// and only surface as a [`crate::RunOutcome::Failed`] value.
#[derive(Error, Debug)]
pub enum SearchError {
    /// Invalid search space or engine parameters. Fatal before the run starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("checkpoint I/O error: {0}")]
    CheckpointIo(#[from] std::io::Error),

    #[error("checkpoint format error: {0}")]
    CheckpointFormat(#[from] serde_json::Error),

    /// A checkpoint exists for the run identity but was produced by another search space.
    #[error(
        "checkpoint for `{identity}` was produced by {found}, refusing to resume {expected}"
    )]
    CheckpointMismatch {
        identity: String,
        expected: SearchSpace,
        found: SearchSpace,
    },

    #[error("corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),
}

pub type Result<T> = std::result::Result<T, SearchError>;

/// Failure reported by an oracle for a single candidate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("oracle error: {message}")]
pub struct OracleError {
    pub message: String,
}

impl OracleError {
    pub fn new(message: impl Into<String>) -> Self {
        OracleError {
            message: message.into(),
        }
    }
}
