use thiserror::Error;

use crate::port::PortError;

/// A failed item inside a batch request, reported with its position.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ItemFailure {
    pub index: usize,
    pub message: String,
}

/// Failure classes surfaced to the operator.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("no job is registered for this request")]
    NoJobForRequest,
    #[error("the specified job cannot be executed remotely")]
    NotTransportable,
    #[error("{0}")]
    NotFound(&'static str),
    #[error("a port could not be allocated")]
    AllocationFailed,
    #[error("{0}")]
    RemoteDispatch(String),
    #[error("{0}")]
    Simple(String),
    #[error("{message}")]
    Structured {
        message: String,
        failures: Vec<ItemFailure>,
    },
}

impl JobError {
    pub fn simple(message: impl Into<String>) -> Self {
        Self::Simple(message.into())
    }

    /// Exit code reported to the shell when this failure terminates a job.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

impl From<PortError> for JobError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::AllocationFailed => Self::AllocationFailed,
            other => Self::Simple(other.to_string()),
        }
    }
}

impl From<std::io::Error> for JobError {
    fn from(err: std::io::Error) -> Self {
        Self::Simple(err.to_string())
    }
}
