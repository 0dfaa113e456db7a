use thiserror::Error;

use crate::coordinator::CoordinatorError;

/// Worker-scoped errors: anything that should stop the worker (exit 1)
/// rather than fail an individual task.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("{0}")]
    Config(String),

    #[error("metadata lookup failed: {0}")]
    Metadata(String),

    #[error("activity registration failed: {0}")]
    Registration(#[from] CoordinatorError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
