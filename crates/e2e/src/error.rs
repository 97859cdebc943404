//! Error types for scenario fixtures

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Fixture error: {0}")]
    Fixture(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("reclog error: {0}")]
    Reclog(#[from] reclog_common::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;
