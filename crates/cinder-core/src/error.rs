//! Error types for Cinder.

use thiserror::Error;

use crate::BuildStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: BuildStatus, to: BuildStatus },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
