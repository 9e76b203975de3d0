//! Packaging error types.

use std::path::PathBuf;

use courier_protocol::ServiceError;
use courier_transfer::TransferError;

use crate::planner::PlanError;

/// Errors produced while packaging a plan. All of them are fatal for the request.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("media tool error: {0}")]
    Media(#[from] ServiceError),

    #[error("{} is {size} bytes, above the {ceiling}-byte ceiling", path.display())]
    Oversized {
        path: PathBuf,
        size: u64,
        ceiling: u64,
    },

    #[error("planning failed: {0}")]
    Planning(#[from] PlanError),

    #[error("cancelled")]
    Cancelled,

    #[error("worker failed: {0}")]
    Worker(String),
}

impl From<TransferError> for PackageError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Io(e) => PackageError::Io(e),
            other => PackageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                other.to_string(),
            )),
        }
    }
}
