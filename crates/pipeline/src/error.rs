//! Pipeline error types.

use std::fmt;

use courier_packager::{PackageError, PlanError};
use courier_protocol::{ServiceError, TransportError};

/// Why a source could not be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionErrorKind {
    InvalidSource,
    NotFound,
    NetworkFailure,
    SourceTimeout,
    /// The request was cancelled while acquiring.
    Cancelled,
}

impl fmt::Display for AcquisitionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AcquisitionErrorKind::InvalidSource => "invalid source",
            AcquisitionErrorKind::NotFound => "not found",
            AcquisitionErrorKind::NetworkFailure => "network failure",
            AcquisitionErrorKind::SourceTimeout => "source timed out",
            AcquisitionErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Failure of a source acquirer, after its internal retries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct AcquisitionError {
    pub kind: AcquisitionErrorKind,
    pub message: String,
}

impl AcquisitionError {
    pub fn new(kind: AcquisitionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(AcquisitionErrorKind::InvalidSource, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(AcquisitionErrorKind::NotFound, message)
    }

    pub fn cancelled() -> Self {
        Self::new(AcquisitionErrorKind::Cancelled, "request cancelled")
    }
}

impl From<ServiceError> for AcquisitionError {
    fn from(err: ServiceError) -> Self {
        let kind = match &err {
            ServiceError::Timeout(_) => AcquisitionErrorKind::SourceTimeout,
            ServiceError::NotFound(_) => AcquisitionErrorKind::NotFound,
            ServiceError::Invalid(_) => AcquisitionErrorKind::InvalidSource,
            ServiceError::Network(_)
            | ServiceError::Status { .. }
            | ServiceError::Unauthorized
            | ServiceError::Tool(_)
            | ServiceError::Io(_) => AcquisitionErrorKind::NetworkFailure,
        };
        Self::new(kind, err.to_string())
    }
}

/// Errors that end a request.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("acquisition failed: {0}")]
    Acquisition(AcquisitionError),

    #[error("planning failed: {0}")]
    PlanningImpossible(#[from] PlanError),

    #[error("packaging failed: {0}")]
    Packaging(PackageError),

    #[error("part {part} of {total} failed: {source}")]
    PartialDelivery {
        part: usize,
        total: usize,
        source: TransportError,
    },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,
}

impl From<AcquisitionError> for PipelineError {
    fn from(err: AcquisitionError) -> Self {
        match err.kind {
            AcquisitionErrorKind::Cancelled => PipelineError::Cancelled,
            _ => PipelineError::Acquisition(err),
        }
    }
}

impl From<PackageError> for PipelineError {
    fn from(err: PackageError) -> Self {
        match err {
            PackageError::Cancelled => PipelineError::Cancelled,
            PackageError::Planning(e) => PipelineError::PlanningImpossible(e),
            other => PipelineError::Packaging(other),
        }
    }
}

impl PipelineError {
    /// The single chat message shown to the user when a request fails.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::InvalidInput(msg) => format!("⚠️ {msg}"),
            PipelineError::Acquisition(e) => match e.kind {
                AcquisitionErrorKind::InvalidSource => format!("⚠️ {}", e.message),
                AcquisitionErrorKind::NotFound => format!("❌ Not found: {}", e.message),
                AcquisitionErrorKind::NetworkFailure => {
                    format!("❌ Download failed: {}", e.message)
                }
                AcquisitionErrorKind::SourceTimeout => {
                    format!("⌛ The source took too long to respond: {}", e.message)
                }
                AcquisitionErrorKind::Cancelled => "❌ Cancelled.".into(),
            },
            PipelineError::PlanningImpossible(e) => format!("❌ Could not prepare the files: {e}"),
            PipelineError::Packaging(e) => format!("❌ Packaging failed: {e}"),
            PipelineError::PartialDelivery { part, total, source } => {
                format!("❌ Part {part} of {total} failed to send: {source}")
            }
            PipelineError::Transport(e) => format!("❌ Could not send: {e}"),
            PipelineError::Io(e) => format!("❌ Internal error: {e}"),
            PipelineError::Cancelled => "❌ Cancelled.".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_errors_map_to_acquisition_kinds() {
        let timeout: AcquisitionError = ServiceError::Timeout("read".into()).into();
        assert_eq!(timeout.kind, AcquisitionErrorKind::SourceTimeout);

        let missing: AcquisitionError = ServiceError::NotFound("404".into()).into();
        assert_eq!(missing.kind, AcquisitionErrorKind::NotFound);

        let status: AcquisitionError = ServiceError::Status {
            status: 502,
            body: String::new(),
        }
        .into();
        assert_eq!(status.kind, AcquisitionErrorKind::NetworkFailure);
    }

    #[test]
    fn cancelled_acquisition_is_pipeline_cancellation() {
        assert!(matches!(
            PipelineError::from(AcquisitionError::cancelled()),
            PipelineError::Cancelled
        ));
        assert!(matches!(
            PipelineError::from(AcquisitionError::not_found("x")),
            PipelineError::Acquisition(_)
        ));
    }

    #[test]
    fn package_cancellation_is_pipeline_cancellation() {
        assert!(matches!(
            PipelineError::from(PackageError::Cancelled),
            PipelineError::Cancelled
        ));
        assert!(matches!(
            PipelineError::from(PackageError::Worker("boom".into())),
            PipelineError::Packaging(_)
        ));
    }

    #[test]
    fn partial_delivery_message_names_the_part() {
        let err = PipelineError::PartialDelivery {
            part: 2,
            total: 3,
            source: TransportError::Other("file too big".into()),
        };
        assert!(err.user_message().contains("Part 2 of 3 failed"));
    }
}
