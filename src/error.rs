use thiserror::Error;

use crate::config::Violation;
use crate::flag::ValueKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures raised by the synchronization and resolution paths.
///
/// Expected resolution outcomes (not ready, not found, blank key) are not
/// errors; they come back as [`crate::ResolutionDetails`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("missing a builder for {0}")]
    UnsupportedVariant(ValueKind),

    #[error("fetching feature flags failed with status {code:?}: {message}")]
    SyncFailed { code: tonic::Code, message: String },

    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("failed to encode flag value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("flag '{key}' holds a {found} value, {expected} was requested")]
    TypeMismatch {
        key: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("invalid configuration: {}", format_violations(.0))]
    InvalidConfiguration(Vec<Violation>),

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Error::SyncFailed {
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Error::SyncFailed {
            code: tonic::Code::Unavailable,
            message: err.to_string(),
        }
    }
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
