//! Error types of the REST mirror.

use reqwest::StatusCode;
use thiserror::Error;

use crate::dao::storage::StorageError;

/// Convenient result alias returning [`RestMirrorError`] failures.
pub type RestResult<T> = Result<T, RestMirrorError>;

/// Failures that can occur while talking to the REST mirror.
#[derive(Debug, Error)]
pub enum RestMirrorError {
    /// Required environment variable is missing.
    #[error("missing mirror environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build mirror client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// A request could not be sent.
    #[error("failed to send mirror request to `{path}`")]
    RequestSend {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// The mirror answered with an unexpected status code.
    #[error("unexpected mirror response status {status} for `{path}`")]
    RequestStatus { path: String, status: StatusCode },
}

impl From<RestMirrorError> for StorageError {
    fn from(err: RestMirrorError) -> Self {
        StorageError::unavailable("rest mirror", err)
    }
}
