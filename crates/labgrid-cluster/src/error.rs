//! Cluster client error types.

use thiserror::Error;

/// Errors returned by cluster management calls.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("all cluster endpoints are unreachable: {0}")]
    Unreachable(String),

    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("cluster API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

pub type ClusterResult<T> = Result<T, ClusterError>;

impl From<reqwest::Error> for ClusterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClusterError::Decode(e.to_string())
        } else {
            ClusterError::Transport(e.to_string())
        }
    }
}
