//! Error types for the Tollgate service.

use thiserror::Error;

use crate::mesh::ClusterError;
use crate::ratelimit::StoreError;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A policy with a zero or out-of-range limit or window
    #[error("Invalid rate limit policy: {0}")]
    InvalidPolicy(String),

    /// No policy is configured for the scope and there is no default
    #[error("No rate limit policy configured for scope '{0}'")]
    UnknownScope(String),

    /// Entry store errors surfaced by admin operations
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Gossip mesh errors
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// gRPC server errors
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::transport::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TollgateError {
    fn from(err: config::ConfigError) -> Self {
        TollgateError::Config(err.to_string())
    }
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
