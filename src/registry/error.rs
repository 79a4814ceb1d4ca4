//! Registry error types
//!
//! Error types for stream registry operations.

use super::node::NodeId;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Storage for a buffer, node or descriptor could not be obtained
    #[error("Allocation failed: {0}")]
    AllocationFailure(&'static str),

    /// A required handle or name was empty, or a contract was violated
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No stream matched the lookup
    #[error("Stream not found")]
    NotFound,

    /// A registered stream already carries this name
    #[error("Stream already exists: {0}")]
    AlreadyExists(String),

    /// The stream already has a consumer descriptor attached
    #[error("Stream already open: {0}")]
    AlreadyOpen(NodeId),

    /// No device context has been configured
    #[error("No device context set")]
    NoDevice,

    /// The registry has been shut down
    #[error("Registry is shut down")]
    ShutDown,
}

impl RegistryError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}
