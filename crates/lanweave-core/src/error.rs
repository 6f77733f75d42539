//! Node error types
//!
//! [`CoreError`] is the external result taxonomy returned by every public
//! node operation. Collaborator subsystems report [`ServiceError`], which
//! is converted once at the public boundary.

use thiserror::Error;

use crate::network::NetworkId;

/// Errors reported by a collaborator subsystem (switch, topology,
/// multicaster)
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The subsystem could not allocate memory
    #[error("Subsystem out of memory")]
    OutOfMemory,

    /// Any other unexpected subsystem failure
    #[error("{0}")]
    Internal(String),
}

/// The result taxonomy of the public node operations
///
/// Only the fatal kinds render the node unusable; the others are
/// per-call failures and the node remains operational.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The network is not joined
    #[error("Network not found: {0}")]
    NetworkNotFound(NetworkId),

    /// Unexpected failure while handling a wire packet
    #[error("Invalid or undecodable packet")]
    PacketInvalid,

    /// Allocation failure in the core or a subsystem
    #[error("Out of memory")]
    OutOfMemory,

    /// The embedder's persistent store failed while writing the named
    /// object during construction
    #[error("Data store failed writing {0}")]
    DataStoreFailed(&'static str),

    /// Unclassified failure from a subsystem
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether this error renders the node unusable
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::OutOfMemory | CoreError::DataStoreFailed(_) | CoreError::Internal(_)
        )
    }
}

impl From<ServiceError> for CoreError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::OutOfMemory => CoreError::OutOfMemory,
            ServiceError::Internal(msg) => CoreError::Internal(msg),
        }
    }
}

/// Result type for node operations
pub type CoreResult<T> = Result<T, CoreError>;
