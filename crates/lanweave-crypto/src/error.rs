//! Identity error types

use thiserror::Error;

/// Errors that can occur while handling node identities
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid key length provided
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Invalid public key
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// Invalid signature format
    #[error("Invalid signature format")]
    InvalidSignature,

    /// Signature verification failed
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    /// Identity string could not be parsed
    #[error("Malformed identity: {0}")]
    MalformedIdentity(String),

    /// Identity address does not match its public keys
    #[error("Identity address does not match its keys")]
    AddressMismatch,

    /// Operation needs the private half of an identity that has none
    #[error("Identity has no private key")]
    MissingPrivateKey,

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Result type for identity operations
pub type CryptoResult<T> = Result<T, CryptoError>;
