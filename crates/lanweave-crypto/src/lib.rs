//! LanWeave Identity Primitives
//!
//! This crate provides the cryptographic identity of a LanWeave node:
//! - Long-lived Ed25519 signing keys and X25519 encryption keys
//! - The short node Address derived from the signing public key
//! - Printable identity serialization (with or without private halves)
//! - Key agreement for the packet layer

pub mod error;
pub mod identity;
pub mod keys;

pub use error::{CryptoError, CryptoResult};
pub use identity::{Address, Identity, Signature};
pub use keys::{KeyPair, PublicKey, SecretKey, SharedSecret};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::*;
    pub use crate::identity::*;
    pub use crate::keys::*;
}

/// Protocol constants
pub mod constants {
    /// X25519 key size in bytes
    pub const X25519_KEY_SIZE: usize = 32;

    /// Ed25519 key size in bytes (public or secret)
    pub const ED25519_KEY_SIZE: usize = 32;

    /// Ed25519 signature size
    pub const SIGNATURE_SIZE: usize = 64;

    /// Node address size (truncated BLAKE3 hash)
    pub const ADDRESS_SIZE: usize = 5;
}
