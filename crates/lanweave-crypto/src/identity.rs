//! Node Identity
//!
//! Each node carries one long-lived identity:
//! - An Ed25519 signing keypair for authentication
//! - An X25519 encryption keypair for key agreement
//! - A short Address derived from the signing public key
//!
//! Identities serialize to a printable form suitable for a key/value
//! store, with or without the private halves:
//!
//! `address:1:<signing pub><encryption pub>[:<signing sec><encryption sec>]`

use ed25519_dalek::{
    Signature as Ed25519Sig, Signer, SigningKey, Verifier, VerifyingKey,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use crate::constants::{
    ADDRESS_SIZE, ED25519_KEY_SIZE, SIGNATURE_SIZE, X25519_KEY_SIZE,
};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::{KeyPair, PublicKey, SecretKey, SharedSecret};

/// Identity serialization format version
const IDENTITY_TYPE: u8 = 1;

/// A 40-bit node address (truncated BLAKE3 hash of the signing public key)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address {
    bytes: [u8; ADDRESS_SIZE],
}

/// Ed25519 signature
#[derive(Clone, Copy)]
pub struct Signature {
    bytes: [u8; SIGNATURE_SIZE],
}

/// The private halves of an identity
#[derive(ZeroizeOnDrop)]
struct IdentitySecret {
    #[zeroize(skip)]
    signing: SigningKey,
    #[zeroize(skip)]
    encryption: SecretKey,
}

/// A node's complete identity
///
/// The private halves are optional: identities parsed from their public
/// form can verify signatures and be compared, but cannot sign or agree.
pub struct Identity {
    address: Address,
    signing_public: [u8; ED25519_KEY_SIZE],
    encryption_public: PublicKey,
    secret: Option<IdentitySecret>,
}

impl Address {
    /// Create an address from raw bytes
    pub fn from_bytes(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self { bytes }
    }

    /// Derive the address for a signing public key
    pub fn from_signing_key(pubkey: &[u8; ED25519_KEY_SIZE]) -> Self {
        let hash = blake3::hash(pubkey);
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(&hash.as_bytes()[..ADDRESS_SIZE]);
        Self { bytes }
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.bytes
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex_encode(&self.bytes)
    }

    /// Parse from hex string
    pub fn from_hex(hex: &str) -> CryptoResult<Self> {
        let bytes = hex_decode(hex)?;
        if bytes.len() != ADDRESS_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: ADDRESS_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; ADDRESS_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self { bytes: arr })
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Signature {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self { bytes }
    }

    /// Try to create from slice
    pub fn try_from_slice(slice: &[u8]) -> CryptoResult<Self> {
        if slice.len() != SIGNATURE_SIZE {
            return Err(CryptoError::InvalidSignature);
        }
        let mut bytes = [0u8; SIGNATURE_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self { bytes })
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.bytes
    }
}

impl Identity {
    /// Generate a new random identity (with private halves)
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        let encryption = KeyPair::generate();
        let signing_public = signing.verifying_key().to_bytes();
        let address = Address::from_signing_key(&signing_public);

        Self {
            address,
            signing_public,
            encryption_public: encryption.public,
            secret: Some(IdentitySecret {
                signing,
                encryption: encryption.secret,
            }),
        }
    }

    /// Restore a full identity from raw secret key bytes
    pub fn from_secret_keys(
        signing: [u8; ED25519_KEY_SIZE],
        encryption: [u8; X25519_KEY_SIZE],
    ) -> Self {
        let signing = SigningKey::from_bytes(&signing);
        let encryption = SecretKey::from_bytes(encryption);
        let signing_public = signing.verifying_key().to_bytes();
        let address = Address::from_signing_key(&signing_public);
        let encryption_public = encryption.public_key();

        Self {
            address,
            signing_public,
            encryption_public,
            secret: Some(IdentitySecret {
                signing,
                encryption,
            }),
        }
    }

    /// The node's address
    pub fn address(&self) -> Address {
        self.address
    }

    /// The Ed25519 signing public key
    pub fn signing_public(&self) -> &[u8; ED25519_KEY_SIZE] {
        &self.signing_public
    }

    /// The X25519 encryption public key
    pub fn encryption_public(&self) -> PublicKey {
        self.encryption_public
    }

    /// Whether the private halves are present
    pub fn has_private(&self) -> bool {
        self.secret.is_some()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> CryptoResult<Signature> {
        let secret = self.secret.as_ref().ok_or(CryptoError::MissingPrivateKey)?;
        let sig = secret.signing.sign(message);
        Ok(Signature {
            bytes: sig.to_bytes(),
        })
    }

    /// Verify a signature made by this identity
    pub fn verify(&self, message: &[u8], signature: &Signature) -> CryptoResult<()> {
        let verifying_key = VerifyingKey::from_bytes(&self.signing_public)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let sig = Ed25519Sig::from_bytes(&signature.bytes);

        verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }

    /// Perform Diffie-Hellman against another identity's encryption key
    pub fn agree(&self, other: &Identity) -> CryptoResult<SharedSecret> {
        let secret = self.secret.as_ref().ok_or(CryptoError::MissingPrivateKey)?;
        Ok(secret.encryption.diffie_hellman(&other.encryption_public))
    }

    /// A copy of this identity without the private halves
    pub fn public_projection(&self) -> Identity {
        Identity {
            address: self.address,
            signing_public: self.signing_public,
            encryption_public: self.encryption_public,
            secret: None,
        }
    }

    /// Serialize, optionally including the private halves
    pub fn to_string_with_private(&self, include_private: bool) -> CryptoResult<String> {
        let mut s = format!(
            "{}:{}:{}{}",
            self.address.to_hex(),
            IDENTITY_TYPE,
            hex_encode(&self.signing_public),
            hex_encode(self.encryption_public.as_bytes()),
        );
        if include_private {
            let secret = self.secret.as_ref().ok_or(CryptoError::MissingPrivateKey)?;
            s.push(':');
            s.push_str(&hex_encode(&secret.signing.to_bytes()));
            s.push_str(&hex_encode(&secret.encryption.to_bytes()));
        }
        Ok(s)
    }
}

impl std::str::FromStr for Identity {
    type Err = CryptoError;

    fn from_str(s: &str) -> CryptoResult<Self> {
        let fields: Vec<&str> = s.trim().split(':').collect();
        if fields.len() != 3 && fields.len() != 4 {
            return Err(CryptoError::MalformedIdentity(format!(
                "expected 3 or 4 fields, got {}",
                fields.len()
            )));
        }
        if fields[1] != IDENTITY_TYPE.to_string() {
            return Err(CryptoError::MalformedIdentity(format!(
                "unknown identity type: {}",
                fields[1]
            )));
        }

        let address = Address::from_hex(fields[0])?;

        let public = hex_decode(fields[2])?;
        if public.len() != ED25519_KEY_SIZE + X25519_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: ED25519_KEY_SIZE + X25519_KEY_SIZE,
                actual: public.len(),
            });
        }
        let mut signing_public = [0u8; ED25519_KEY_SIZE];
        signing_public.copy_from_slice(&public[..ED25519_KEY_SIZE]);
        let encryption_public = PublicKey::try_from_slice(&public[ED25519_KEY_SIZE..])?;

        if Address::from_signing_key(&signing_public) != address {
            return Err(CryptoError::AddressMismatch);
        }

        let secret = if fields.len() == 4 {
            let sec = hex_decode(fields[3])?;
            if sec.len() != ED25519_KEY_SIZE + X25519_KEY_SIZE {
                return Err(CryptoError::InvalidKeyLength {
                    expected: ED25519_KEY_SIZE + X25519_KEY_SIZE,
                    actual: sec.len(),
                });
            }
            let mut signing_sec = [0u8; ED25519_KEY_SIZE];
            signing_sec.copy_from_slice(&sec[..ED25519_KEY_SIZE]);
            let mut enc_sec = [0u8; X25519_KEY_SIZE];
            enc_sec.copy_from_slice(&sec[ED25519_KEY_SIZE..]);

            let signing = SigningKey::from_bytes(&signing_sec);
            if signing.verifying_key().to_bytes() != signing_public {
                return Err(CryptoError::AddressMismatch);
            }
            let encryption = SecretKey::from_bytes(enc_sec);
            if encryption.public_key() != encryption_public {
                return Err(CryptoError::AddressMismatch);
            }
            Some(IdentitySecret {
                signing,
                encryption,
            })
        } else {
            None
        };

        Ok(Self {
            address,
            signing_public,
            encryption_public,
            secret,
        })
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display never includes the private halves
        match self.to_string_with_private(false) {
            Ok(s) => write!(f, "{}", s),
            Err(_) => Err(std::fmt::Error),
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identity({})", self.address.to_hex())
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
            && self.signing_public == other.signing_public
            && self.encryption_public == other.encryption_public
    }
}

impl Eq for Identity {}

impl Clone for Identity {
    fn clone(&self) -> Self {
        Self {
            address: self.address,
            signing_public: self.signing_public,
            encryption_public: self.encryption_public,
            secret: self.secret.as_ref().map(|s| IdentitySecret {
                signing: SigningKey::from_bytes(&s.signing.to_bytes()),
                encryption: s.encryption.clone(),
            }),
        }
    }
}

// Helper functions for hex encoding/decoding
fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hex_decode(hex: &str) -> CryptoResult<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(CryptoError::SerializationError("Invalid hex length".into()));
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| CryptoError::SerializationError("Invalid hex character".into()))
        })
        .collect()
}
