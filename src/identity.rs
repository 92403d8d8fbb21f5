//! Agent identity keypair
//!
//! Each agent owns one Ed25519 keypair, generated lazily the first time its
//! configuration is loaded and never regenerated afterwards. Keys are stored
//! as unpadded base64url strings so they embed cleanly in the JSON config:
//!
//! - `public_key`: 32 raw bytes
//! - `private_key`: 64 raw bytes (32-byte seed followed by the public key)
//!
//! Every key read from disk or network must pass through
//! [`decode_public_key`] / [`decode_private_key`] before use.

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::{SigningKey, VerifyingKey, KEYPAIR_LENGTH, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Raw length of an encoded public key
pub const PUBLIC_KEY_LEN: usize = PUBLIC_KEY_LENGTH;

/// Raw length of an encoded private key (seed + public key)
pub const PRIVATE_KEY_LEN: usize = KEYPAIR_LENGTH;

/// Identity errors
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("decode {key} key: {source}")]
    Decode {
        key: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("invalid {key} key length: expected {expected}, got {actual}")]
    InvalidLength {
        key: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("generate ed25519 keypair: {0}")]
    KeyGeneration(String),

    #[error("private key does not match its embedded public key")]
    KeyMismatch,
}

/// An Ed25519 keypair in encoded form, suitable for storage in the config file.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    /// base64url encoded (32 bytes)
    #[serde(default)]
    pub public_key: String,

    /// base64url encoded (64 bytes)
    #[serde(default)]
    pub private_key: String,
}

impl KeyPair {
    /// Generate a new keypair from the OS random source.
    ///
    /// A failing random source is unrecoverable for the caller; there is no
    /// safe retry for key generation.
    pub fn generate() -> Result<Self, IdentityError> {
        let mut seed = [0u8; SECRET_KEY_LENGTH];
        OsRng
            .try_fill_bytes(&mut seed)
            .map_err(|e| IdentityError::KeyGeneration(e.to_string()))?;

        let signing_key = SigningKey::from_bytes(&seed);
        Ok(Self::from_signing_key(&signing_key))
    }

    /// Encode an existing signing key.
    pub fn from_signing_key(signing_key: &SigningKey) -> Self {
        Self {
            public_key: encode(signing_key.verifying_key().as_bytes()),
            private_key: encode(&signing_key.to_keypair_bytes()),
        }
    }

    /// Both halves are present. Says nothing about whether they decode.
    pub fn is_populated(&self) -> bool {
        !self.public_key.is_empty() && !self.private_key.is_empty()
    }

    /// Decoded 64-byte private key.
    pub fn private_key_bytes(&self) -> Result<[u8; PRIVATE_KEY_LEN], IdentityError> {
        decode_private_key(&self.private_key)
    }

    /// Rebuild the signing key, checking that the stored public half matches the seed.
    pub fn signing_key(&self) -> Result<SigningKey, IdentityError> {
        let private = self.private_key_bytes()?;
        let signing_key =
            SigningKey::from_keypair_bytes(&private).map_err(|_| IdentityError::KeyMismatch)?;

        if signing_key.verifying_key().as_bytes() != &decode_public_key(&self.public_key)? {
            return Err(IdentityError::KeyMismatch);
        }
        Ok(signing_key)
    }

    /// Decode the public half into a verifying key.
    pub fn verifying_key(&self) -> Result<VerifyingKey, IdentityError> {
        let bytes = decode_public_key(&self.public_key)?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| IdentityError::KeyMismatch)
    }

    /// Full decode of both halves.
    pub fn validate(&self) -> Result<(), IdentityError> {
        self.signing_key().map(|_| ())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Generate a new Ed25519 keypair, base64url encoded without padding.
pub fn create_new_keypair() -> Result<KeyPair, IdentityError> {
    KeyPair::generate()
}

/// Decode a base64url public key, requiring exactly 32 bytes.
pub fn decode_public_key(encoded: &str) -> Result<[u8; PUBLIC_KEY_LEN], IdentityError> {
    decode_fixed("public", encoded)
}

/// Decode a base64url private key, requiring exactly 64 bytes.
pub fn decode_private_key(encoded: &str) -> Result<[u8; PRIVATE_KEY_LEN], IdentityError> {
    decode_fixed("private", encoded)
}

/// Unpadded base64url, the encoding used for keys, digests and signatures.
pub fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

fn decode_fixed<const N: usize>(key: &'static str, encoded: &str) -> Result<[u8; N], IdentityError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|source| IdentityError::Decode { key, source })?;

    bytes.try_into().map_err(|b: Vec<u8>| IdentityError::InvalidLength {
        key,
        expected: N,
        actual: b.len(),
    })
}
