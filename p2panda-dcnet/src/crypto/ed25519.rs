// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ed25519 signatures.
//!
//! The same primitives are used for two different keys: the long-term identity key every group
//! member authenticates its bulk messages with and the one-time pseudonymous key which is bound to
//! a slot during the key shuffle.
use std::fmt;

use ed25519_dalek::Signer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{Rng, RngError};

pub const SECRET_KEY_SIZE: usize = 32;

pub const PUBLIC_KEY_SIZE: usize = 32;

/// 512-bit signature.
pub const SIGNATURE_SIZE: usize = 64;

/// Ed25519 signing key.
#[derive(Clone)]
pub struct SigningKey(ed25519_dalek::SigningKey);

impl SigningKey {
    pub fn from_bytes(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&bytes))
    }

    /// Generates a fresh key, used for the one-time slot keys of every round.
    pub fn generate(rng: &Rng) -> Result<Self, RngError> {
        Ok(Self::from_bytes(rng.seed()?))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey(self.0.verifying_key().to_bytes())
    }

    pub fn sign(&self, bytes: &[u8]) -> Signature {
        Signature(self.0.sign(bytes).to_bytes())
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SigningKey")
            .field(&self.verifying_key().to_hex())
            .finish()
    }
}

/// Ed25519 verifying key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerifyingKey(#[serde(with = "serde_bytes")] [u8; PUBLIC_KEY_SIZE]);

impl VerifyingKey {
    /// Parses a verifying key, failing if the bytes do not encode a valid curve point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Ed25519Error> {
        let bytes: [u8; PUBLIC_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| Ed25519Error::InvalidKeySize(bytes.len()))?;
        ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map_err(|_| Ed25519Error::InvalidKey)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Size of signatures produced by the matching signing key.
    pub fn signature_size(&self) -> usize {
        SIGNATURE_SIZE
    }

    pub fn verify(&self, bytes: &[u8], signature: &Signature) -> Result<(), Ed25519Error> {
        let key = ed25519_dalek::VerifyingKey::from_bytes(&self.0)
            .map_err(|_| Ed25519Error::InvalidKey)?;
        key.verify_strict(bytes, &ed25519_dalek::Signature::from_bytes(&signature.0))
            .map_err(|_| Ed25519Error::VerificationFailed)
    }
}

impl fmt::Display for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Ed25519 signature.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "serde_bytes")] [u8; SIGNATURE_SIZE]);

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Ed25519Error> {
        let bytes: [u8; SIGNATURE_SIZE] = bytes
            .try_into()
            .map_err(|_| Ed25519Error::InvalidSignatureSize(bytes.len()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; SIGNATURE_SIZE] {
        self.0
    }
}

#[derive(Debug, Error)]
pub enum Ed25519Error {
    #[error("invalid ed25519 public key")]
    InvalidKey,

    #[error("invalid ed25519 public key size {0}")]
    InvalidKeySize(usize),

    #[error("invalid ed25519 signature size {0}")]
    InvalidSignatureSize(usize),

    #[error("signature does not match public key and bytes")]
    VerificationFailed,
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;

    use super::{Ed25519Error, SigningKey, VerifyingKey};

    #[test]
    fn sign_and_verify() {
        let rng = Rng::from_seed([1; 32]);

        let signing_key = SigningKey::generate(&rng).unwrap();
        let verifying_key = signing_key.verifying_key();
        let signature = signing_key.sign(b"Hello, Panda!");
        assert!(verifying_key.verify(b"Hello, Panda!", &signature).is_ok());

        let other_key = SigningKey::generate(&rng).unwrap().verifying_key();
        assert!(matches!(
            other_key.verify(b"Hello, Panda!", &signature),
            Err(Ed25519Error::VerificationFailed)
        ));
        assert!(matches!(
            verifying_key.verify(b"Hello, Pandas!", &signature),
            Err(Ed25519Error::VerificationFailed)
        ));
    }

    #[test]
    fn parse_published_keys() {
        let rng = Rng::from_seed([2; 32]);
        let verifying_key = SigningKey::generate(&rng).unwrap().verifying_key();

        let parsed = VerifyingKey::from_bytes(verifying_key.as_bytes()).unwrap();
        assert_eq!(parsed, verifying_key);

        assert!(matches!(
            VerifyingKey::from_bytes(&[1, 2, 3]),
            Err(Ed25519Error::InvalidKeySize(3))
        ));
    }
}
