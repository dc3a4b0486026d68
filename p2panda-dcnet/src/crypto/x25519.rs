// SPDX-License-Identifier: MIT OR Apache-2.0

//! X25519 Diffie-Hellman key agreement used to establish pairwise secrets between users and
//! servers.
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::Secret;

pub const SECRET_KEY_SIZE: usize = 32;

pub const PUBLIC_KEY_SIZE: usize = 32;

pub const SHARED_SECRET_SIZE: usize = 32;

/// X25519 secret key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretKey(Secret<SECRET_KEY_SIZE>);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        Self(Secret::from_bytes(bytes))
    }

    pub fn public_key(&self) -> PublicKey {
        let static_secret = x25519_dalek::StaticSecret::from(*self.0.as_bytes());
        PublicKey(x25519_dalek::PublicKey::from(&static_secret).to_bytes())
    }

    /// Computes the shared secret with the other party's public key.
    ///
    /// Low-order public keys would force a known shared secret, we reject them.
    pub fn calculate_agreement(
        &self,
        their_public_key: &PublicKey,
    ) -> Result<Secret<SHARED_SECRET_SIZE>, X25519Error> {
        let static_secret = x25519_dalek::StaticSecret::from(*self.0.as_bytes());
        let shared_secret =
            static_secret.diffie_hellman(&x25519_dalek::PublicKey::from(their_public_key.0));
        if !shared_secret.was_contributory() {
            return Err(X25519Error::NonContributory);
        }
        Ok(Secret::from_bytes(shared_secret.to_bytes()))
    }
}

/// X25519 public key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "serde_bytes")] [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
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
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[derive(Debug, Error)]
pub enum X25519Error {
    #[error("diffie-hellman exchange with low-order public key")]
    NonContributory,
}
