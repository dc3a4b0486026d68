// SPDX-License-Identifier: MIT OR Apache-2.0

//! SHA2 hashing functions.
use sha2::{Digest as _, Sha256};

pub const SHA256_DIGEST_SIZE: usize = 32;

/// SHA2-256 digest.
pub type Digest = [u8; SHA256_DIGEST_SIZE];

/// SHA2-256 hashing function over the concatenation of all given messages.
pub fn sha2_256(messages: &[&[u8]]) -> Digest {
    let mut hasher = Sha256::new();
    for message in messages {
        hasher.update(message);
    }
    let result = hasher.finalize();
    let mut digest = [0u8; SHA256_DIGEST_SIZE];
    digest.copy_from_slice(&result);
    digest
}
