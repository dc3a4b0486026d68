// SPDX-License-Identifier: MIT OR Apache-2.0

//! Thin wrappers around the cryptographic primitives used by the bulk round.
//!
//! Protocol code only talks to these types, never to the underlying libraries directly.
pub mod ed25519;
pub mod hkdf;
mod rng;
mod secret;
pub mod sha2;
pub mod x25519;

pub use rng::{Rng, RngError, SEED_SIZE};
pub use secret::Secret;

use thiserror::Error;

/// XORs `src` into `dst` in place. Both slices need to be of the same length.
pub fn xor_into(dst: &mut [u8], src: &[u8]) -> Result<(), XorError> {
    if dst.len() != src.len() {
        return Err(XorError::LengthMismatch(dst.len(), src.len()));
    }
    for (a, b) in dst.iter_mut().zip(src.iter()) {
        *a ^= b;
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum XorError {
    #[error("can not xor {1} bytes into {0} bytes")]
    LengthMismatch(usize, usize),
}
