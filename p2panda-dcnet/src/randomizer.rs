// SPDX-License-Identifier: MIT OR Apache-2.0

//! Keystream randomization of slot records.
//!
//! A record is XORed with a ChaCha20 keystream derived from a fresh seed and sent together with
//! that seed. This hides structure (like long runs of zeros in empty payloads) from the XOR of the
//! pads, while anyone holding the randomized string can reverse it.
use rand_chacha::ChaCha20Rng;
use rand_chacha::rand_core::{RngCore, SeedableRng};
use thiserror::Error;

use crate::crypto::{Rng, RngError, SEED_SIZE, XorError, xor_into};

pub const RANDOMIZER_SEED_SIZE: usize = SEED_SIZE;

/// Number of bytes randomization adds to a record.
pub const fn header_length() -> usize {
    RANDOMIZER_SEED_SIZE
}

/// Masks the record with a keystream of a freshly drawn seed, returns `seed | masked record`.
pub fn randomize(rng: &Rng, record: &[u8]) -> Result<Vec<u8>, RandomizerError> {
    let seed = rng.seed()?;
    let mut out = Vec::with_capacity(RANDOMIZER_SEED_SIZE + record.len());
    out.extend_from_slice(&seed);
    out.extend_from_slice(&keystream(seed, record.len()));
    xor_into(&mut out[RANDOMIZER_SEED_SIZE..], record)?;
    Ok(out)
}

/// Reverses [`randomize`].
pub fn derandomize(randomized: &[u8]) -> Result<Vec<u8>, RandomizerError> {
    if randomized.len() < RANDOMIZER_SEED_SIZE {
        return Err(RandomizerError::Truncated(randomized.len()));
    }
    let (seed, masked) = randomized.split_at(RANDOMIZER_SEED_SIZE);
    let mut seed_bytes = [0u8; RANDOMIZER_SEED_SIZE];
    seed_bytes.copy_from_slice(seed);
    let mut out = keystream(seed_bytes, masked.len());
    xor_into(&mut out, masked)?;
    Ok(out)
}

fn keystream(seed: [u8; RANDOMIZER_SEED_SIZE], len: usize) -> Vec<u8> {
    let mut stream = ChaCha20Rng::from_seed(seed);
    let mut out = vec![0u8; len];
    stream.fill_bytes(&mut out);
    out
}

#[derive(Debug, Error)]
pub enum RandomizerError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error("randomized string of {0} bytes is shorter than the seed")]
    Truncated(usize),

    #[error(transparent)]
    Xor(#[from] XorError),
}
