// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Mutex;

use rand_chacha::ChaCha20Rng;
use rand_chacha::rand_core::{SeedableRng, TryRngCore};
use thiserror::Error;

/// Size of every seed drawn by a member.
pub const SEED_SIZE: usize = 32;

/// Private randomness of a group member, based on ChaCha20.
///
/// A round only ever draws 32 byte seeds from it: one for its one-time slot signing key and a fresh
/// one for every slot record it randomizes. Pads are _not_ derived from this generator, see
/// [`PadEngine`](crate::pad::PadEngine) for that.
#[derive(Debug)]
pub struct Rng {
    inner: Mutex<ChaCha20Rng>,
}

impl Default for Rng {
    fn default() -> Self {
        Self {
            inner: Mutex::new(ChaCha20Rng::from_os_rng()),
        }
    }
}

#[cfg(any(test, feature = "test_utils"))]
impl Rng {
    pub fn from_seed(seed: [u8; SEED_SIZE]) -> Self {
        Self {
            inner: Mutex::new(ChaCha20Rng::from_seed(seed)),
        }
    }
}

impl Rng {
    /// Draws the next seed.
    pub fn seed(&self) -> Result<[u8; SEED_SIZE], RngError> {
        let mut seed = [0u8; SEED_SIZE];
        self.inner
            .lock()
            .map_err(|_| RngError::LockPoisoned)?
            .try_fill_bytes(&mut seed)
            .map_err(|_| RngError::NotEnoughRandomness)?;
        Ok(seed)
    }
}

#[derive(Debug, Error)]
pub enum RngError {
    #[error("rng lock is poisoned")]
    LockPoisoned,

    #[error("unable to collect enough randomness")]
    NotEnoughRandomness,
}
