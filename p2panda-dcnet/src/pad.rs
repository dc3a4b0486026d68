// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pairwise pseudorandom pads.
//!
//! Every user shares one secret with every server, established once per round through X25519
//! Diffie-Hellman between their long-term keys. The secret seeds a ChaCha20 stream per pair. Both
//! ends of a pair consume their streams in lockstep, so XORing all user and server contributions of
//! a phase cancels the pads and leaves only the slot records.
//!
//! A member who is both user and server pairs with itself. It keeps two independent streams for
//! that pair, one for each role, which again cancel out.
use rand_chacha::ChaCha20Rng;
use rand_chacha::rand_core::{RngCore, SeedableRng};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroize;

use crate::crypto::hkdf::{HkdfError, hkdf};
use crate::crypto::x25519::{PublicKey, X25519Error};
use crate::crypto::{XorError, xor_into};
use crate::group::{Credentials, Group};
use crate::message::RoundId;
use crate::traits::IdentityHandle;

const PAD_INFO: &[u8] = b"p2panda-dcnet pad";

/// Other end of a pad stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Peer {
    /// Server with the given server index, used for our user contribution.
    Server(usize),

    /// User with the given member index, used for our server contribution.
    User(usize),
}

#[derive(Debug)]
pub struct PadEngine {
    server_streams: Vec<ChaCha20Rng>,
    user_streams: Vec<ChaCha20Rng>,
}

impl PadEngine {
    /// Establishes all pairwise secrets of the local member for this round.
    ///
    /// Streams with users are only set up if we are a server ourselves.
    pub fn new<ID>(
        group: &Group<ID>,
        credentials: &Credentials<ID>,
        round_id: &RoundId,
    ) -> Result<Self, PadError>
    where
        ID: IdentityHandle,
    {
        let server_streams = group
            .servers()
            .map(|server| pad_stream(credentials, &server.dh_key, round_id))
            .collect::<Result<Vec<_>, _>>()?;

        let user_streams = if group.is_server(&credentials.id()) {
            group
                .members()
                .iter()
                .map(|user| pad_stream(credentials, &user.dh_key, round_id))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        debug!(
            servers = server_streams.len(),
            users = user_streams.len(),
            "established pairwise pad secrets"
        );

        Ok(Self {
            server_streams,
            user_streams,
        })
    }

    /// Returns the next `len` bytes of the stream shared with the peer.
    pub fn generate(&mut self, peer: Peer, len: usize) -> Result<Vec<u8>, PadError> {
        let stream = match peer {
            Peer::Server(idx) => self.server_streams.get_mut(idx),
            Peer::User(idx) => self.user_streams.get_mut(idx),
        }
        .ok_or(PadError::UnknownPeer(peer))?;

        let mut pad = vec![0u8; len];
        stream.fill_bytes(&mut pad);
        Ok(pad)
    }

    /// XOR of the next `len` bytes of every stream shared with a server.
    pub fn user_pad(&mut self, len: usize) -> Result<Vec<u8>, PadError> {
        let mut out = vec![0u8; len];
        for idx in 0..self.server_streams.len() {
            xor_into(&mut out, &self.generate(Peer::Server(idx), len)?)?;
        }
        Ok(out)
    }

    /// XOR of the next `len` bytes of every stream shared with a user.
    pub fn server_pad(&mut self, len: usize) -> Result<Vec<u8>, PadError> {
        if self.user_streams.is_empty() {
            return Err(PadError::NotAServer);
        }
        let mut out = vec![0u8; len];
        for idx in 0..self.user_streams.len() {
            xor_into(&mut out, &self.generate(Peer::User(idx), len)?)?;
        }
        Ok(out)
    }
}

fn pad_stream<ID>(
    credentials: &Credentials<ID>,
    their_key: &PublicKey,
    round_id: &RoundId,
) -> Result<ChaCha20Rng, PadError>
where
    ID: IdentityHandle,
{
    let shared_secret = credentials.dh_secret().calculate_agreement(their_key)?;
    let mut seed: [u8; 32] = hkdf(round_id.as_bytes(), shared_secret.as_bytes(), PAD_INFO)?;
    let stream = ChaCha20Rng::from_seed(seed);
    seed.zeroize();
    Ok(stream)
}

#[derive(Debug, Error)]
pub enum PadError {
    #[error(transparent)]
    KeyAgreement(#[from] X25519Error),

    #[error(transparent)]
    Hkdf(#[from] HkdfError),

    #[error(transparent)]
    Xor(#[from] XorError),

    #[error("no pad stream with {0:?}")]
    UnknownPeer(Peer),

    #[error("only servers generate pads for users")]
    NotAServer,
}
