// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic groups, collaborators and a simulated network to test bulk rounds.
mod network;
mod shuffle;

use std::collections::VecDeque;

use crate::config::RoundConfig;
use crate::crypto::{Rng, ed25519, x25519};
use crate::group::{Credentials, Group};
use crate::manager::RoundManager;
use crate::message::RoundId;
use crate::round::BulkRound;
use crate::traits::DataSource;

pub use network::{Network, TraceEntry};
pub use shuffle::{ShuffleError, TransparentShuffle};

pub type MemberId = u64;

pub type TestRound = BulkRound<MemberId, TransparentShuffle, QueueDataSource>;

pub type TestRoundManager = RoundManager<MemberId, TransparentShuffle, QueueDataSource>;

pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Data source handing out prepared payloads, one per phase, and nothing afterwards.
#[derive(Clone, Debug, Default)]
pub struct QueueDataSource {
    payloads: VecDeque<Vec<u8>>,
    requests: usize,
    ignore_max_size: bool,
}

impl QueueDataSource {
    pub fn new(payloads: Vec<Vec<u8>>) -> Self {
        Self {
            payloads: payloads.into(),
            requests: 0,
            ignore_max_size: false,
        }
    }

    /// Hands out payloads in full, even when they exceed the requested size.
    pub fn ignoring_max_size(mut self) -> Self {
        self.ignore_max_size = true;
        self
    }

    /// Number of times the round asked for data.
    pub fn requests(&self) -> usize {
        self.requests
    }
}

impl DataSource for QueueDataSource {
    fn next_payload(&mut self, max_size: usize) -> Vec<u8> {
        self.requests += 1;
        let mut payload = self.payloads.pop_front().unwrap_or_default();
        if !self.ignore_max_size {
            payload.truncate(max_size);
        }
        payload
    }
}

/// Group with members `0..count` and the credentials of every member, derived from a seed.
#[derive(Clone, Debug)]
pub struct TestGroup {
    pub group: Group<MemberId>,
    pub credentials: Vec<Credentials<MemberId>>,
    seed: [u8; 32],
}

impl TestGroup {
    pub fn new(count: usize, servers: &[MemberId], leader: MemberId, seed: [u8; 32]) -> Self {
        let rng = Rng::from_seed(seed);
        let credentials = (0..count as MemberId)
            .map(|id| {
                Credentials::new(
                    id,
                    x25519::SecretKey::from_bytes(rng.seed().unwrap()),
                    ed25519::SigningKey::generate(&rng).unwrap(),
                )
            })
            .collect::<Vec<_>>();
        let members = credentials.iter().map(Credentials::member).collect();
        let group = Group::new(members, servers, leader).unwrap();
        Self {
            group,
            credentials,
            seed,
        }
    }

    pub fn ids(&self) -> Vec<MemberId> {
        self.group.members().iter().map(|member| member.id).collect()
    }

    /// Creates the round of a member with its own deterministic randomness.
    pub fn round(
        &self,
        id: MemberId,
        round_id: RoundId,
        config: RoundConfig,
        payloads: Vec<Vec<u8>>,
    ) -> TestRound {
        let shuffle = TransparentShuffle::new(id, self.group.count());
        self.round_with_shuffle(id, round_id, config, payloads, shuffle)
    }

    pub fn round_with_shuffle(
        &self,
        id: MemberId,
        round_id: RoundId,
        config: RoundConfig,
        payloads: Vec<Vec<u8>>,
        shuffle: TransparentShuffle,
    ) -> TestRound {
        self.build_round(id, round_id, config, QueueDataSource::new(payloads), shuffle)
    }

    pub fn round_with_source(
        &self,
        id: MemberId,
        round_id: RoundId,
        config: RoundConfig,
        data_source: QueueDataSource,
    ) -> TestRound {
        let shuffle = TransparentShuffle::new(id, self.group.count());
        self.build_round(id, round_id, config, data_source, shuffle)
    }

    fn build_round(
        &self,
        id: MemberId,
        round_id: RoundId,
        config: RoundConfig,
        data_source: QueueDataSource,
        shuffle: TransparentShuffle,
    ) -> TestRound {
        let mut seed = self.seed;
        seed[0] ^= id as u8;
        seed[1] ^= 0xaa;
        BulkRound::new(
            config,
            self.group.clone(),
            self.credentials[id as usize].clone(),
            round_id,
            shuffle,
            data_source,
            Rng::from_seed(seed),
        )
        .unwrap()
    }
}
