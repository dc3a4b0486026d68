// SPDX-License-Identifier: MIT OR Apache-2.0

//! Owner of all bulk rounds a member takes part in.
//!
//! Rounds are looked up by their id. One of them can be marked as the "default" round, which is
//! where traffic without explicit round context is routed to. The default is only a weak reference:
//! removing the round clears it.
use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::message::RoundId;
use crate::round::{BulkRound, RoundError, RoundOutput};
use crate::traits::{DataSource, IdentityHandle, KeyShuffle};

pub struct RoundManager<ID, KS, DS> {
    rounds: HashMap<RoundId, BulkRound<ID, KS, DS>>,
    default_round: Option<RoundId>,
}

impl<ID, KS, DS> Default for RoundManager<ID, KS, DS> {
    fn default() -> Self {
        Self {
            rounds: HashMap::new(),
            default_round: None,
        }
    }
}

impl<ID, KS, DS> RoundManager<ID, KS, DS>
where
    ID: IdentityHandle,
    KS: KeyShuffle<ID>,
    DS: DataSource,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of a round. The first round inserted becomes the default round.
    pub fn insert(&mut self, round: BulkRound<ID, KS, DS>) -> Result<(), ManagerError> {
        let round_id = round.round_id();
        if self.rounds.contains_key(&round_id) {
            return Err(ManagerError::DuplicateRound(round_id));
        }
        self.rounds.insert(round_id, round);
        if self.default_round_id().is_none() {
            self.default_round = Some(round_id);
        }
        Ok(())
    }

    pub fn get(&self, round_id: &RoundId) -> Option<&BulkRound<ID, KS, DS>> {
        self.rounds.get(round_id)
    }

    pub fn get_mut(&mut self, round_id: &RoundId) -> Option<&mut BulkRound<ID, KS, DS>> {
        self.rounds.get_mut(round_id)
    }

    pub fn remove(&mut self, round_id: &RoundId) -> Option<BulkRound<ID, KS, DS>> {
        self.rounds.remove(round_id)
    }

    pub fn set_default(&mut self, round_id: RoundId) -> Result<(), ManagerError> {
        if !self.rounds.contains_key(&round_id) {
            return Err(ManagerError::UnknownRound(round_id));
        }
        self.default_round = Some(round_id);
        Ok(())
    }

    /// Id of the default round if it is still owned by us.
    pub fn default_round_id(&self) -> Option<RoundId> {
        self.default_round
            .filter(|round_id| self.rounds.contains_key(round_id))
    }

    pub fn default_round(&self) -> Option<&BulkRound<ID, KS, DS>> {
        self.default_round_id()
            .and_then(|round_id| self.rounds.get(&round_id))
    }

    pub fn default_round_mut(&mut self) -> Option<&mut BulkRound<ID, KS, DS>> {
        let round_id = self.default_round_id()?;
        self.rounds.get_mut(&round_id)
    }

    pub fn start(&mut self, round_id: &RoundId) -> Result<Vec<RoundOutput<ID>>, ManagerError> {
        let round = self
            .rounds
            .get_mut(round_id)
            .ok_or(ManagerError::UnknownRound(*round_id))?;
        Ok(round.start()?)
    }

    /// Routes a message to the round with the given id.
    pub fn on_message(
        &mut self,
        round_id: &RoundId,
        sender: ID,
        bytes: &[u8],
    ) -> Result<Vec<RoundOutput<ID>>, ManagerError> {
        let round = self
            .rounds
            .get_mut(round_id)
            .ok_or(ManagerError::UnknownRound(*round_id))?;
        Ok(round.on_message(sender, bytes))
    }

    /// Routes a message to the default round.
    pub fn on_default_message(
        &mut self,
        sender: ID,
        bytes: &[u8],
    ) -> Result<Vec<RoundOutput<ID>>, ManagerError> {
        let round = self.default_round_mut().ok_or(ManagerError::NoDefaultRound)?;
        Ok(round.on_message(sender, bytes))
    }

    /// Removes and returns all rounds which have halted.
    pub fn prune_finished(&mut self) -> Vec<BulkRound<ID, KS, DS>> {
        let finished = self
            .rounds
            .iter()
            .filter(|(_, round)| round.is_stopped())
            .map(|(round_id, _)| *round_id)
            .collect::<Vec<_>>();

        finished
            .into_iter()
            .filter_map(|round_id| {
                debug!(round_id = %round_id, "removing finished round");
                self.rounds.remove(&round_id)
            })
            .collect()
    }

    pub fn round_ids(&self) -> impl Iterator<Item = &RoundId> {
        self.rounds.keys()
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no round with id {0}")]
    UnknownRound(RoundId),

    #[error("round {0} already exists")]
    DuplicateRound(RoundId),

    #[error("no default round set")]
    NoDefaultRound,

    #[error(transparent)]
    Round(#[from] RoundError),
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::config::RoundConfig;
    use crate::message::RoundId;
    use crate::round::RoundError;
    use crate::test_utils::{TestGroup, TestRoundManager};

    use super::ManagerError;

    #[test]
    fn default_round_is_weak() {
        let test_group = TestGroup::new(2, &[1], 0, [1; 32]);
        let round_1 = RoundId::from_bytes([1; 32]);
        let round_2 = RoundId::from_bytes([2; 32]);

        let mut manager = TestRoundManager::new();
        assert_matches!(
            manager.on_default_message(1, &[]),
            Err(ManagerError::NoDefaultRound)
        );

        manager
            .insert(test_group.round(0, round_1, RoundConfig::default(), vec![]))
            .unwrap();
        manager
            .insert(test_group.round(0, round_2, RoundConfig::default(), vec![]))
            .unwrap();
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.default_round_id(), Some(round_1));

        assert_matches!(
            manager.insert(test_group.round(0, round_2, RoundConfig::default(), vec![])),
            Err(ManagerError::DuplicateRound(_))
        );

        manager.set_default(round_2).unwrap();
        assert_eq!(manager.default_round().unwrap().round_id(), round_2);

        manager.remove(&round_2);
        assert_eq!(manager.default_round_id(), None);
        assert_matches!(
            manager.set_default(round_2),
            Err(ManagerError::UnknownRound(_))
        );
    }

    #[test]
    fn routes_by_round_id() {
        let test_group = TestGroup::new(2, &[1], 0, [1; 32]);
        let round_id = RoundId::from_bytes([1; 32]);

        let mut manager = TestRoundManager::new();
        manager
            .insert(test_group.round(0, round_id, RoundConfig::default(), vec![]))
            .unwrap();

        assert!(!manager.start(&round_id).unwrap().is_empty());
        assert_matches!(
            manager.start(&round_id),
            Err(ManagerError::Round(RoundError::AlreadyStarted))
        );
        assert_matches!(
            manager.on_message(&RoundId::from_bytes([9; 32]), 1, &[]),
            Err(ManagerError::UnknownRound(_))
        );

        assert!(manager.prune_finished().is_empty());
        manager.get_mut(&round_id).unwrap().stop("shutdown");
        assert_eq!(manager.prune_finished().len(), 1);
        assert!(manager.is_empty());
    }
}
