// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;

use thiserror::Error;

use crate::group::Group;
use crate::message::RoundId;
use crate::test_utils::MemberId;
use crate::traits::{KeyShuffle, ShuffleOutput, ShuffleResult};

/// Key "shuffle" which broadcasts descriptors in the clear and orders them by their bytes.
///
/// Provides no anonymity at all, but assigns slots the same way on every member.
#[derive(Clone, Debug)]
pub struct TransparentShuffle {
    my_id: MemberId,
    group_size: usize,
    descriptors: BTreeMap<MemberId, Vec<u8>>,
    started: bool,
    finished: bool,
    bad_members: Option<Vec<usize>>,
    truncate_to: Option<usize>,
}

impl TransparentShuffle {
    pub fn new(my_id: MemberId, group_size: usize) -> Self {
        Self {
            my_id,
            group_size,
            descriptors: BTreeMap::new(),
            started: false,
            finished: false,
            bad_members: None,
            truncate_to: None,
        }
    }

    /// Shuffle fails, blaming the given members.
    pub fn failing(mut self, bad_members: Vec<usize>) -> Self {
        self.bad_members = Some(bad_members);
        self
    }

    /// Shuffle succeeds but only hands out the first `count` descriptors.
    pub fn truncated(mut self, count: usize) -> Self {
        self.truncate_to = Some(count);
        self
    }

    fn try_finish(&mut self) -> Vec<ShuffleOutput<MemberId>> {
        if !self.started || self.finished || self.descriptors.len() < self.group_size {
            return Vec::new();
        }
        self.finished = true;

        if let Some(bad_members) = &self.bad_members {
            return vec![ShuffleOutput::Finished(ShuffleResult {
                successful: false,
                bad_members: bad_members.clone(),
                descriptors: Vec::new(),
            })];
        }

        let mut descriptors = self.descriptors.values().cloned().collect::<Vec<_>>();
        descriptors.sort();
        if let Some(count) = self.truncate_to {
            descriptors.truncate(count);
        }

        vec![ShuffleOutput::Finished(ShuffleResult {
            successful: true,
            bad_members: Vec::new(),
            descriptors: descriptors.into_iter().enumerate().collect(),
        })]
    }
}

impl KeyShuffle<MemberId> for TransparentShuffle {
    type Error = ShuffleError;

    fn start(
        &mut self,
        group: &Group<MemberId>,
        _round_id: RoundId,
        descriptor: Vec<u8>,
    ) -> Result<Vec<ShuffleOutput<MemberId>>, Self::Error> {
        if self.started {
            return Err(ShuffleError::AlreadyStarted(self.my_id));
        }
        self.started = true;
        self.group_size = group.count();

        let mut outputs = vec![ShuffleOutput::Broadcast { data: descriptor }];
        outputs.extend(self.try_finish());
        Ok(outputs)
    }

    fn receive(
        &mut self,
        sender: MemberId,
        data: &[u8],
    ) -> Result<Vec<ShuffleOutput<MemberId>>, Self::Error> {
        if self.descriptors.contains_key(&sender) {
            return Err(ShuffleError::DuplicateDescriptor(sender));
        }
        self.descriptors.insert(sender, data.to_vec());
        Ok(self.try_finish())
    }
}

#[derive(Debug, Error)]
pub enum ShuffleError {
    #[error("shuffle of {0} was already started")]
    AlreadyStarted(MemberId),

    #[error("received second descriptor from {0}")]
    DuplicateDescriptor(MemberId),
}
