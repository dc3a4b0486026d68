// SPDX-License-Identifier: MIT OR Apache-2.0

//! Suspected culprits of a failed round.
use std::collections::BTreeSet;

/// Members and slots whose behaviour invalidated a round.
///
/// Entries are only ever added, a fault report is never reset while the round runs. Slot owners
/// are anonymous, so tampered slots are reported by index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FaultReport {
    bad_members: BTreeSet<usize>,
    faulty_slots: BTreeSet<usize>,
    replayed_slots: BTreeSet<usize>,
    suspected_leader: Option<usize>,
}

impl FaultReport {
    /// Adds members by group index.
    pub fn add_bad_members(&mut self, members: impl IntoIterator<Item = usize>) {
        self.bad_members.extend(members);
    }

    /// Slot whose record failed verification, blaming its anonymous owner.
    pub fn add_faulty_slot(&mut self, slot: usize) {
        self.faulty_slots.insert(slot);
    }

    /// Slot which carried a correctly signed record of an earlier phase.
    ///
    /// This does not blame the slot owner. The record was put back by whoever combined the vector,
    /// so the leader (given by group index) is suspected instead.
    pub fn add_replayed_slot(&mut self, slot: usize, leader: usize) {
        self.replayed_slots.insert(slot);
        self.suspected_leader = Some(leader);
    }

    pub fn bad_members(&self) -> Vec<usize> {
        self.bad_members.iter().copied().collect()
    }

    pub fn faulty_slots(&self) -> Vec<usize> {
        self.faulty_slots.iter().copied().collect()
    }

    pub fn replayed_slots(&self) -> Vec<usize> {
        self.replayed_slots.iter().copied().collect()
    }

    pub fn suspected_leader(&self) -> Option<usize> {
        self.suspected_leader
    }

    pub fn is_empty(&self) -> bool {
        self.bad_members.is_empty()
            && self.faulty_slots.is_empty()
            && self.replayed_slots.is_empty()
            && self.suspected_leader.is_none()
    }
}
