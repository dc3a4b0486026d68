// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interfaces to collaborators of a bulk round.
//!
//! The round itself only implements the DC-net protocol. Where its payloads come from, how the
//! anonymous slot keys get distributed and how adversarial behaviour is injected during tests is
//! provided from the outside through these traits.
use std::error::Error;
use std::fmt::Debug;
use std::hash::Hash;

use crate::group::{Group, Role};
use crate::message::RoundId;

/// Identifier of a group member.
pub trait IdentityHandle: Copy + Debug + Eq + Hash + Ord {}

impl<T> IdentityHandle for T where T: Copy + Debug + Eq + Hash + Ord {}

/// Source of the payloads we want to publish anonymously.
pub trait DataSource {
    /// Returns the next payload, at most `max_size` bytes long. An empty payload means we have
    /// nothing to say.
    fn next_payload(&mut self, max_size: usize) -> Vec<u8>;
}

impl<F> DataSource for F
where
    F: FnMut(usize) -> Vec<u8>,
{
    fn next_payload(&mut self, max_size: usize) -> Vec<u8> {
        self(max_size)
    }
}

/// Opaque handle of whoever submitted a descriptor into the key shuffle.
pub type ShuffleHandle = usize;

/// Outcome of a key shuffle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShuffleResult {
    /// Shuffle completed without detecting misbehaviour.
    pub successful: bool,

    /// Indices (in group order) of members the shuffle identified as misbehaving.
    pub bad_members: Vec<usize>,

    /// Shuffled descriptors in delivery order. The position in this list is the slot index.
    pub descriptors: Vec<(ShuffleHandle, Vec<u8>)>,
}

/// Output of the key shuffle sub-round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShuffleOutput<ID> {
    /// Message for a single member.
    Send { recipient: ID, data: Vec<u8> },

    /// Message for every member of the group, including ourselves.
    Broadcast { data: Vec<u8> },

    /// Shuffle has terminated.
    Finished(ShuffleResult),
}

/// Anonymous key shuffle assigning every member a pseudonymous signing key and slot.
///
/// The bulk round forwards all key-shuffle traffic verbatim without interpreting it.
pub trait KeyShuffle<ID> {
    type Error: Error;

    /// Starts the shuffle with our descriptor (the public half of our one-time slot key).
    fn start(
        &mut self,
        group: &Group<ID>,
        round_id: RoundId,
        descriptor: Vec<u8>,
    ) -> Result<Vec<ShuffleOutput<ID>>, Self::Error>;

    /// Handles a key-shuffle message from another member.
    fn receive(&mut self, sender: ID, data: &[u8]) -> Result<Vec<ShuffleOutput<ID>>, Self::Error>;
}

/// Strategy hooks allowing tests to make a member misbehave at well-defined points of a phase.
///
/// Every method does nothing by default.
pub trait FaultHook {
    /// Our own slot record right after randomization, before it's XORed into our contribution.
    fn slot_record(&mut self, _phase: u32, _record: &mut Vec<u8>) {}

    /// Our XOR contribution before we commit to it.
    fn contribution(&mut self, _role: Role, _phase: u32, _contribution: &mut Vec<u8>) {}

    /// Our XOR contribution after we committed to it, right before it's revealed to the leader.
    fn reveal(&mut self, _role: Role, _phase: u32, _contribution: &mut Vec<u8>) {}

    /// Combined result the leader is about to broadcast.
    fn combined(&mut self, _phase: u32, _combined: &mut Vec<u8>) {}
}

/// Honest behaviour.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFaults;

impl FaultHook for NoFaults {}
