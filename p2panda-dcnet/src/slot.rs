// SPDX-License-Identifier: MIT OR Apache-2.0

//! Slot records and their anonymous signatures.
//!
//! The key shuffle hands every member a slot, bound to a one-time verifying key nobody can link to
//! its owner. In every phase the owner fills the slot with a signed record:
//!
//! ```text
//! phase (u32 BE) | next length (u32 BE) | payload | signature | marker (0x00)
//! ```
//!
//! The payload is the one announced through the length field of the previous phase, which lets
//! everyone size the slot before the data is sent. The record is randomized before it gets mixed
//! into the XOR vector, see [`randomizer`](crate::randomizer).
use std::mem;

use thiserror::Error;

use crate::crypto::Rng;
use crate::crypto::ed25519::{Ed25519Error, SIGNATURE_SIZE, Signature, SigningKey, VerifyingKey};
use crate::randomizer::{self, RandomizerError};
use crate::traits::ShuffleHandle;

const PHASE_SIZE: usize = 4;

const LENGTH_SIZE: usize = 4;

const MARKER: u8 = 0x00;

/// Bytes a slot occupies on top of its payload with a 64 byte signature.
pub const SLOT_HEADER_SIZE: usize =
    randomizer::header_length() + PHASE_SIZE + LENGTH_SIZE + SIGNATURE_SIZE + 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    /// Anonymous key the slot owner signs its records with.
    pub key: VerifyingKey,

    pub header_len: usize,

    /// Payload size announced for the current phase.
    pub message_len: usize,
}

impl Slot {
    /// Size of the slot in the current phase.
    pub fn size(&self) -> usize {
        self.header_len + self.message_len
    }
}

/// What a slot contained in this phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotContent {
    /// Valid record, the payload might be empty.
    Payload(Vec<u8>),

    /// Validly signed record of another phase. The owner never signs one, so someone replayed an
    /// old record into the combined vector. The slot keeps its length.
    Replayed { phase: u32 },
}

/// Slots of a round in shuffle order.
#[derive(Clone, Debug)]
pub struct SlotAssignment {
    slots: Vec<Slot>,
    my_slot: usize,
}

impl SlotAssignment {
    /// Builds the slot list from the shuffled descriptors, each one being an encoded verifying key.
    pub fn from_descriptors(
        descriptors: &[(ShuffleHandle, Vec<u8>)],
        own_key: &VerifyingKey,
    ) -> Result<Self, SlotError> {
        let mut slots = Vec::with_capacity(descriptors.len());
        for (idx, (_, descriptor)) in descriptors.iter().enumerate() {
            let key = VerifyingKey::from_bytes(descriptor)
                .map_err(|err| SlotError::InvalidKey(idx, err))?;
            slots.push(Slot {
                key,
                header_len: randomizer::header_length()
                    + PHASE_SIZE
                    + LENGTH_SIZE
                    + key.signature_size()
                    + 1,
                message_len: 0,
            });
        }

        let my_slot = slots
            .iter()
            .position(|slot| &slot.key == own_key)
            .ok_or(SlotError::MissingOwnKey)?;

        Ok(Self { slots, my_slot })
    }

    pub fn my_slot(&self) -> usize {
        self.my_slot
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, idx: usize) -> Option<&Slot> {
        self.slots.get(idx)
    }

    /// Position of the slot inside a XOR vector of the current phase.
    pub fn offset(&self, idx: usize) -> usize {
        self.slots.iter().take(idx).map(Slot::size).sum()
    }

    /// Size of the XOR vector of the current phase.
    pub fn total_length(&self) -> usize {
        self.slots.iter().map(Slot::size).sum()
    }

    /// Splits a XOR vector of the current phase into one chunk per slot.
    pub fn split(&self, data: &[u8]) -> Result<Vec<Vec<u8>>, SlotError> {
        if data.len() != self.total_length() {
            return Err(SlotError::InvalidVectorLength(data.len(), self.total_length()));
        }
        let mut offset = 0;
        let mut chunks = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            chunks.push(data[offset..offset + slot.size()].to_vec());
            offset += slot.size();
        }
        Ok(chunks)
    }

    /// Recovers the record of a slot, verifies its signature and takes over the announced length
    /// for the next phase.
    ///
    /// Every error returned here proves that the slot was tampered with. A correctly signed record
    /// of another phase is returned as [`SlotContent::Replayed`] instead, as it is no proof against
    /// the slot owner.
    pub fn decode(
        &mut self,
        idx: usize,
        randomized: &[u8],
        expected_phase: u32,
        max_payload_size: usize,
    ) -> Result<SlotContent, SlotError> {
        let slot = self.slots.get_mut(idx).ok_or(SlotError::UnknownSlot(idx))?;
        let sig_size = slot.key.signature_size();

        let record = randomizer::derandomize(randomized)?;
        if record.len() < PHASE_SIZE + LENGTH_SIZE + sig_size + 1 {
            return Err(SlotError::Truncated(idx));
        }

        let (signed, rest) = record.split_at(record.len() - sig_size - 1);
        let signature =
            Signature::from_bytes(&rest[..sig_size]).map_err(|_| SlotError::Truncated(idx))?;
        slot.key
            .verify(signed, &signature)
            .map_err(|_| SlotError::InvalidSignature(idx))?;

        let phase = read_u32(&signed[..PHASE_SIZE]);
        if phase != expected_phase {
            return Ok(SlotContent::Replayed { phase });
        }

        let next_len = read_u32(&signed[PHASE_SIZE..PHASE_SIZE + LENGTH_SIZE]) as usize;
        if next_len > max_payload_size {
            return Err(SlotError::LengthExceeded(idx, next_len, max_payload_size));
        }
        slot.message_len = next_len;

        Ok(SlotContent::Payload(
            signed[PHASE_SIZE + LENGTH_SIZE..].to_vec(),
        ))
    }
}

/// Produces the records of our own slot.
#[derive(Debug)]
pub struct SlotWriter {
    signing_key: SigningKey,
    next_payload: Vec<u8>,
}

impl SlotWriter {
    pub fn new(signing_key: SigningKey) -> Self {
        Self {
            signing_key,
            next_payload: Vec::new(),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Size of the payload we will send in the upcoming phase.
    pub fn announced_len(&self) -> usize {
        self.next_payload.len()
    }

    /// Builds and randomizes the record for `phase`.
    ///
    /// The record carries the payload announced in the previous phase and announces `next_payload`
    /// for the following one.
    pub fn encode(
        &mut self,
        rng: &Rng,
        phase: u32,
        next_payload: Vec<u8>,
    ) -> Result<Vec<u8>, SlotError> {
        let next_len = u32::try_from(next_payload.len())
            .map_err(|_| SlotError::PayloadTooLarge(next_payload.len()))?;
        let payload = mem::replace(&mut self.next_payload, next_payload);

        let mut record = Vec::with_capacity(PHASE_SIZE + LENGTH_SIZE + payload.len());
        record.extend_from_slice(&phase.to_be_bytes());
        record.extend_from_slice(&next_len.to_be_bytes());
        record.extend_from_slice(&payload);

        let signature = self.signing_key.sign(&record);
        record.extend_from_slice(signature.as_bytes());
        record.push(MARKER);

        Ok(randomizer::randomize(rng, &record)?)
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_be_bytes(buf)
}

#[derive(Debug, Error)]
pub enum SlotError {
    #[error("descriptor of slot {0} is not a valid verifying key: {1}")]
    InvalidKey(usize, Ed25519Error),

    #[error("our own slot key is missing in the shuffle output")]
    MissingOwnKey,

    #[error("no slot with index {0}")]
    UnknownSlot(usize),

    #[error("xor vector of {0} bytes does not match expected length {1}")]
    InvalidVectorLength(usize, usize),

    #[error(transparent)]
    Randomizer(#[from] RandomizerError),

    #[error("record of slot {0} is truncated")]
    Truncated(usize),

    #[error("invalid signature on record of slot {0}")]
    InvalidSignature(usize),

    #[error("slot {0} announces {1} bytes, max payload size is {2}")]
    LengthExceeded(usize, usize, usize),

    #[error("payload of {0} bytes does not fit into a record")]
    PayloadTooLarge(usize),
}
