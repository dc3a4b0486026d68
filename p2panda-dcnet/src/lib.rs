// SPDX-License-Identifier: MIT OR Apache-2.0

//! `p2panda-dcnet` implements accountable anonymous broadcast for groups, based on
//! dining-cryptographers networks (DC-nets).
//!
//! A group consists of "users" (every member) and a designated subset of "servers". One member is
//! elected "leader" and coordinates a round. Every user shares a secret with every server,
//! established through Diffie-Hellman, from which both sides derive identical pseudorandom pads.
//! Users XOR their pads (and the record of their own slot) into a vector, servers XOR the pads
//! they share with all users into another one. Once the leader combines the contributions of
//! everyone the pads cancel out and only the slot records remain, without revealing which member
//! wrote which slot.
//!
//! ## Accountability
//!
//! Slots are assigned through an anonymous key shuffle (provided from the outside, see
//! [`KeyShuffle`]): every member submits a fresh one-time verifying key and learns which slot it
//! owns, while nobody can link slots to members. Slot records are signed with that key, a record
//! which fails verification after the XOR proves that someone tampered with the round. The round
//! halts and reports the faulty slot.
//!
//! Members further commit to the digest of their contribution before revealing it. The leader only
//! lets members reveal after collecting every commitment, so no member can adapt its contribution
//! to what others sent. All bulk messages are signed with the sender's long-term identity key.
//!
//! ## Phases
//!
//! A round runs in phases until it is stopped. The payload of a slot is announced (by its length)
//! one phase ahead, which allows every member to size the XOR vector of the next phase. See
//! [`BulkRound`] for the state machine.
//!
//! ## Transport
//!
//! Rounds are pure state machines. Incoming messages are passed into [`BulkRound::on_message`],
//! while everything to be sent or delivered is returned as [`RoundOutput`]. Rounds of a member can
//! be owned by a [`RoundManager`].
mod cbor;
pub mod commit;
mod config;
pub mod crypto;
mod faults;
pub mod group;
pub mod log;
mod manager;
pub mod message;
pub mod pad;
pub mod randomizer;
pub mod round;
pub mod slot;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
#[cfg(test)]
mod tests;
pub mod traits;

pub use cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
pub use config::{DEFAULT_MAX_PAYLOAD_SIZE, RoundConfig};
pub use crypto::{Rng, RngError};
pub use faults::FaultReport;
pub use group::{Credentials, Group, GroupError, Member, Role};
pub use manager::{ManagerError, RoundManager};
pub use message::{MessageType, RoundId};
pub use round::{BulkRound, RoundError, RoundOutput, RoundResult, RoundState};
pub use traits::{
    DataSource, FaultHook, IdentityHandle, KeyShuffle, NoFaults, ShuffleHandle, ShuffleOutput,
    ShuffleResult,
};
