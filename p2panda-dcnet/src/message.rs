// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire format of bulk rounds.
//!
//! Every message travels in a [`NetworkMessage`] envelope whose header decides if it belongs to the
//! bulk round itself or to the nested key shuffle. Bulk traffic is wrapped in a [`SignedMessage`]:
//! the CBOR-encoded [`BulkMessage`] signed with the sender's long-term identity key.
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
use crate::crypto::ed25519::{Ed25519Error, Signature, SigningKey, VerifyingKey};
use crate::crypto::sha2::{Digest, sha2_256};

pub const ROUND_ID_SIZE: usize = 32;

/// Unique identifier of a round.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoundId(#[serde(with = "serde_bytes")] [u8; ROUND_ID_SIZE]);

impl RoundId {
    pub fn from_bytes(bytes: [u8; ROUND_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ROUND_ID_SIZE] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// Identifier of the key-shuffle sub-round nested in this round.
    pub fn derive(&self) -> RoundId {
        RoundId(sha2_256(&[&self.0]))
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RoundId").field(&self.to_hex()).finish()
    }
}

/// Sub-protocol a network message is addressed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundHeader {
    Bulk,
    KeyShuffle,
}

/// Envelope of all traffic exchanged by a round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkMessage {
    pub header: RoundHeader,

    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl NetworkMessage {
    pub fn bulk(data: Vec<u8>) -> Self {
        Self {
            header: RoundHeader::Bulk,
            data,
        }
    }

    pub fn key_shuffle(data: Vec<u8>) -> Self {
        Self {
            header: RoundHeader::KeyShuffle,
            data,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_cbor(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode_cbor(bytes)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Digest of a member's user contribution, sent to the leader.
    UserCommitData,

    /// Digest of a server's contribution, sent to the leader.
    ServerCommitData,

    /// Digest over all commitments, broadcast by the leader.
    LeaderCommitData,

    /// XOR contribution of a user, sent to the leader.
    UserBulkData,

    /// XOR contribution of a server, sent to the leader.
    ServerBulkData,

    /// Combined XOR of all contributions, broadcast by the leader.
    LeaderBulkData,
}

impl MessageType {
    /// Message is only ever addressed to the leader.
    pub fn is_leader_bound(&self) -> bool {
        matches!(
            self,
            MessageType::UserCommitData
                | MessageType::ServerCommitData
                | MessageType::UserBulkData
                | MessageType::ServerBulkData
        )
    }

    /// Message can only originate from the leader.
    pub fn is_from_leader(&self) -> bool {
        matches!(
            self,
            MessageType::LeaderCommitData | MessageType::LeaderBulkData
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::UserCommitData => "user_commit_data",
            MessageType::ServerCommitData => "server_commit_data",
            MessageType::LeaderCommitData => "leader_commit_data",
            MessageType::UserBulkData => "user_bulk_data",
            MessageType::ServerBulkData => "server_bulk_data",
            MessageType::LeaderBulkData => "leader_bulk_data",
        };
        write!(f, "{name}")
    }
}

/// Bulk round message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkMessage {
    pub message_type: MessageType,
    pub round_id: RoundId,
    pub phase: u32,

    /// Digest for commit messages, XOR vector for data messages.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl BulkMessage {
    pub fn new(message_type: MessageType, round_id: RoundId, phase: u32, payload: Vec<u8>) -> Self {
        Self {
            message_type,
            round_id,
            phase,
            payload,
        }
    }

    /// Payload interpreted as a digest.
    pub fn digest(&self) -> Result<Digest, MessageError> {
        self.payload
            .as_slice()
            .try_into()
            .map_err(|_| MessageError::InvalidDigestSize(self.payload.len()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_cbor(self)
    }
}

/// Bulk message authenticated with the sender's identity key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMessage {
    /// CBOR-encoded [`BulkMessage`].
    #[serde(with = "serde_bytes")]
    pub body: Vec<u8>,

    pub signature: Signature,
}

impl SignedMessage {
    pub fn sign(message: &BulkMessage, signing_key: &SigningKey) -> Result<Self, EncodeError> {
        let body = message.to_bytes()?;
        let signature = signing_key.sign(&body);
        Ok(Self { body, signature })
    }

    /// Verifies the sender's signature over the body.
    pub fn verify(&self, verifying_key: &VerifyingKey) -> Result<(), MessageError> {
        verifying_key
            .verify(&self.body, &self.signature)
            .map_err(MessageError::InvalidSignature)
    }

    pub fn message(&self) -> Result<BulkMessage, MessageError> {
        Ok(decode_cbor(&self.body)?)
    }

    /// Digest a member commits to before revealing this message.
    pub fn digest(&self) -> Digest {
        sha2_256(&[&self.body])
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_cbor(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode_cbor(bytes)
    }
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("invalid sender signature: {0}")]
    InvalidSignature(Ed25519Error),

    #[error("expected digest of 32 bytes, got {0}")]
    InvalidDigestSize(usize),
}
