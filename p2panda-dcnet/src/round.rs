// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bulk round state machine.
//!
//! A round first runs a key shuffle assigning every member an anonymous slot and then loops over
//! phases. Every phase consists of two exchanges with the leader:
//!
//! 1. Commit: every member sends the digest of its upcoming XOR contribution(s) to the leader. With
//!    all commitments present the leader broadcasts a digest over all of them.
//! 2. Reveal: after seeing the leader's commit digest every member releases its contribution(s).
//!    The leader XORs them together and broadcasts the result, from which everyone recovers the slot
//!    records of this phase.
//!
//! ```text
//!            start()                 shuffle done        all commits (leader)
//! Offline ----------> KeyShuffling ---------------> CommitSharing ----------> CommitReceiving
//!                                                 \                                  |
//!                                                  `- CommitReceiving (others)       | leader commit
//!                                                                                    v
//!                      next phase <- leader bulk - DataReceiving <- all data - DataSharing
//! ```
//!
//! The round never does I/O itself. Incoming messages are handed to [`BulkRound::on_message`] and
//! everything the round wants to send or deliver is returned as [`RoundOutput`]s.
use std::fmt;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cbor::{DecodeError, EncodeError};
use crate::commit::{CommitAggregator, CommitError};
use crate::config::RoundConfig;
use crate::crypto::sha2::Digest;
use crate::crypto::{Rng, RngError, XorError, ed25519, xor_into};
use crate::faults::FaultReport;
use crate::group::{Credentials, Group, Role};
use crate::log::{AuditEntry, AuditLog, MessageLog, OfflineLog};
use crate::message::{
    BulkMessage, MessageError, MessageType, NetworkMessage, RoundHeader, RoundId, SignedMessage,
};
use crate::pad::{PadEngine, PadError};
use crate::slot::{SlotAssignment, SlotContent, SlotError, SlotWriter};
use crate::traits::{
    DataSource, FaultHook, IdentityHandle, KeyShuffle, NoFaults, ShuffleOutput, ShuffleResult,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundState {
    Offline,
    KeyShuffling,
    CommitSharing,
    CommitReceiving,
    DataSharing,
    DataReceiving,
    Finished,
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundState::Offline => "offline",
            RoundState::KeyShuffling => "key_shuffling",
            RoundState::CommitSharing => "commit_sharing",
            RoundState::CommitReceiving => "commit_receiving",
            RoundState::DataSharing => "data_sharing",
            RoundState::DataReceiving => "data_receiving",
            RoundState::Finished => "finished",
        };
        write!(f, "{name}")
    }
}

/// Summary of a halted round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundResult<ID> {
    pub round_id: RoundId,
    pub successful: bool,
    pub interrupted: bool,
    pub reason: Option<String>,

    /// Members the key shuffle identified as misbehaving.
    pub bad_members: Vec<ID>,

    /// Slots whose record failed verification.
    pub faulty_slots: Vec<usize>,

    /// Slots which carried a replayed record of an earlier phase.
    pub replayed_slots: Vec<usize>,

    /// Leader, if it combined a vector with replayed records.
    pub suspected_leader: Option<ID>,
}

/// Effect of processing input, to be carried out by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoundOutput<ID> {
    /// Encoded [`NetworkMessage`] for a single member, possibly ourselves.
    Send { recipient: ID, message: Vec<u8> },

    /// Encoded [`NetworkMessage`] for every group member, including ourselves.
    Broadcast { message: Vec<u8> },

    /// Anonymous payload recovered from a slot.
    Deliver {
        round_id: RoundId,
        slot: usize,
        payload: Vec<u8>,
    },

    /// Round has halted.
    Finished(RoundResult<ID>),
}

enum Processed {
    Handled,
    Buffered,
}

/// Contribution we committed to and will reveal once the leader's commit digest arrives.
struct PendingReveal {
    xor: Vec<u8>,
    message: SignedMessage,
}

/// Accountable anonymous broadcast round of one group member.
pub struct BulkRound<ID, KS, DS> {
    config: RoundConfig,
    group: Group<ID>,
    credentials: Credentials<ID>,
    round_id: RoundId,
    key_shuffle: KS,
    data_source: DS,
    rng: Rng,
    fault_hook: Box<dyn FaultHook>,

    state: RoundState,
    state_changed: bool,
    phase: u32,
    expected_bulk_size: usize,

    pads: PadEngine,
    writer: SlotWriter,
    slots: Option<SlotAssignment>,
    aggregator: CommitAggregator,
    user_reveal: Option<PendingReveal>,
    server_reveal: Option<PendingReveal>,

    offline_log: OfflineLog<ID>,
    audit_log: AuditLog<ID>,
    message_log: MessageLog<ID>,
    faults: FaultReport,

    successful: bool,
    interrupted: bool,
    stop_requested: bool,
    stop_reason: Option<String>,
}

impl<ID, KS, DS> BulkRound<ID, KS, DS>
where
    ID: IdentityHandle,
    KS: KeyShuffle<ID>,
    DS: DataSource,
{
    /// Sets up a round, deriving all pairwise pad secrets and a fresh anonymous slot key.
    pub fn new(
        config: RoundConfig,
        group: Group<ID>,
        credentials: Credentials<ID>,
        round_id: RoundId,
        key_shuffle: KS,
        data_source: DS,
        rng: Rng,
    ) -> Result<Self, RoundError> {
        if !group.contains(&credentials.id()) {
            return Err(RoundError::NotAMember);
        }

        let pads = PadEngine::new(&group, &credentials, &round_id)?;
        let aggregator = CommitAggregator::new(group.count(), group.server_count(), 0);
        let writer = SlotWriter::new(ed25519::SigningKey::generate(&rng)?);

        debug!(
            round_id = %round_id,
            leader = group.is_leader(&credentials.id()),
            server = group.is_server(&credentials.id()),
            "created bulk round"
        );

        Ok(Self {
            config,
            group,
            credentials,
            round_id,
            key_shuffle,
            data_source,
            rng,
            fault_hook: Box::new(NoFaults),
            state: RoundState::Offline,
            state_changed: false,
            phase: 0,
            expected_bulk_size: 0,
            pads,
            writer,
            slots: None,
            aggregator,
            user_reveal: None,
            server_reveal: None,
            offline_log: OfflineLog::default(),
            audit_log: AuditLog::default(),
            message_log: MessageLog::default(),
            faults: FaultReport::default(),
            successful: true,
            interrupted: false,
            stop_requested: false,
            stop_reason: None,
        })
    }

    /// Replaces the honest behaviour of this member, used to test fault detection.
    pub fn set_fault_hook(&mut self, hook: impl FaultHook + 'static) {
        self.fault_hook = Box::new(hook);
    }

    /// Starts the key shuffle.
    pub fn start(&mut self) -> Result<Vec<RoundOutput<ID>>, RoundError> {
        if self.state != RoundState::Offline {
            return Err(RoundError::AlreadyStarted);
        }

        info!(round_id = %self.round_id, "starting bulk round");
        self.change_state(RoundState::KeyShuffling);

        let mut outputs = Vec::new();
        let descriptor = self.writer.verifying_key().to_bytes().to_vec();
        let result = self
            .key_shuffle
            .start(&self.group, self.round_id.derive(), descriptor)
            .map_err(|err| RoundError::KeyShuffle(err.to_string()))
            .and_then(|shuffle_outputs| self.handle_shuffle_outputs(shuffle_outputs, &mut outputs));
        if let Err(err) = result {
            self.fail(err.to_string(), &mut outputs);
        }

        self.replay(&mut outputs);
        Ok(outputs)
    }

    /// Handles a network message from a group member.
    pub fn on_message(&mut self, sender: ID, bytes: &[u8]) -> Vec<RoundOutput<ID>> {
        let mut outputs = Vec::new();

        if self.is_stopped() {
            warn!(
                round_id = %self.round_id,
                ?sender,
                "received a message on a stopped round"
            );
            return outputs;
        }

        if !self.group.contains(&sender) {
            warn!(
                round_id = %self.round_id,
                ?sender,
                "received message from unknown sender"
            );
            return outputs;
        }

        match NetworkMessage::from_bytes(bytes) {
            Ok(envelope) => match envelope.header {
                RoundHeader::Bulk => self.process_bulk(sender, envelope.data, &mut outputs),
                RoundHeader::KeyShuffle => {
                    self.process_key_shuffle(sender, &envelope.data, &mut outputs)
                }
            },
            Err(err) => self.reject(sender, RoundError::Envelope(err)),
        }

        self.replay(&mut outputs);
        outputs
    }

    /// Asks the round to halt after the current phase completed.
    pub fn request_stop(&mut self) {
        debug!(round_id = %self.round_id, phase = self.phase, "stop requested");
        self.stop_requested = true;
    }

    /// Halts the round immediately, marking it as interrupted and unsuccessful.
    pub fn stop(&mut self, reason: impl Into<String>) -> Vec<RoundOutput<ID>> {
        let mut outputs = Vec::new();
        if self.is_stopped() {
            return outputs;
        }
        self.finish(false, true, reason.into(), &mut outputs);
        outputs
    }

    pub fn round_id(&self) -> RoundId {
        self.round_id
    }

    pub fn id(&self) -> ID {
        self.credentials.id()
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn phase(&self) -> u32 {
        self.phase
    }

    pub fn is_stopped(&self) -> bool {
        self.state == RoundState::Finished
    }

    pub fn is_successful(&self) -> bool {
        self.successful
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    pub fn is_leader(&self) -> bool {
        self.group.is_leader(&self.credentials.id())
    }

    pub fn is_server(&self) -> bool {
        self.group.is_server(&self.credentials.id())
    }

    pub fn group(&self) -> &Group<ID> {
        &self.group
    }

    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    /// Our anonymous slot, known once the key shuffle finished.
    pub fn my_slot(&self) -> Option<usize> {
        self.slots.as_ref().map(SlotAssignment::my_slot)
    }

    pub fn slots(&self) -> Option<&SlotAssignment> {
        self.slots.as_ref()
    }

    /// Size of the combined XOR vector of the current phase.
    pub fn expected_bulk_size(&self) -> usize {
        self.expected_bulk_size
    }

    /// Commitments the leader received in this phase.
    pub fn commit_count(&self) -> usize {
        self.aggregator.commit_count()
    }

    /// Contributions the leader received in this phase.
    pub fn data_count(&self) -> usize {
        self.aggregator.data_count()
    }

    pub fn faults(&self) -> &FaultReport {
        &self.faults
    }

    pub fn audit_log(&self) -> &AuditLog<ID> {
        &self.audit_log
    }

    pub fn message_log(&self) -> &MessageLog<ID> {
        &self.message_log
    }

    /// Hands over all accepted bulk messages recorded so far and clears the message log.
    pub fn take_message_log(&mut self) -> Vec<(ID, Vec<u8>)> {
        self.message_log.drain()
    }

    /// Hands over all rejections recorded so far and clears the audit log.
    pub fn take_audit_log(&mut self) -> Vec<AuditEntry<ID>> {
        self.audit_log.drain()
    }

    pub fn offline_log_len(&self) -> usize {
        self.offline_log.len()
    }

    fn change_state(&mut self, state: RoundState) {
        debug!(
            round_id = %self.round_id,
            phase = self.phase,
            from = %self.state,
            to = %state,
            "change state"
        );
        self.state = state;
        self.state_changed = true;
    }

    /// Replays buffered messages for as long as they keep moving the round forward.
    fn replay(&mut self, outputs: &mut Vec<RoundOutput<ID>>) {
        while self.state_changed && !self.is_stopped() {
            self.state_changed = false;
            let entries = self.offline_log.take();
            if entries.is_empty() {
                break;
            }
            debug!(
                round_id = %self.round_id,
                count = entries.len(),
                state = %self.state,
                "replay offline log"
            );
            for (sender, data) in entries {
                if self.is_stopped() {
                    break;
                }
                self.process_bulk(sender, data, outputs);
            }
        }
    }

    fn process_key_shuffle(&mut self, sender: ID, data: &[u8], outputs: &mut Vec<RoundOutput<ID>>) {
        let result = self
            .key_shuffle
            .receive(sender, data)
            .map_err(|err| RoundError::KeyShuffle(err.to_string()))
            .and_then(|shuffle_outputs| self.handle_shuffle_outputs(shuffle_outputs, outputs));
        match result {
            Ok(()) => (),
            Err(err) if err.is_fatal() => self.fail(err.to_string(), outputs),
            Err(err) => self.reject(sender, err),
        }
    }

    fn handle_shuffle_outputs(
        &mut self,
        shuffle_outputs: Vec<ShuffleOutput<ID>>,
        outputs: &mut Vec<RoundOutput<ID>>,
    ) -> Result<(), RoundError> {
        for output in shuffle_outputs {
            match output {
                ShuffleOutput::Send { recipient, data } => outputs.push(RoundOutput::Send {
                    recipient,
                    message: NetworkMessage::key_shuffle(data).to_bytes()?,
                }),
                ShuffleOutput::Broadcast { data } => outputs.push(RoundOutput::Broadcast {
                    message: NetworkMessage::key_shuffle(data).to_bytes()?,
                }),
                ShuffleOutput::Finished(result) => {
                    if self.state != RoundState::KeyShuffling {
                        debug!(round_id = %self.round_id, "ignore late key shuffle result");
                        continue;
                    }
                    self.key_shuffle_finished(result, outputs)?;
                }
            }
        }
        Ok(())
    }

    fn key_shuffle_finished(
        &mut self,
        result: ShuffleResult,
        outputs: &mut Vec<RoundOutput<ID>>,
    ) -> Result<(), RoundError> {
        self.faults.add_bad_members(result.bad_members.iter().copied());

        if !result.successful {
            return Err(RoundError::ShuffleFailed);
        }

        if result.descriptors.len() != self.group.count() {
            return Err(RoundError::IncompleteShuffle(
                result.descriptors.len(),
                self.group.count(),
            ));
        }

        let slots =
            SlotAssignment::from_descriptors(&result.descriptors, &self.writer.verifying_key())?;
        info!(
            round_id = %self.round_id,
            my_slot = slots.my_slot(),
            "key shuffle finished"
        );
        self.slots = Some(slots);

        self.start_phase(outputs)
    }

    /// Prepares our contributions for the current phase and commits to them.
    fn start_phase(&mut self, outputs: &mut Vec<RoundOutput<ID>>) -> Result<(), RoundError> {
        let state = if self.is_leader() {
            RoundState::CommitSharing
        } else {
            RoundState::CommitReceiving
        };
        self.change_state(state);

        let (expected_bulk_size, my_slot, offset, slot_size) = {
            let slots = self.slots.as_ref().ok_or(RoundError::ShuffleFailed)?;
            let my_slot = slots.my_slot();
            let slot_size = slots.slot(my_slot).map(|slot| slot.size()).unwrap_or_default();
            (slots.total_length(), my_slot, slots.offset(my_slot), slot_size)
        };
        self.expected_bulk_size = expected_bulk_size;
        self.aggregator.reset(
            self.group.count(),
            self.group.server_count(),
            expected_bulk_size,
        );

        info!(
            round_id = %self.round_id,
            phase = self.phase,
            bulk_size = expected_bulk_size,
            "start phase"
        );

        let mut next_payload = self.data_source.next_payload(self.config.max_payload_size);
        if next_payload.len() > self.config.max_payload_size {
            warn!(
                len = next_payload.len(),
                max = self.config.max_payload_size,
                "truncating payload exceeding max payload size"
            );
            next_payload.truncate(self.config.max_payload_size);
        }

        let mut record = self.writer.encode(&self.rng, self.phase, next_payload)?;
        self.fault_hook.slot_record(self.phase, &mut record);
        if record.len() != slot_size {
            return Err(RoundError::RecordSize(record.len(), slot_size));
        }

        let mut user_xor = self.pads.user_pad(expected_bulk_size)?;
        xor_into(&mut user_xor[offset..offset + slot_size], &record)?;
        debug!(
            phase = self.phase,
            slot = my_slot,
            announced = self.writer.announced_len(),
            "wrote own slot record"
        );
        self.fault_hook
            .contribution(Role::User, self.phase, &mut user_xor);
        let (digest, reveal) = self.prepare_reveal(MessageType::UserBulkData, user_xor)?;
        self.user_reveal = Some(reveal);
        self.send_to_leader(MessageType::UserCommitData, digest.to_vec(), outputs)?;

        if self.is_server() {
            let mut server_xor = self.pads.server_pad(expected_bulk_size)?;
            self.fault_hook
                .contribution(Role::Server, self.phase, &mut server_xor);
            let (digest, reveal) = self.prepare_reveal(MessageType::ServerBulkData, server_xor)?;
            self.server_reveal = Some(reveal);
            self.send_to_leader(MessageType::ServerCommitData, digest.to_vec(), outputs)?;
        }

        Ok(())
    }

    fn prepare_reveal(
        &self,
        message_type: MessageType,
        xor: Vec<u8>,
    ) -> Result<(Digest, PendingReveal), RoundError> {
        let message = self.sign(message_type, xor.clone())?;
        Ok((message.digest(), PendingReveal { xor, message }))
    }

    fn process_bulk(&mut self, sender: ID, data: Vec<u8>, outputs: &mut Vec<RoundOutput<ID>>) {
        match self.handle_bulk(sender, &data, outputs) {
            Ok(Processed::Handled) => self.message_log.push(sender, data),
            Ok(Processed::Buffered) => {
                debug!(
                    round_id = %self.round_id,
                    ?sender,
                    state = %self.state,
                    "buffer premature message"
                );
                self.offline_log.push(sender, data);
            }
            Err(err) if err.is_fatal() => {
                self.message_log.push(sender, data);
                self.fail(err.to_string(), outputs);
            }
            Err(err) => self.reject(sender, err),
        }
    }

    fn handle_bulk(
        &mut self,
        sender: ID,
        data: &[u8],
        outputs: &mut Vec<RoundOutput<ID>>,
    ) -> Result<Processed, RoundError> {
        let signed = SignedMessage::from_bytes(data).map_err(MessageError::from)?;
        let identity_key = self
            .group
            .get(&sender)
            .map(|member| member.identity_key)
            .ok_or(RoundError::UnknownSender)?;
        signed.verify(&identity_key)?;

        if self.state == RoundState::Offline {
            return Err(RoundError::NotStarted);
        }

        let message = signed.message()?;
        if message.round_id != self.round_id {
            return Err(RoundError::RoundIdMismatch(message.round_id, self.round_id));
        }

        self.check_role(sender, message.message_type)?;

        if !self.ready_for(message.message_type) {
            return Ok(Processed::Buffered);
        }

        if message.phase != self.phase {
            return Err(RoundError::PhaseMismatch(message.phase, self.phase));
        }

        debug!(
            round_id = %self.round_id,
            phase = self.phase,
            ?sender,
            message_type = %message.message_type,
            "received bulk message"
        );

        match message.message_type {
            MessageType::UserCommitData => {
                self.handle_commit(Role::User, sender, &message, outputs)
            }
            MessageType::ServerCommitData => {
                self.handle_commit(Role::Server, sender, &message, outputs)
            }
            MessageType::LeaderCommitData => self.handle_leader_commit(&message, outputs),
            MessageType::UserBulkData => {
                self.handle_data(Role::User, sender, message, &signed, outputs)
            }
            MessageType::ServerBulkData => {
                self.handle_data(Role::Server, sender, message, &signed, outputs)
            }
            MessageType::LeaderBulkData => self.handle_leader_data(message, outputs),
        }?;

        Ok(Processed::Handled)
    }

    /// Rejects messages which could never be processed by us or are not authorized.
    fn check_role(&self, sender: ID, message_type: MessageType) -> Result<(), RoundError> {
        if message_type.is_leader_bound() && !self.is_leader() {
            return Err(RoundError::NotLeader(message_type));
        }

        if message_type.is_from_leader() && !self.group.is_leader(&sender) {
            return Err(RoundError::NotFromLeader(message_type));
        }

        if matches!(
            message_type,
            MessageType::ServerCommitData | MessageType::ServerBulkData
        ) && !self.group.is_server(&sender)
        {
            return Err(RoundError::NotFromServer(message_type));
        }

        Ok(())
    }

    fn ready_for(&self, message_type: MessageType) -> bool {
        let state = match message_type {
            MessageType::UserCommitData | MessageType::ServerCommitData => {
                RoundState::CommitSharing
            }
            MessageType::LeaderCommitData => RoundState::CommitReceiving,
            MessageType::UserBulkData | MessageType::ServerBulkData => RoundState::DataSharing,
            MessageType::LeaderBulkData => RoundState::DataReceiving,
        };
        self.state == state
    }

    fn contributor_index(&self, role: Role, sender: &ID) -> Result<usize, RoundError> {
        match role {
            Role::User => self.group.index(sender),
            Role::Server => self.group.server_index(sender),
        }
        .ok_or(RoundError::UnknownSender)
    }

    fn handle_commit(
        &mut self,
        role: Role,
        sender: ID,
        message: &BulkMessage,
        outputs: &mut Vec<RoundOutput<ID>>,
    ) -> Result<(), RoundError> {
        let idx = self.contributor_index(role, &sender)?;
        let digest = message.digest()?;
        if !self.aggregator.add_commit(role, idx, digest)? {
            return Ok(());
        }

        debug!(round_id = %self.round_id, phase = self.phase, "leader has all commits");
        self.change_state(RoundState::CommitReceiving);
        let digest = self.aggregator.aggregate_digest()?;
        self.broadcast(MessageType::LeaderCommitData, digest.to_vec(), outputs)
    }

    fn handle_leader_commit(
        &mut self,
        message: &BulkMessage,
        outputs: &mut Vec<RoundOutput<ID>>,
    ) -> Result<(), RoundError> {
        // The aggregate can't be checked by members, it only binds the leader.
        message.digest()?;

        let state = if self.is_leader() {
            RoundState::DataSharing
        } else {
            RoundState::DataReceiving
        };
        self.change_state(state);

        if let Some(reveal) = self.user_reveal.take() {
            let message = self.reveal(Role::User, MessageType::UserBulkData, reveal)?;
            self.send_signed_to_leader(&message, outputs)?;
        }
        if let Some(reveal) = self.server_reveal.take() {
            let message = self.reveal(Role::Server, MessageType::ServerBulkData, reveal)?;
            self.send_signed_to_leader(&message, outputs)?;
        }
        Ok(())
    }

    /// Returns the message revealing our contribution, re-signed if the fault hook altered it.
    fn reveal(
        &mut self,
        role: Role,
        message_type: MessageType,
        reveal: PendingReveal,
    ) -> Result<SignedMessage, RoundError> {
        let mut xor = reveal.xor.clone();
        self.fault_hook.reveal(role, self.phase, &mut xor);
        if xor == reveal.xor {
            Ok(reveal.message)
        } else {
            self.sign(message_type, xor)
        }
    }

    fn handle_data(
        &mut self,
        role: Role,
        sender: ID,
        message: BulkMessage,
        signed: &SignedMessage,
        outputs: &mut Vec<RoundOutput<ID>>,
    ) -> Result<(), RoundError> {
        let idx = self.contributor_index(role, &sender)?;
        let complete = self.aggregator.add_data(
            role,
            idx,
            message.payload,
            signed.digest(),
            self.config.verify_reveals,
        )?;
        if !complete {
            return Ok(());
        }

        debug!(round_id = %self.round_id, phase = self.phase, "leader has all data");
        self.change_state(RoundState::DataReceiving);

        if !self.config.verify_reveals {
            let (users, servers) = self.aggregator.mismatching_reveals()?;
            if !users.is_empty() || !servers.is_empty() {
                warn!(
                    round_id = %self.round_id,
                    phase = self.phase,
                    ?users,
                    ?servers,
                    "revealed data does not match commitments"
                );
            }
        }

        let mut combined = self.aggregator.combine()?;
        self.fault_hook.combined(self.phase, &mut combined);
        self.broadcast(MessageType::LeaderBulkData, combined, outputs)
    }

    fn handle_leader_data(
        &mut self,
        message: BulkMessage,
        outputs: &mut Vec<RoundOutput<ID>>,
    ) -> Result<(), RoundError> {
        if message.payload.len() != self.expected_bulk_size {
            return Err(RoundError::InvalidBulkLength(
                message.payload.len(),
                self.expected_bulk_size,
            ));
        }

        self.process_slots(&message.payload, outputs)?;

        if self.stop_requested {
            self.finish(true, true, "stop requested".into(), outputs);
            return Ok(());
        }

        self.user_reveal = None;
        self.server_reveal = None;
        self.phase += 1;
        self.start_phase(outputs)
    }

    /// Recovers all slot records of this phase and delivers non-empty payloads.
    fn process_slots(
        &mut self,
        data: &[u8],
        outputs: &mut Vec<RoundOutput<ID>>,
    ) -> Result<(), RoundError> {
        let leader = self
            .group
            .index(&self.group.leader())
            .ok_or(RoundError::UnknownSender)?;
        let slots = self.slots.as_mut().ok_or(RoundError::ShuffleFailed)?;
        let chunks = slots.split(data)?;

        for (idx, chunk) in chunks.iter().enumerate() {
            match slots.decode(idx, chunk, self.phase, self.config.max_payload_size) {
                Ok(SlotContent::Payload(payload)) => {
                    if payload.is_empty() {
                        continue;
                    }
                    debug!(
                        round_id = %self.round_id,
                        phase = self.phase,
                        slot = idx,
                        len = payload.len(),
                        "deliver payload"
                    );
                    outputs.push(RoundOutput::Deliver {
                        round_id: self.round_id,
                        slot: idx,
                        payload,
                    });
                }
                Ok(SlotContent::Replayed { phase }) => {
                    warn!(
                        round_id = %self.round_id,
                        phase = self.phase,
                        slot = idx,
                        record_phase = phase,
                        "leader replayed a slot record"
                    );
                    self.faults.add_replayed_slot(idx, leader);
                    return Err(RoundError::ReplayedRecord(idx, phase, self.phase));
                }
                Err(err) => {
                    warn!(
                        round_id = %self.round_id,
                        phase = self.phase,
                        slot = idx,
                        "verification of slot failed: {err}"
                    );
                    self.faults.add_faulty_slot(idx);
                    return Err(err.into());
                }
            }
        }

        Ok(())
    }

    fn sign(
        &self,
        message_type: MessageType,
        payload: Vec<u8>,
    ) -> Result<SignedMessage, RoundError> {
        let message = BulkMessage::new(message_type, self.round_id, self.phase, payload);
        Ok(SignedMessage::sign(
            &message,
            self.credentials.identity_secret(),
        )?)
    }

    fn send_to_leader(
        &self,
        message_type: MessageType,
        payload: Vec<u8>,
        outputs: &mut Vec<RoundOutput<ID>>,
    ) -> Result<(), RoundError> {
        let message = self.sign(message_type, payload)?;
        self.send_signed_to_leader(&message, outputs)
    }

    fn send_signed_to_leader(
        &self,
        message: &SignedMessage,
        outputs: &mut Vec<RoundOutput<ID>>,
    ) -> Result<(), RoundError> {
        outputs.push(RoundOutput::Send {
            recipient: self.group.leader(),
            message: NetworkMessage::bulk(message.to_bytes()?).to_bytes()?,
        });
        Ok(())
    }

    fn broadcast(
        &self,
        message_type: MessageType,
        payload: Vec<u8>,
        outputs: &mut Vec<RoundOutput<ID>>,
    ) -> Result<(), RoundError> {
        let message = self.sign(message_type, payload)?;
        outputs.push(RoundOutput::Broadcast {
            message: NetworkMessage::bulk(message.to_bytes()?).to_bytes()?,
        });
        Ok(())
    }

    /// Drops a message we refused to process and records why.
    fn reject(&mut self, sender: ID, err: RoundError) {
        warn!(
            round_id = %self.round_id,
            phase = self.phase,
            state = %self.state,
            ?sender,
            "rejected message: {err}"
        );
        self.audit_log.push(AuditEntry {
            round_id: self.round_id,
            phase: self.phase,
            sender,
            reason: err.to_string(),
        });
    }

    fn fail(&mut self, reason: String, outputs: &mut Vec<RoundOutput<ID>>) {
        warn!(round_id = %self.round_id, phase = self.phase, "round failed: {reason}");
        self.finish(false, self.interrupted, reason, outputs);
    }

    fn finish(
        &mut self,
        successful: bool,
        interrupted: bool,
        reason: String,
        outputs: &mut Vec<RoundOutput<ID>>,
    ) {
        self.successful = successful;
        self.interrupted = interrupted;
        self.stop_reason = Some(reason.clone());
        self.offline_log.clear();
        self.user_reveal = None;
        self.server_reveal = None;
        self.change_state(RoundState::Finished);

        info!(
            round_id = %self.round_id,
            phase = self.phase,
            successful,
            interrupted,
            "round finished: {reason}"
        );

        let bad_members = self
            .faults
            .bad_members()
            .into_iter()
            .filter_map(|idx| self.group.member(idx).map(|member| member.id))
            .collect();
        let suspected_leader = self
            .faults
            .suspected_leader()
            .and_then(|idx| self.group.member(idx).map(|member| member.id));
        outputs.push(RoundOutput::Finished(RoundResult {
            round_id: self.round_id,
            successful,
            interrupted,
            reason: Some(reason),
            bad_members,
            faulty_slots: self.faults.faulty_slots(),
            replayed_slots: self.faults.replayed_slots(),
            suspected_leader,
        }));
    }
}

impl<ID, KS, DS> fmt::Debug for BulkRound<ID, KS, DS>
where
    ID: IdentityHandle,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkRound")
            .field("round_id", &self.round_id)
            .field("id", &self.credentials.id())
            .field("state", &self.state)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum RoundError {
    #[error("round was already started")]
    AlreadyStarted,

    #[error("local member is not part of the group")]
    NotAMember,

    #[error("sender is not part of the group")]
    UnknownSender,

    #[error("received bulk message before round was started")]
    NotStarted,

    #[error("invalid envelope: {0}")]
    Envelope(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error("message for round {0}, expected {1}")]
    RoundIdMismatch(RoundId, RoundId),

    #[error("message for phase {0} while in phase {1}")]
    PhaseMismatch(u32, u32),

    #[error("{0} message can only be handled by the leader")]
    NotLeader(MessageType),

    #[error("{0} message from a member which is not the leader")]
    NotFromLeader(MessageType),

    #[error("{0} message from a member which is not a server")]
    NotFromServer(MessageType),

    #[error("leader bulk data of {0} bytes does not match expected bulk size {1}")]
    InvalidBulkLength(usize, usize),

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error(transparent)]
    Slot(#[from] SlotError),

    #[error(transparent)]
    Pad(#[from] PadError),

    #[error(transparent)]
    Rng(#[from] RngError),

    #[error("key shuffle error: {0}")]
    KeyShuffle(String),

    #[error("key shuffle failed")]
    ShuffleFailed,

    #[error("key shuffle yielded {0} descriptors for a group of {1}")]
    IncompleteShuffle(usize, usize),

    #[error("slot {0} carries a record of phase {1} in phase {2}")]
    ReplayedRecord(usize, u32, u32),

    #[error("own slot record of {0} bytes does not fit slot of {1} bytes")]
    RecordSize(usize, usize),

    #[error(transparent)]
    Xor(#[from] XorError),
}

impl RoundError {
    /// Error ends the round instead of only rejecting a single message.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RoundError::Encode(_)
                | RoundError::Slot(_)
                | RoundError::Pad(_)
                | RoundError::Rng(_)
                | RoundError::ShuffleFailed
                | RoundError::IncompleteShuffle(_, _)
                | RoundError::ReplayedRecord(_, _, _)
                | RoundError::RecordSize(_, _)
                | RoundError::Xor(_)
        )
    }
}
