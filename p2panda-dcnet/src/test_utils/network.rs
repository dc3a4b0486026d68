// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{BTreeMap, VecDeque};

use crate::message::{MessageType, NetworkMessage, RoundHeader, SignedMessage};
use crate::round::{RoundOutput, RoundResult};
use crate::test_utils::{MemberId, TestRound, TestRoundManager};

/// Delivered message.
#[derive(Clone, Debug)]
pub struct TraceEntry {
    pub sender: MemberId,
    pub recipient: MemberId,
    pub header: Option<RoundHeader>,
    pub message_type: Option<MessageType>,
    pub phase: Option<u32>,
    pub bytes: Vec<u8>,
}

impl TraceEntry {
    fn new(sender: MemberId, recipient: MemberId, bytes: Vec<u8>) -> Self {
        let envelope = NetworkMessage::from_bytes(&bytes).ok();
        let message = envelope
            .as_ref()
            .filter(|envelope| envelope.header == RoundHeader::Bulk)
            .and_then(|envelope| SignedMessage::from_bytes(&envelope.data).ok())
            .and_then(|signed| signed.message().ok());
        Self {
            sender,
            recipient,
            header: envelope.map(|envelope| envelope.header),
            message_type: message.as_ref().map(|message| message.message_type),
            phase: message.map(|message| message.phase),
            bytes,
        }
    }

    pub fn is(&self, message_type: MessageType, phase: u32) -> bool {
        self.message_type == Some(message_type) && self.phase == Some(phase)
    }
}

/// In-memory network delivering messages one at a time in FIFO order.
///
/// Every member runs a round manager with a single (default) round. All delivered messages are
/// recorded in the trace.
pub struct Network {
    managers: BTreeMap<MemberId, TestRoundManager>,
    queue: VecDeque<TraceEntry>,
    held: Vec<TraceEntry>,
    hold_filter: Option<Box<dyn Fn(&TraceEntry) -> bool>>,
    pub trace: Vec<TraceEntry>,
    pub deliveries: Vec<(MemberId, usize, Vec<u8>)>,
    pub results: BTreeMap<MemberId, RoundResult<MemberId>>,
}

impl Network {
    pub fn new(rounds: Vec<TestRound>) -> Self {
        let mut managers = BTreeMap::new();
        for round in rounds {
            let mut manager = TestRoundManager::new();
            let id = round.id();
            manager.insert(round).unwrap();
            managers.insert(id, manager);
        }
        Self {
            managers,
            queue: VecDeque::new(),
            held: Vec::new(),
            hold_filter: None,
            trace: Vec::new(),
            deliveries: Vec::new(),
            results: BTreeMap::new(),
        }
    }

    /// Starts the rounds of all members.
    pub fn start(&mut self) {
        let ids = self.ids();
        for id in ids {
            let outputs = self.round_mut(id).start().unwrap();
            self.handle_outputs(id, outputs);
        }
    }

    pub fn ids(&self) -> Vec<MemberId> {
        self.managers.keys().copied().collect()
    }

    pub fn round(&self, id: MemberId) -> &TestRound {
        self.managers
            .get(&id)
            .and_then(|manager| manager.default_round())
            .expect("member has a round")
    }

    pub fn round_mut(&mut self, id: MemberId) -> &mut TestRound {
        self.managers
            .get_mut(&id)
            .and_then(|manager| manager.default_round_mut())
            .expect("member has a round")
    }

    /// Enqueues a raw message as if `sender` had sent it to `recipient`.
    pub fn inject(&mut self, sender: MemberId, recipient: MemberId, bytes: Vec<u8>) {
        self.queue.push_back(TraceEntry::new(sender, recipient, bytes));
    }

    /// Holds back all messages matching the filter until [`Network::release`] is called.
    pub fn hold(&mut self, filter: impl Fn(&TraceEntry) -> bool + 'static) {
        self.hold_filter = Some(Box::new(filter));
    }

    /// Enqueues all held messages again in their original order.
    pub fn release(&mut self) {
        self.hold_filter = None;
        self.queue.extend(self.held.drain(..));
    }

    pub fn held(&self) -> usize {
        self.held.len()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Delivers the next message, returns `false` if there was nothing to deliver.
    pub fn step(&mut self) -> bool {
        let Some(entry) = self.queue.pop_front() else {
            return false;
        };

        if let Some(filter) = &self.hold_filter {
            if filter(&entry) {
                self.held.push(entry);
                return true;
            }
        }

        let outputs = self
            .managers
            .get_mut(&entry.recipient)
            .expect("recipient exists")
            .on_default_message(entry.sender, &entry.bytes)
            .unwrap();
        let recipient = entry.recipient;
        self.trace.push(entry);
        self.handle_outputs(recipient, outputs);
        true
    }

    /// Delivers messages until the predicate holds. Gives up when the queue runs dry or after
    /// `max_steps` deliveries.
    pub fn process_until(
        &mut self,
        predicate: impl Fn(&Network) -> bool,
        max_steps: usize,
    ) -> bool {
        for _ in 0..max_steps {
            if predicate(self) {
                return true;
            }
            if !self.step() {
                break;
            }
        }
        predicate(self)
    }

    /// Delivers messages until every round halted.
    pub fn process_until_finished(&mut self, max_steps: usize) -> bool {
        self.process_until(|network| network.all_finished(), max_steps)
    }

    pub fn all_finished(&self) -> bool {
        self.managers
            .keys()
            .all(|id| self.round(*id).is_stopped())
    }

    /// Payloads delivered to a member.
    pub fn deliveries_of(&self, id: MemberId) -> Vec<(usize, Vec<u8>)> {
        self.deliveries
            .iter()
            .filter(|(recipient, _, _)| *recipient == id)
            .map(|(_, slot, payload)| (*slot, payload.clone()))
            .collect()
    }

    /// Position in the trace of every delivery of the given message.
    pub fn positions(&self, message_type: MessageType, phase: u32) -> Vec<(usize, &TraceEntry)> {
        self.trace
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is(message_type, phase))
            .collect()
    }

    fn handle_outputs(&mut self, sender: MemberId, outputs: Vec<RoundOutput<MemberId>>) {
        for output in outputs {
            match output {
                RoundOutput::Send { recipient, message } => {
                    self.queue
                        .push_back(TraceEntry::new(sender, recipient, message));
                }
                RoundOutput::Broadcast { message } => {
                    for recipient in self.ids() {
                        self.queue
                            .push_back(TraceEntry::new(sender, recipient, message.clone()));
                    }
                }
                RoundOutput::Deliver { slot, payload, .. } => {
                    self.deliveries.push((sender, slot, payload));
                }
                RoundOutput::Finished(result) => {
                    self.results.insert(sender, result);
                }
            }
        }
    }
}
