// SPDX-License-Identifier: MIT OR Apache-2.0

//! Logs kept by a round: premature messages waiting for the right state, rejected messages and all
//! accepted bulk traffic.
use crate::message::RoundId;

/// Messages which arrived before the round was ready to process them, in arrival order.
#[derive(Clone, Debug)]
pub struct OfflineLog<ID> {
    entries: Vec<(ID, Vec<u8>)>,
}

impl<ID> Default for OfflineLog<ID> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<ID> OfflineLog<ID> {
    pub fn push(&mut self, sender: ID, bytes: Vec<u8>) {
        self.entries.push((sender, bytes));
    }

    /// Removes and returns all entries for replay.
    pub fn take(&mut self) -> Vec<(ID, Vec<u8>)> {
        std::mem::take(&mut self.entries)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rejected message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditEntry<ID> {
    pub round_id: RoundId,
    pub phase: u32,
    pub sender: ID,
    pub reason: String,
}

/// Append-only record of every message the round refused to process.
///
/// The log grows for as long as the round runs. Long-running rounds should hand entries over to
/// whoever evaluates them with [`AuditLog::drain`].
#[derive(Clone, Debug)]
pub struct AuditLog<ID> {
    entries: Vec<AuditEntry<ID>>,
}

impl<ID> Default for AuditLog<ID> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<ID> AuditLog<ID>
where
    ID: PartialEq,
{
    pub fn push(&mut self, entry: AuditEntry<ID>) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[AuditEntry<ID>] {
        &self.entries
    }

    /// Removes and returns all entries recorded so far.
    pub fn drain(&mut self) -> Vec<AuditEntry<ID>> {
        std::mem::take(&mut self.entries)
    }

    /// Rejections of messages from a given sender.
    pub fn by_sender<'a>(&'a self, sender: &'a ID) -> impl Iterator<Item = &'a AuditEntry<ID>> {
        self.entries.iter().filter(move |entry| &entry.sender == sender)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Accepted bulk messages in processing order, kept for later accountability.
///
/// Every phase adds the full XOR vectors the member received. Drain it with [`MessageLog::drain`]
/// once a phase was archived, otherwise it keeps every vector of the round.
#[derive(Clone, Debug)]
pub struct MessageLog<ID> {
    entries: Vec<(ID, Vec<u8>)>,
}

impl<ID> Default for MessageLog<ID> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<ID> MessageLog<ID> {
    pub fn push(&mut self, sender: ID, bytes: Vec<u8>) {
        self.entries.push((sender, bytes));
    }

    pub fn entries(&self) -> &[(ID, Vec<u8>)] {
        &self.entries
    }

    /// Removes and returns all entries recorded so far.
    pub fn drain(&mut self) -> Vec<(ID, Vec<u8>)> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
