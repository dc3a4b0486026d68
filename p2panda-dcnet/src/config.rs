// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for bulk rounds.
use serde::{Deserialize, Serialize};

/// The default maximum size in bytes of a payload a member can send per phase.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 4096;

/// Configuration parameters for a bulk round.
///
/// All members of a group need to use the same configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundConfig {
    /// Max payload size in bytes.
    ///
    /// This is the amount of data we ask the data source for in every phase. Slots announcing a
    /// larger payload for the next phase are treated as faulty.
    pub max_payload_size: usize,

    /// Leader compares every revealed contribution with the commitment the member sent earlier
    /// and rejects it on mismatch.
    ///
    /// Disabled by default: without it the commit/reveal exchange only binds the leader's
    /// aggregate digest, a member can still reveal different data than it committed to.
    pub verify_reveals: bool,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            verify_reveals: false,
        }
    }
}
