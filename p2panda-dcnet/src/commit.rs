// SPDX-License-Identifier: MIT OR Apache-2.0

//! Leader-side collection of commitments and revealed contributions.
//!
//! Members first commit to the digest of the data message they are about to reveal. Only after the
//! leader collected a commitment from every user and server and broadcasted the digest over all of
//! them, contributions are revealed and eventually XORed into the combined vector.
use thiserror::Error;

use crate::crypto::sha2::{Digest, sha2_256};
use crate::crypto::{XorError, xor_into};
use crate::group::Role;

/// Per-phase buffers of the leader.
#[derive(Clone, Debug, Default)]
pub struct CommitAggregator {
    expected_bulk_size: usize,
    user_commits: Vec<Option<Digest>>,
    server_commits: Vec<Option<Digest>>,
    user_data: Vec<Option<(Vec<u8>, Digest)>>,
    server_data: Vec<Option<(Vec<u8>, Digest)>>,
}

impl CommitAggregator {
    pub fn new(users: usize, servers: usize, expected_bulk_size: usize) -> Self {
        let mut aggregator = Self::default();
        aggregator.reset(users, servers, expected_bulk_size);
        aggregator
    }

    /// Clears all buffers for the next phase.
    pub fn reset(&mut self, users: usize, servers: usize, expected_bulk_size: usize) {
        self.expected_bulk_size = expected_bulk_size;
        self.user_commits = vec![None; users];
        self.server_commits = vec![None; servers];
        self.user_data = vec![None; users];
        self.server_data = vec![None; servers];
    }

    pub fn expected_bulk_size(&self) -> usize {
        self.expected_bulk_size
    }

    /// Stores a commitment, returns `true` once every user and server committed.
    pub fn add_commit(
        &mut self,
        role: Role,
        idx: usize,
        digest: Digest,
    ) -> Result<bool, CommitError> {
        let commits = match role {
            Role::User => &mut self.user_commits,
            Role::Server => &mut self.server_commits,
        };
        let entry = commits
            .get_mut(idx)
            .ok_or(CommitError::UnknownContributor(role, idx))?;
        if entry.is_some() {
            return Err(CommitError::DuplicateCommit(role, idx));
        }
        *entry = Some(digest);
        Ok(self.has_all_commits())
    }

    pub fn has_all_commits(&self) -> bool {
        self.user_commits.iter().all(Option::is_some)
            && self.server_commits.iter().all(Option::is_some)
    }

    pub fn commit_count(&self) -> usize {
        self.user_commits
            .iter()
            .chain(self.server_commits.iter())
            .filter(|commit| commit.is_some())
            .count()
    }

    /// Digest over all commitments, users first and servers second, each in group order.
    pub fn aggregate_digest(&self) -> Result<Digest, CommitError> {
        let commits = self
            .user_commits
            .iter()
            .chain(self.server_commits.iter())
            .map(|commit| commit.ok_or(CommitError::Incomplete))
            .collect::<Result<Vec<_>, _>>()?;
        let parts = commits.iter().map(|digest| digest.as_slice()).collect::<Vec<_>>();
        Ok(sha2_256(&parts))
    }

    /// Stores a revealed contribution together with the digest of the message carrying it.
    ///
    /// Returns `true` once every user and server revealed. When `verify_reveals` is set the digest
    /// needs to match the earlier commitment.
    pub fn add_data(
        &mut self,
        role: Role,
        idx: usize,
        xor: Vec<u8>,
        packet_digest: Digest,
        verify_reveals: bool,
    ) -> Result<bool, CommitError> {
        let (commits, data) = match role {
            Role::User => (&self.user_commits, &mut self.user_data),
            Role::Server => (&self.server_commits, &mut self.server_data),
        };
        let entry = data
            .get_mut(idx)
            .ok_or(CommitError::UnknownContributor(role, idx))?;
        if entry.is_some() {
            return Err(CommitError::DuplicateData(role, idx));
        }
        if xor.len() != self.expected_bulk_size {
            return Err(CommitError::InvalidLength(
                role,
                xor.len(),
                self.expected_bulk_size,
            ));
        }
        if verify_reveals && commits.get(idx).copied().flatten() != Some(packet_digest) {
            return Err(CommitError::CommitMismatch(role, idx));
        }
        *entry = Some((xor, packet_digest));
        Ok(self.has_all_data())
    }

    pub fn has_all_data(&self) -> bool {
        self.user_data.iter().all(Option::is_some) && self.server_data.iter().all(Option::is_some)
    }

    pub fn data_count(&self) -> usize {
        self.user_data
            .iter()
            .chain(self.server_data.iter())
            .filter(|data| data.is_some())
            .count()
    }

    /// XOR of all revealed contributions.
    pub fn combine(&self) -> Result<Vec<u8>, CommitError> {
        let mut out = vec![0u8; self.expected_bulk_size];
        for entry in self.user_data.iter().chain(self.server_data.iter()) {
            let (xor, _) = entry.as_ref().ok_or(CommitError::Incomplete)?;
            xor_into(&mut out, xor)?;
        }
        Ok(out)
    }

    /// Indices of users and servers whose revealed message does not match their commitment.
    pub fn mismatching_reveals(&self) -> Result<(Vec<usize>, Vec<usize>), CommitError> {
        fn collect(
            commits: &[Option<Digest>],
            data: &[Option<(Vec<u8>, Digest)>],
        ) -> Result<(Vec<Digest>, Vec<Digest>), CommitError> {
            let commits = commits
                .iter()
                .map(|commit| commit.ok_or(CommitError::Incomplete))
                .collect::<Result<Vec<_>, _>>()?;
            let digests = data
                .iter()
                .map(|entry| {
                    entry
                        .as_ref()
                        .map(|(_, digest)| *digest)
                        .ok_or(CommitError::Incomplete)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok((commits, digests))
        }

        let (commits, digests) = collect(&self.user_commits, &self.user_data)?;
        let users = check_commits(&commits, &digests);
        let (commits, digests) = collect(&self.server_commits, &self.server_data)?;
        let servers = check_commits(&commits, &digests);
        Ok((users, servers))
    }
}

/// Returns the indices at which commitments and digests differ.
///
/// # Panics
///
/// Panics if both lists are of different length.
pub fn check_commits(commits: &[Digest], digests: &[Digest]) -> Vec<usize> {
    assert_eq!(
        commits.len(),
        digests.len(),
        "commits and digests need to be of same length"
    );
    commits
        .iter()
        .zip(digests.iter())
        .enumerate()
        .filter(|(_, (commit, digest))| commit != digest)
        .map(|(idx, _)| idx)
        .collect()
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("no {0} with index {1}")]
    UnknownContributor(Role, usize),

    #[error("already received commit of {0} {1}")]
    DuplicateCommit(Role, usize),

    #[error("already received data of {0} {1}")]
    DuplicateData(Role, usize),

    #[error("{0} data of {1} bytes does not match expected bulk size {2}")]
    InvalidLength(Role, usize, usize),

    #[error("revealed data of {0} {1} does not match its commitment")]
    CommitMismatch(Role, usize),

    #[error("not all contributions of this phase have been received")]
    Incomplete,

    #[error(transparent)]
    Xor(#[from] XorError),
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::crypto::sha2::sha2_256;
    use crate::group::Role;

    use super::{CommitAggregator, CommitError, check_commits};

    #[test]
    fn commits_before_data() {
        let mut aggregator = CommitAggregator::new(2, 1, 4);

        assert!(!aggregator.add_commit(Role::User, 0, [1; 32]).unwrap());
        assert_matches!(
            aggregator.add_commit(Role::User, 0, [1; 32]),
            Err(CommitError::DuplicateCommit(Role::User, 0))
        );
        assert_matches!(aggregator.aggregate_digest(), Err(CommitError::Incomplete));
        assert!(!aggregator.add_commit(Role::Server, 0, [3; 32]).unwrap());
        assert!(aggregator.add_commit(Role::User, 1, [2; 32]).unwrap());
        assert_eq!(aggregator.commit_count(), 3);

        // Users first, then servers.
        assert_eq!(
            aggregator.aggregate_digest().unwrap(),
            sha2_256(&[&[1; 32], &[2; 32], &[3; 32]])
        );

        assert!(!aggregator.add_data(Role::User, 0, vec![1, 0, 0, 0], [1; 32], false).unwrap());
        assert!(!aggregator.add_data(Role::User, 1, vec![0, 2, 0, 0], [2; 32], false).unwrap());
        assert!(aggregator.add_data(Role::Server, 0, vec![1, 0, 0, 4], [3; 32], false).unwrap());
        assert_eq!(aggregator.combine().unwrap(), vec![0, 2, 0, 4]);

        aggregator.reset(2, 1, 8);
        assert_eq!(aggregator.commit_count(), 0);
        assert_eq!(aggregator.data_count(), 0);
        assert_eq!(aggregator.expected_bulk_size(), 8);
    }

    #[test]
    fn invalid_data() {
        let mut aggregator = CommitAggregator::new(1, 1, 4);
        aggregator.add_commit(Role::User, 0, [1; 32]).unwrap();
        aggregator.add_commit(Role::Server, 0, [2; 32]).unwrap();

        assert_matches!(
            aggregator.add_data(Role::User, 0, vec![0; 3], [1; 32], false),
            Err(CommitError::InvalidLength(Role::User, 3, 4))
        );
        assert_matches!(
            aggregator.add_data(Role::Server, 4, vec![0; 4], [1; 32], false),
            Err(CommitError::UnknownContributor(Role::Server, 4))
        );
        assert_matches!(
            aggregator.add_data(Role::Server, 0, vec![0; 4], [9; 32], true),
            Err(CommitError::CommitMismatch(Role::Server, 0))
        );
        assert_eq!(aggregator.data_count(), 0);

        // Without verification the mismatch goes through but can still be detected.
        aggregator.add_data(Role::User, 0, vec![0; 4], [1; 32], false).unwrap();
        aggregator.add_data(Role::Server, 0, vec![0; 4], [9; 32], false).unwrap();
        assert_matches!(
            aggregator.add_data(Role::User, 0, vec![0; 4], [1; 32], false),
            Err(CommitError::DuplicateData(Role::User, 0))
        );
        assert_eq!(aggregator.mismatching_reveals().unwrap(), (vec![], vec![0]));
    }

    #[test]
    fn mismatching_commits() {
        assert_eq!(
            check_commits(&[[1; 32], [2; 32], [3; 32]], &[[1; 32], [0; 32], [4; 32]]),
            vec![1, 2]
        );
        assert!(check_commits(&[], &[]).is_empty());
    }

    #[test]
    #[should_panic]
    fn commits_of_different_length() {
        check_commits(&[[1; 32]], &[]);
    }
}
