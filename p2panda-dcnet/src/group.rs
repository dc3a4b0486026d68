// SPDX-License-Identifier: MIT OR Apache-2.0

//! Group roster of a bulk round and the local member's credentials.
//!
//! Every member takes part as a "user". A designated subset of members additionally acts as
//! "servers", one member is the "leader" aggregating and rebroadcasting data. Indices into these
//! orderings are stable for the lifetime of a round and used to correlate messages with senders.
use std::fmt;

use thiserror::Error;

use crate::crypto::{ed25519, x25519};
use crate::traits::IdentityHandle;

/// Role a member contributes a XOR vector in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Server => write!(f, "server"),
        }
    }
}

/// Public information about a group member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member<ID> {
    pub id: ID,

    /// Diffie-Hellman key used to derive pairwise pad secrets.
    pub dh_key: x25519::PublicKey,

    /// Long-term key the member signs all of its bulk messages with.
    pub identity_key: ed25519::VerifyingKey,
}

/// Ordered, immutable set of members taking part in a round.
#[derive(Clone, Debug)]
pub struct Group<ID> {
    members: Vec<Member<ID>>,
    servers: Vec<usize>,
    leader: usize,
}

impl<ID> Group<ID>
where
    ID: IdentityHandle,
{
    pub fn new(members: Vec<Member<ID>>, servers: &[ID], leader: ID) -> Result<Self, GroupError> {
        if members.is_empty() {
            return Err(GroupError::NoMembers);
        }

        for (idx, member) in members.iter().enumerate() {
            if members[..idx].iter().any(|other| other.id == member.id) {
                return Err(GroupError::DuplicateMember(format!("{:?}", member.id)));
            }
        }

        if servers.is_empty() {
            return Err(GroupError::NoServers);
        }

        let mut server_indices = Vec::with_capacity(servers.len());
        for server in servers {
            let Some(idx) = members.iter().position(|member| &member.id == server) else {
                return Err(GroupError::UnknownServer(format!("{server:?}")));
            };
            if server_indices.contains(&idx) {
                return Err(GroupError::DuplicateMember(format!("{server:?}")));
            }
            server_indices.push(idx);
        }

        let Some(leader) = members.iter().position(|member| member.id == leader) else {
            return Err(GroupError::UnknownLeader(format!("{leader:?}")));
        };

        Ok(Self {
            members,
            servers: server_indices,
            leader,
        })
    }

    /// Number of users, that is all members.
    pub fn count(&self) -> usize {
        self.members.len()
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Index of member among all users.
    pub fn index(&self, id: &ID) -> Option<usize> {
        self.members.iter().position(|member| &member.id == id)
    }

    /// Index of member among the servers.
    pub fn server_index(&self, id: &ID) -> Option<usize> {
        let idx = self.index(id)?;
        self.servers.iter().position(|server| *server == idx)
    }

    pub fn contains(&self, id: &ID) -> bool {
        self.index(id).is_some()
    }

    pub fn is_server(&self, id: &ID) -> bool {
        self.server_index(id).is_some()
    }

    pub fn leader(&self) -> ID {
        self.members[self.leader].id
    }

    pub fn is_leader(&self, id: &ID) -> bool {
        &self.leader() == id
    }

    pub fn member(&self, idx: usize) -> Option<&Member<ID>> {
        self.members.get(idx)
    }

    pub fn get(&self, id: &ID) -> Option<&Member<ID>> {
        self.members.iter().find(|member| &member.id == id)
    }

    pub fn members(&self) -> &[Member<ID>] {
        &self.members
    }

    /// Servers in server order.
    pub fn servers(&self) -> impl Iterator<Item = &Member<ID>> {
        self.servers.iter().map(|idx| &self.members[*idx])
    }
}

/// Secret key material of the local member.
#[derive(Clone, Debug)]
pub struct Credentials<ID> {
    id: ID,
    dh_secret: x25519::SecretKey,
    identity_secret: ed25519::SigningKey,
}

impl<ID> Credentials<ID>
where
    ID: IdentityHandle,
{
    pub fn new(
        id: ID,
        dh_secret: x25519::SecretKey,
        identity_secret: ed25519::SigningKey,
    ) -> Self {
        Self {
            id,
            dh_secret,
            identity_secret,
        }
    }

    pub fn id(&self) -> ID {
        self.id
    }

    pub fn dh_secret(&self) -> &x25519::SecretKey {
        &self.dh_secret
    }

    pub fn identity_secret(&self) -> &ed25519::SigningKey {
        &self.identity_secret
    }

    /// Public part of our credentials, as it should appear in the group roster.
    pub fn member(&self) -> Member<ID> {
        Member {
            id: self.id,
            dh_key: self.dh_secret.public_key(),
            identity_key: self.identity_secret.verifying_key(),
        }
    }
}

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("group needs at least one member")]
    NoMembers,

    #[error("group needs at least one server")]
    NoServers,

    #[error("member {0} is listed more than once")]
    DuplicateMember(String),

    #[error("server {0} is not a member of the group")]
    UnknownServer(String),

    #[error("leader {0} is not a member of the group")]
    UnknownLeader(String),
}
