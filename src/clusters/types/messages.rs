use std::net::SocketAddr;

use bincode::{Decode, Encode};

use crate::clusters::BINCODE_CONFIG;

/// The wire format. One optional piggyback record rides on every message.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Message {
    /// Correlation id. Acks echo the id of the ping or indirect ping they answer.
    pub id: u64,
    /// Address of the sender.
    pub address: SocketAddr,
    pub payload: Payload,
    pub piggyback: Option<PiggyBack>,
}

#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub enum Payload {
    Ping,
    /// A relayed ack carries the probed target's address in `payload`.
    Ack { payload: String },
    IndirectPing { target: SocketAddr },
}

#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub enum PiggyBackType {
    Alive,
    Suspect,
    Confirm,
    /// Application payload injected through `Swim::gossip`.
    Broadcast(Vec<u8>),
}

impl PiggyBackType {
    /// Confirm > Suspect > Alive > Broadcast
    pub(crate) fn severity(&self) -> u8 {
        match self {
            PiggyBackType::Confirm => 3,
            PiggyBackType::Suspect => 2,
            PiggyBackType::Alive => 1,
            PiggyBackType::Broadcast(_) => 0,
        }
    }
}

/// A state-change record disseminated by piggybacking.
///
/// For membership kinds `member` is the subject and `incarnation` its
/// incarnation at the time of the change. For broadcasts `member` is the
/// origin and `incarnation` the origin's broadcast sequence number.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct PiggyBack {
    pub kind: PiggyBackType,
    pub member: SocketAddr,
    pub incarnation: u64,
}

/// What a piggyback record is about. Two records with the same subject
/// compete for the same slot in the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Subject {
    Member(SocketAddr),
    Broadcast { origin: SocketAddr, seq: u64 },
}

impl PiggyBack {
    pub fn alive(member: SocketAddr, incarnation: u64) -> Self {
        Self {
            kind: PiggyBackType::Alive,
            member,
            incarnation,
        }
    }

    pub fn suspect(member: SocketAddr, incarnation: u64) -> Self {
        Self {
            kind: PiggyBackType::Suspect,
            member,
            incarnation,
        }
    }

    pub fn confirm(member: SocketAddr, incarnation: u64) -> Self {
        Self {
            kind: PiggyBackType::Confirm,
            member,
            incarnation,
        }
    }

    pub fn broadcast(origin: SocketAddr, seq: u64, data: Vec<u8>) -> Self {
        Self {
            kind: PiggyBackType::Broadcast(data),
            member: origin,
            incarnation: seq,
        }
    }

    pub(crate) fn subject(&self) -> Subject {
        match self.kind {
            PiggyBackType::Broadcast(_) => Subject::Broadcast {
                origin: self.member,
                seq: self.incarnation,
            },
            _ => Subject::Member(self.member),
        }
    }

    /// True when `self` should be kept over `other` for the same subject.
    pub(crate) fn supersedes(&self, other: &PiggyBack) -> bool {
        (self.incarnation, self.kind.severity()) > (other.incarnation, other.kind.severity())
    }

    #[inline]
    pub(crate) fn encoded_size(&self) -> usize {
        bincode::encode_to_vec(self, BINCODE_CONFIG)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

/// An application payload delivered to the local node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Broadcast {
    pub origin: SocketAddr,
    pub data: Vec<u8>,
}
