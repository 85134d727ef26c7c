use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberStatus {
    Alive,
    Suspect,
    /// Terminal. The member is pruned from the registry on the next reset.
    Dead,
}

/// A known peer, keyed by its address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub address: SocketAddr,
    pub status: MemberStatus,
    pub incarnation: u64,
    pub(crate) suspected_in_round: Option<u64>,
}

impl Member {
    pub(crate) fn alive(address: SocketAddr, incarnation: u64) -> Self {
        Self {
            address,
            status: MemberStatus::Alive,
            incarnation,
            suspected_in_round: None,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.status == MemberStatus::Dead
    }
}
