use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::SocketAddr;

use parking_lot::Mutex;

use super::probe_order::ProbeOrder;
use crate::clusters::{Member, MemberStatus, PiggyBack};

// Rounds a pruned member's tombstone outlives it. Until then, Alive claims at or
// below the incarnation it died with are stale gossip and cannot resurrect it.
const TOMBSTONE_ROUNDS: u64 = 5;

/// The member registry.
///
/// Every mutation takes the same lock, so incarnation checks and the writes
/// they guard never interleave. Mutators return the piggyback record to
/// disseminate when the claim actually changed local state, `None` when it
/// was stale or redundant.
///
/// ```text
///   (unknown) ── mark_alive ──► Alive ◄──────────────┐
///                                 │                  │ mark_alive with a
///                                 │ mark_suspect     │ strictly higher
///                                 ▼ (inc >= stored)  │ incarnation
///                              Suspect ──────────────┘
///                                 │
///                                 │ confirm (inc >= stored), also from Alive
///                                 ▼
///                               Dead ── reset() prunes it
/// ```
pub struct MemberMap {
    local: SocketAddr,
    state: Mutex<Registry>,
}

struct Registry {
    incarnation: u64,
    members: HashMap<SocketAddr, Member>,
    order: ProbeOrder,
    round: u64,
    // address -> (incarnation at death, round pruned)
    tombstones: HashMap<SocketAddr, (u64, u64)>,
}

impl MemberMap {
    pub fn new(local: SocketAddr, seed: Option<u64>) -> Self {
        Self {
            local,
            state: Mutex::new(Registry {
                incarnation: 0,
                members: HashMap::new(),
                order: ProbeOrder::new(seed),
                round: 0,
                tombstones: HashMap::new(),
            }),
        }
    }

    pub fn local_address(&self) -> SocketAddr {
        self.local
    }

    pub fn local_incarnation(&self) -> u64 {
        self.state.lock().incarnation
    }

    pub fn mark_alive(&self, address: SocketAddr, incarnation: u64) -> Option<PiggyBack> {
        if address == self.local {
            return None;
        }

        let mut state = self.state.lock();
        let registry = &mut *state;
        match registry.members.entry(address) {
            Entry::Vacant(e) => {
                if let Some((dead_at, _)) = registry.tombstones.get(&address) {
                    if incarnation <= *dead_at {
                        return None;
                    }
                }
                registry.tombstones.remove(&address);
                e.insert(Member::alive(address, incarnation));
                registry.order.add(address);
                tracing::info!(member = %address, incarnation, "member joined");
                Some(PiggyBack::alive(address, incarnation))
            }
            Entry::Occupied(e) => {
                let member = e.into_mut();
                // Same-incarnation Alive must not cancel a suspicion; only the
                // member itself can refute by bumping its incarnation.
                let accepted = !member.is_dead() && incarnation > member.incarnation;
                if !accepted {
                    return None;
                }

                if member.status == MemberStatus::Suspect {
                    tracing::info!(member = %address, incarnation, "suspicion refuted");
                }
                member.status = MemberStatus::Alive;
                member.incarnation = incarnation;
                member.suspected_in_round = None;
                Some(PiggyBack::alive(address, incarnation))
            }
        }
    }

    pub fn mark_suspect(&self, address: SocketAddr, incarnation: u64) -> Option<PiggyBack> {
        if address == self.local {
            return Some(self.refute(incarnation));
        }

        let mut state = self.state.lock();
        let round = state.round;
        let member = state.members.get_mut(&address)?;
        if member.status != MemberStatus::Alive || incarnation < member.incarnation {
            return None;
        }

        member.status = MemberStatus::Suspect;
        member.incarnation = incarnation;
        member.suspected_in_round = Some(round);
        tracing::info!(member = %address, incarnation, "member is SUSPECT");
        Some(PiggyBack::suspect(address, incarnation))
    }

    pub fn confirm(&self, address: SocketAddr, incarnation: u64) -> Option<PiggyBack> {
        if address == self.local {
            return Some(self.refute(incarnation));
        }

        let mut state = self.state.lock();
        let member = state.members.get_mut(&address)?;
        if member.is_dead() || incarnation < member.incarnation {
            return None;
        }

        member.status = MemberStatus::Dead;
        member.incarnation = incarnation;
        member.suspected_in_round = None;
        tracing::info!(member = %address, incarnation, "member is DEAD");
        Some(PiggyBack::confirm(address, incarnation))
    }

    /// Someone claims we are suspect or dead. Outbid the claim and re-assert Alive.
    fn refute(&self, claimed: u64) -> PiggyBack {
        let mut state = self.state.lock();
        let new_incarnation = state.incarnation.max(claimed) + 1;
        tracing::info!(
            "Refuting suspicion! (My Inc: {} -> {})",
            state.incarnation,
            new_incarnation
        );
        state.incarnation = new_incarnation;
        PiggyBack::alive(self.local, new_incarnation)
    }

    /// Snapshot of the members in this round's probe order.
    pub fn get_members(&self) -> Vec<Member> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|addr| state.members.get(addr))
            .cloned()
            .collect()
    }

    pub fn get(&self, address: &SocketAddr) -> Option<Member> {
        self.state.lock().members.get(address).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ends the round: prunes dead members and reshuffles the probe order.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let dead: Vec<SocketAddr> = state
            .members
            .values()
            .filter(|m| m.is_dead())
            .map(|m| m.address)
            .collect();
        let round = state.round;
        for addr in &dead {
            if let Some(member) = state.members.remove(addr) {
                state.tombstones.insert(*addr, (member.incarnation, round));
            }
            state.order.remove(addr);
        }
        state
            .tombstones
            .retain(|_, (_, pruned)| round - *pruned < TOMBSTONE_ROUNDS);
        state.order.shuffle();
        state.round += 1;

        tracing::debug!(round = state.round, pruned = dead.len(), "round reset");
    }

    /// Members that have been suspect since before the current round.
    pub fn expired_suspects(&self) -> Vec<(SocketAddr, u64)> {
        let state = self.state.lock();
        state
            .members
            .values()
            .filter(|m| m.status == MemberStatus::Suspect)
            .filter(|m| m.suspected_in_round.is_some_and(|r| r < state.round))
            .map(|m| (m.address, m.incarnation))
            .collect()
    }

    /// Up to `k` random alive members other than `exclude`.
    pub fn pick_relays(&self, k: usize, exclude: SocketAddr) -> Vec<SocketAddr> {
        let mut state = self.state.lock();
        let registry = &mut *state;
        let candidates: Vec<SocketAddr> = registry
            .order
            .iter()
            .filter(|addr| **addr != exclude)
            .filter(|addr| {
                registry
                    .members
                    .get(addr)
                    .is_some_and(|m| m.status == MemberStatus::Alive)
            })
            .copied()
            .collect();
        registry.order.choose(&candidates, k)
    }

    #[cfg(test)]
    pub(crate) fn round(&self) -> u64 {
        self.state.lock().round
    }
}
