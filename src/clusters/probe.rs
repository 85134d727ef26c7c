use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::clusters::{Awareness, Member, MemberMap, MessageEndpoint, Payload, PriorityPBStore};
use crate::config::SwimConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The member is dead; nothing was sent.
    Skipped,
    /// An ack arrived, directly or through a relay.
    Acked { indirect: bool },
    /// No ack within the probe period. The member was suspected unless a newer
    /// incarnation had been learned in the meantime.
    Unreachable,
}

/// Failure detector. Drives the probe rounds.
///
/// ```text
///   run() ── each round ──► get_members() snapshot
///                               │ one probe per tick of T, probes overlap
///                               ▼
///   probe(m): Ping ──ack within ack_timeout──► Acked
///               │
///               │ timeout or send error
///               ▼
///             IndirectPing to K relays (same id)
///               │ ──ack (relayed or late) before T──► Acked { indirect }
///               ▼
///             mark_suspect(m)          ─► Unreachable
///
///   end of round: confirm members suspect since an earlier round, reset()
/// ```
pub struct ProbeEngine {
    period: Duration,
    ack_timeout: Duration,
    indirect_count: usize,
    members: Arc<MemberMap>,
    store: Arc<PriorityPBStore>,
    endpoint: Arc<MessageEndpoint>,
    awareness: Arc<dyn Awareness>,
}

impl ProbeEngine {
    pub fn new(
        config: &SwimConfig,
        members: Arc<MemberMap>,
        store: Arc<PriorityPBStore>,
        endpoint: Arc<MessageEndpoint>,
        awareness: Arc<dyn Awareness>,
    ) -> Self {
        Self {
            period: config.period,
            ack_timeout: config.ack_timeout,
            indirect_count: config.indirect_count,
            members,
            store,
            endpoint,
            awareness,
        }
    }

    /// Round loop. Returns once `token` is cancelled; probes already in flight are
    /// left to finish on their own timers.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        tracing::info!(addr = %self.endpoint.local_address(), "failure detector started");

        let mut ticker = time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !token.is_cancelled() {
            if !self.run_round(&mut ticker, &token).await {
                break;
            }
        }
        tracing::info!(addr = %self.endpoint.local_address(), "failure detector stopped");
    }

    async fn run_round(
        self: &Arc<Self>,
        ticker: &mut Interval,
        token: &CancellationToken,
    ) -> bool {
        let members = self.members.get_members();
        if members.is_empty() {
            tokio::select! {
                biased;
                _ = token.cancelled() => return false,
                _ = ticker.tick() => {}
            }
        }

        let mut probes = JoinSet::new();
        for member in members {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    probes.detach_all();
                    return false;
                }
                _ = ticker.tick() => {}
            }
            let engine = Arc::clone(self);
            probes.spawn(async move { engine.probe(member).await });
        }

        while let Some(result) = probes.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "probe task failed");
            }
        }

        self.confirm_expired_suspects();
        self.members.reset();
        true
    }

    pub async fn probe(&self, member: Member) -> ProbeOutcome {
        if member.is_dead() {
            return ProbeOutcome::Skipped;
        }

        let target = member.address;
        let started = Instant::now();
        let deadline = started + self.period;
        let ack_deadline = started + self.scaled_ack_timeout();

        let mut waiter = self.endpoint.register(self.endpoint.next_id());
        let ping = self
            .endpoint
            .message(waiter.id(), Payload::Ping, self.store.get().ok());

        match self.endpoint.send(target, &ping).await {
            Ok(()) => {
                if waiter.wait_until(ack_deadline).await.is_some() {
                    self.awareness.apply_delta(-1);
                    return ProbeOutcome::Acked { indirect: false };
                }
            }
            // A failed send counts as an ack timeout.
            Err(e) => tracing::debug!(%target, error = %e, "direct ping failed"),
        }

        // We reuse the direct probe's id so that a late direct Ack still
        // satisfies the probe during the indirect phase.
        let relays = self.members.pick_relays(self.indirect_count, target);
        tracing::debug!(%target, relays = relays.len(), "escalating to indirect ping");
        for relay in relays {
            self.send_indirect_ping(waiter.id(), relay, target).await;
        }

        if let Some(ack) = waiter.wait_until(deadline).await {
            return ProbeOutcome::Acked {
                indirect: ack.address != target,
            };
        }
        drop(waiter);

        self.awareness.apply_delta(1);
        if let Some(record) = self.members.mark_suspect(target, member.incarnation) {
            self.store.push(record);
        }
        ProbeOutcome::Unreachable
    }

    async fn send_indirect_ping(&self, id: u64, relay: SocketAddr, target: SocketAddr) {
        let request = self.endpoint.message(
            id,
            Payload::IndirectPing { target },
            self.store.get().ok(),
        );
        if let Err(e) = self.endpoint.send(relay, &request).await {
            tracing::debug!(%relay, %target, error = %e, "indirect ping failed");
        }
    }

    // Health scaling takes at most half of the nominal indirect window.
    fn scaled_ack_timeout(&self) -> Duration {
        let cap = self.ack_timeout + (self.period - self.ack_timeout) / 2;
        self.awareness.scale_timeout(self.ack_timeout).min(cap)
    }

    pub(crate) fn confirm_expired_suspects(&self) {
        for (address, incarnation) in self.members.expired_suspects() {
            if let Some(record) = self.members.confirm(address, incarnation) {
                self.store.push(record);
            }
        }
    }
}
