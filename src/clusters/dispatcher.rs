use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;

use crate::clusters::recent_event_queue::RecentEventQueue;
use crate::clusters::{
    Awareness, Broadcast, MemberMap, Message, MessageEndpoint, Payload, PiggyBack, PiggyBackType,
    PriorityPBStore,
};

/// Handles inbound messages: applies the piggybacked record, then answers the payload.
pub struct MessageDispatcher {
    members: Arc<MemberMap>,
    store: Arc<PriorityPBStore>,
    endpoint: Arc<MessageEndpoint>,
    awareness: Arc<dyn Awareness>,
    ack_timeout: Duration,
    seen_broadcasts: RecentEventQueue,
    deliver: mpsc::Sender<Broadcast>,
}

impl MessageDispatcher {
    pub fn new(
        members: Arc<MemberMap>,
        store: Arc<PriorityPBStore>,
        endpoint: Arc<MessageEndpoint>,
        awareness: Arc<dyn Awareness>,
        ack_timeout: Duration,
        deliver: mpsc::Sender<Broadcast>,
    ) -> Self {
        Self {
            members,
            store,
            endpoint,
            awareness,
            ack_timeout,
            seen_broadcasts: RecentEventQueue::default(),
            deliver,
        }
    }

    pub async fn handle(&self, message: Message) {
        self.observe_sender(message.address);
        if let Some(record) = &message.piggyback {
            self.apply(record);
        }

        let (id, src) = (message.id, message.address);
        match message.payload {
            Payload::Ping => self.reply_ack(id, src).await,
            Payload::IndirectPing { target } => self.relay(id, src, target).await,
            Payload::Ack { .. } => {
                if !self.endpoint.resolve(id, message) {
                    tracing::debug!(%src, id, "ack arrived with no probe waiting");
                }
            }
        }
    }

    /// Anyone who talks to us is alive. A known sender keeps its recorded state.
    fn observe_sender(&self, sender: SocketAddr) {
        if let Some(record) = self.members.mark_alive(sender, 0) {
            self.store.push(record);
        }
    }

    fn apply(&self, record: &PiggyBack) {
        let changed = match &record.kind {
            PiggyBackType::Alive => self.members.mark_alive(record.member, record.incarnation),
            PiggyBackType::Suspect => self.members.mark_suspect(record.member, record.incarnation),
            PiggyBackType::Confirm => self.members.confirm(record.member, record.incarnation),
            PiggyBackType::Broadcast(data) => {
                self.receive_broadcast(record, data);
                return;
            }
        };

        let Some(update) = changed else {
            return;
        };
        if update.member == self.members.local_address() {
            // Being suspected is a sign our own probes or replies are slow.
            self.awareness.apply_delta(1);
        }
        self.store.push(update);
    }

    fn receive_broadcast(&self, record: &PiggyBack, data: &[u8]) {
        let origin = record.member;
        if origin == self.members.local_address() {
            return;
        }
        if !self.seen_broadcasts.insert(origin, record.incarnation) {
            return;
        }

        let broadcast = Broadcast {
            origin,
            data: data.to_vec(),
        };
        match self.deliver.try_send(broadcast) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(%origin, "broadcast receiver is lagging, dropping delivery")
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(%origin, "broadcast receiver dropped")
            }
        }
        self.store.push(record.clone());
    }

    async fn reply_ack(&self, id: u64, to: SocketAddr) {
        let ack = self.endpoint.message(
            id,
            Payload::Ack {
                payload: String::new(),
            },
            self.store.get().ok(),
        );
        if let Err(e) = self.endpoint.send(to, &ack).await {
            tracing::warn!(%to, error = %e, "failed to send ack");
        }
    }

    /// Probes `target` on behalf of `requester` and forwards the ack under the
    /// requester's id. Silence is not reported back.
    async fn relay(&self, id: u64, requester: SocketAddr, target: SocketAddr) {
        let mut waiter = self.endpoint.register(self.endpoint.next_id());
        let ping = self
            .endpoint
            .message(waiter.id(), Payload::Ping, self.store.get().ok());
        if let Err(e) = self.endpoint.send(target, &ping).await {
            tracing::debug!(%requester, %target, error = %e, "indirect probe could not be sent");
            return;
        }

        let deadline = Instant::now() + self.awareness.scale_timeout(self.ack_timeout);
        if waiter.wait_until(deadline).await.is_none() {
            tracing::debug!(%requester, %target, "indirect probe got no ack");
            return;
        }

        let ack = self.endpoint.message(
            id,
            Payload::Ack {
                payload: target.to_string(),
            },
            self.store.get().ok(),
        );
        if let Err(e) = self.endpoint.send(requester, &ack).await {
            tracing::warn!(%requester, %target, error = %e, "failed to forward ack");
        }
    }
}
