use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::clusters::transport::Transport;
use crate::clusters::{Message, Payload, PiggyBack};
use crate::error::TransportError;

/// Receives every inbound message. Implemented by the protocol facade and injected
/// into the endpoint, so the transport side never depends on protocol logic.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: Message);
}

/// Transport-adjacent half of the protocol: builds outgoing messages, runs the
/// receive loop and owns the wait points of in-flight probes, keyed by message id.
pub struct MessageEndpoint {
    local: SocketAddr,
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Message>>>,
}

impl MessageEndpoint {
    pub fn new(local: SocketAddr, transport: Arc<dyn Transport>) -> Self {
        Self {
            local,
            transport,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_address(&self) -> SocketAddr {
        self.local
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn message(
        &self,
        id: u64,
        payload: Payload,
        piggyback: Option<PiggyBack>,
    ) -> Message {
        Message {
            id,
            address: self.local,
            payload,
            piggyback,
        }
    }

    pub async fn send(&self, target: SocketAddr, message: &Message) -> Result<(), TransportError> {
        tracing::debug!(%target, id = message.id, payload = ?message.payload, "→ send");
        self.transport.send(target, message).await
    }

    /// Registers a wait point for acks carrying `id`. Dropping the waiter unregisters it.
    pub(crate) fn register(&self, id: u64) -> AckWaiter<'_> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        AckWaiter {
            endpoint: self,
            id,
            rx,
            done: false,
        }
    }

    /// Hands an ack to the probe waiting for it. Returns false if nobody is waiting,
    /// e.g. a second relay answering the same probe.
    pub(crate) fn resolve(&self, id: u64, ack: Message) -> bool {
        match self.pending.lock().remove(&id) {
            Some(tx) => tx.send(ack).is_ok(),
            None => false,
        }
    }

    /// Receive loop. Each message is handled on its own task so a slow indirect
    /// probe never stalls reception.
    pub async fn listen(
        self: Arc<Self>,
        handler: Arc<dyn MessageHandler>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                received = self.transport.recv() => match received {
                    Ok(message) => {
                        tracing::debug!(
                            src = %message.address,
                            id = message.id,
                            payload = ?message.payload,
                            "← recv"
                        );
                        let handler = handler.clone();
                        tokio::spawn(async move { handler.handle(message).await });
                    }
                    Err(TransportError::Closed) => {
                        tracing::warn!("transport closed, receive loop exiting");
                        break;
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to receive message"),
                }
            }
        }
        tracing::info!(addr = %self.local, "message endpoint stopped");
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

pub(crate) struct AckWaiter<'a> {
    endpoint: &'a MessageEndpoint,
    id: u64,
    rx: oneshot::Receiver<Message>,
    done: bool,
}

impl AckWaiter<'_> {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the ack until `deadline`. `None` on timeout.
    pub(crate) async fn wait_until(&mut self, deadline: Instant) -> Option<Message> {
        if self.done {
            return None;
        }
        match time::timeout_at(deadline, &mut self.rx).await {
            Ok(result) => {
                self.done = true;
                result.ok()
            }
            Err(_elapsed) => None,
        }
    }
}

impl Drop for AckWaiter<'_> {
    fn drop(&mut self) {
        self.endpoint.pending.lock().remove(&self.id);
    }
}
