//! In-memory transports for exercising the protocol without sockets.

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::clusters::Message;
use crate::clusters::transport::Transport;
use crate::error::TransportError;

/// Forwards every send to a channel the test inspects. Never receives.
pub(crate) struct RecordingTransport {
    sent: mpsc::UnboundedSender<(SocketAddr, Message)>,
    failing: Mutex<HashSet<SocketAddr>>,
}

impl RecordingTransport {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(SocketAddr, Message)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            sent: tx,
            failing: Mutex::new(HashSet::new()),
        });
        (transport, rx)
    }

    pub(crate) fn fail_sends_to(&self, target: SocketAddr) {
        self.failing.lock().insert(target);
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, target: SocketAddr, message: &Message) -> Result<(), TransportError> {
        if self.failing.lock().contains(&target) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "unreachable").into());
        }
        let _ = self.sent.send((target, message.clone()));
        Ok(())
    }

    async fn recv(&self) -> Result<Message, TransportError> {
        std::future::pending().await
    }
}

/// A lossless switch between attached nodes. Links can be cut and nodes taken
/// down; traffic over a cut link or to a down node vanishes silently, like UDP.
#[derive(Default)]
pub(crate) struct Network {
    inboxes: Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<Message>>>,
    cut: Mutex<HashSet<(SocketAddr, SocketAddr)>>,
    down: Mutex<HashSet<SocketAddr>>,
    delivered: Mutex<Vec<(SocketAddr, SocketAddr)>>,
}

impl Network {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn attach(self: &Arc<Self>, local: SocketAddr) -> Arc<NetTransport> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.lock().insert(local, tx);
        Arc::new(NetTransport {
            local,
            network: Arc::clone(self),
            inbox: tokio::sync::Mutex::new(rx),
        })
    }

    /// Cuts the link between `a` and `b` in both directions.
    pub(crate) fn cut(&self, a: SocketAddr, b: SocketAddr) {
        let mut cut = self.cut.lock();
        cut.insert((a, b));
        cut.insert((b, a));
    }

    pub(crate) fn take_down(&self, node: SocketAddr) {
        self.down.lock().insert(node);
    }

    /// Number of messages delivered to `to`, from anyone.
    pub(crate) fn delivered_to(&self, to: SocketAddr) -> usize {
        self.delivered.lock().iter().filter(|(_, t)| *t == to).count()
    }

    fn route(&self, from: SocketAddr, to: SocketAddr, message: &Message) {
        {
            let down = self.down.lock();
            if down.contains(&from) || down.contains(&to) {
                return;
            }
        }
        if self.cut.lock().contains(&(from, to)) {
            return;
        }
        if let Some(inbox) = self.inboxes.lock().get(&to) {
            if inbox.send(message.clone()).is_ok() {
                self.delivered.lock().push((from, to));
            }
        }
    }
}

pub(crate) struct NetTransport {
    local: SocketAddr,
    network: Arc<Network>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
}

#[async_trait]
impl Transport for NetTransport {
    async fn send(&self, target: SocketAddr, message: &Message) -> Result<(), TransportError> {
        self.network.route(self.local, target, message);
        Ok(())
    }

    async fn recv(&self) -> Result<Message, TransportError> {
        self.inbox.lock().await.recv().await.ok_or(TransportError::Closed)
    }
}
