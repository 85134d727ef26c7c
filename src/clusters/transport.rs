use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::clusters::{BINCODE_CONFIG, Message};
use crate::error::TransportError;

// UDP does not handle splitting large messages up.
// Preventing IP fragmentation is therefore necessary unless we have dedicated fragmentation handling logic.
pub(crate) const MAX_PACKET_BYTES: usize = 1400;

// Room left for a piggyback record once the envelope and largest payload are encoded.
pub(crate) const MAX_PIGGYBACK_BYTES: usize = MAX_PACKET_BYTES - 128;

// ==========================================
// TRANSPORT LAYER (Presentation)
// ==========================================

/// Moves encoded protocol messages between nodes. Neither ordering nor delivery is
/// guaranteed; the protocol tolerates loss, duplication and reordering.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, target: SocketAddr, message: &Message) -> Result<(), TransportError>;

    /// Waits for the next message that decodes.
    async fn recv(&self) -> Result<Message, TransportError>;
}

pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind(bind_addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(bind_addr).await?;
        tracing::info!(addr = %socket.local_addr()?, "transport layer listening");
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, target: SocketAddr, message: &Message) -> Result<(), TransportError> {
        let bytes = bincode::encode_to_vec(message, BINCODE_CONFIG)?;
        if bytes.len() > MAX_PACKET_BYTES {
            return Err(TransportError::Oversized(bytes.len()));
        }
        self.socket.send_to(&bytes, target).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Message, TransportError> {
        let mut buf = vec![0u8; MAX_PACKET_BYTES];
        loop {
            let (len, src) = self.socket.recv_from(&mut buf).await?;
            match bincode::decode_from_slice::<Message, _>(&buf[..len], BINCODE_CONFIG) {
                Ok((message, _)) => return Ok(message),
                // Unknown payload or piggyback kinds end up here.
                Err(e) => tracing::warn!(%src, error = %e, "failed to decode packet"),
            }
        }
    }
}
