use std::net::SocketAddr;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SwimError>;

#[derive(Debug, Error)]
pub enum SwimError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("piggyback store is empty")]
    EmptyStore,

    #[error("swim is already started")]
    AlreadyStarted,

    #[error("broadcast payload of {size} bytes exceeds the {limit} byte budget")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("cluster join failed: {}", format_join_failures(.0))]
    JoinFailed(Vec<(SocketAddr, String)>),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("failed to decode message: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("message of {0} bytes does not fit in a datagram")]
    Oversized(usize),

    #[error("transport closed")]
    Closed,
}

fn format_join_failures(failures: &[(SocketAddr, String)]) -> String {
    if failures.is_empty() {
        return "no seed answered".to_owned();
    }
    failures
        .iter()
        .map(|(addr, reason)| format!("{addr}: {reason}"))
        .collect::<Vec<_>>()
        .join(", ")
}
