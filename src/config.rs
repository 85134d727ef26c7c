use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::LazyLock;
use std::time::Duration;

use clap::Parser;

use crate::error::{Result, SwimError};

pub static ENV: LazyLock<Environment> = LazyLock::new(Environment::init);

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Environment {
    #[arg(long, env = "SWIM_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    #[arg(short, long, env = "SWIM_PORT", default_value_t = 2922)]
    pub port: u16,

    /// Probe period T.
    #[arg(long, env = "SWIM_PERIOD_MS", default_value_t = 1000)]
    pub period_ms: u64,

    /// Direct ping ack timeout. Must be shorter than the probe period.
    #[arg(long, env = "SWIM_ACK_TIMEOUT_MS", default_value_t = 300)]
    pub ack_timeout_ms: u64,

    /// Number of relays asked to probe an unresponsive member (K).
    #[arg(long, env = "SWIM_INDIRECT_COUNT", default_value_t = 3)]
    pub indirect_count: usize,

    /// How many outgoing messages may carry the same gossip record.
    #[arg(long, env = "SWIM_MAX_LOCAL_COUNT", default_value_t = 6)]
    pub max_local_count: u32,

    #[arg(long, env = "SWIM_MAX_HEALTH_SCORE", default_value_t = 8)]
    pub max_health_score: u32,

    #[arg(long, env = "SWIM_RNG_SEED")]
    pub rng_seed: Option<u64>,

    #[arg(long, env = "SWIM_JOIN_SEED_NODES", value_delimiter = ',')]
    pub join_seed_nodes: Vec<SocketAddr>,

    #[arg(long, env = "SWIM_JOIN_INTERVAL_MS", default_value_t = 1000)]
    pub join_interval_ms: u64,

    #[arg(long, env = "SWIM_JOIN_MULTIPLIER", default_value_t = 2)]
    pub join_multiplier: u32,

    #[arg(long, env = "SWIM_JOIN_MAX_ATTEMPTS", default_value_t = 5)]
    pub join_max_attempts: u32,
}

impl Environment {
    pub fn init() -> Self {
        Environment::parse()
    }

    pub fn swim_config(&self) -> SwimConfig {
        SwimConfig {
            max_local_count: self.max_local_count,
            period: Duration::from_millis(self.period_ms),
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            indirect_count: self.indirect_count,
            bind_address: self.host,
            bind_port: self.port,
            rng_seed: self.rng_seed,
        }
    }

    /// Delay before join attempt `attempt` (zero-based), growing geometrically.
    pub fn join_backoff(&self, attempt: u32) -> Duration {
        let factor = self.join_multiplier.max(1).saturating_pow(attempt);
        Duration::from_millis(self.join_interval_ms.saturating_mul(factor as u64))
    }
}

/// Protocol parameters. Immutable once the node is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwimConfig {
    pub max_local_count: u32,
    pub period: Duration,
    pub ack_timeout: Duration,
    pub indirect_count: usize,
    pub bind_address: IpAddr,
    pub bind_port: u16,
    /// Seeds probe order shuffling and relay selection. Random when `None`.
    pub rng_seed: Option<u64>,
}

impl Default for SwimConfig {
    fn default() -> Self {
        Self {
            max_local_count: 6,
            period: Duration::from_millis(1000),
            ack_timeout: Duration::from_millis(300),
            indirect_count: 3,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            bind_port: 2922,
            rng_seed: None,
        }
    }
}

impl SwimConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.bind_port)
    }

    pub fn validate(&self) -> Result<()> {
        // The bind address doubles as the sender address peers reply to.
        if self.bind_address.is_unspecified() {
            return Err(SwimError::InvalidConfig(format!(
                "bind address {} is not reachable by peers",
                self.bind_address
            )));
        }
        if self.ack_timeout.is_zero() {
            return Err(SwimError::InvalidConfig(
                "ack timeout must be positive".into(),
            ));
        }
        if self.period <= self.ack_timeout {
            return Err(SwimError::InvalidConfig(format!(
                "probe period ({:?}) must exceed the ack timeout ({:?})",
                self.period, self.ack_timeout
            )));
        }
        if self.max_local_count == 0 {
            return Err(SwimError::InvalidConfig(
                "max local count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
