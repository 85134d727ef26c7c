pub mod clusters;
pub mod config;
pub mod error;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::time;

use crate::{
    clusters::{LocalHealth, Swim, UdpTransport},
    config::{ENV, Environment},
};

pub use clusters::{Broadcast, Member, MemberStatus};
pub use config::SwimConfig;
pub use error::{SwimError, TransportError};

#[derive(Debug)]
pub struct StartUp;

impl StartUp {
    pub async fn run(self) -> Result<()> {
        let env = &*ENV;
        let config = env.swim_config();
        config.validate()?;

        let transport = UdpTransport::bind(config.bind_addr())
            .await
            .with_context(|| format!("failed to bind {}", config.bind_addr()))?;
        let awareness = Arc::new(LocalHealth::new(env.max_health_score));
        let (swim, mut broadcasts) = Swim::new(config, Arc::new(transport), awareness)?;
        swim.start()?;

        Self::join_with_retry(&swim, env).await?;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                Some(broadcast) = broadcasts.recv() => {
                    tracing::info!(
                        origin = %broadcast.origin,
                        bytes = broadcast.data.len(),
                        "broadcast received"
                    );
                }
            }
        }

        tracing::info!("shutting down");
        swim.shutdown().await;
        Ok(())
    }

    async fn join_with_retry(swim: &Swim, env: &Environment) -> Result<()> {
        let mut attempt = 0;
        loop {
            match swim.join(&env.join_seed_nodes).await {
                Ok(joined) => {
                    tracing::info!(joined, "membership established");
                    return Ok(());
                }
                Err(e @ SwimError::JoinFailed(_)) if attempt + 1 < env.join_max_attempts => {
                    let backoff = env.join_backoff(attempt);
                    tracing::warn!(error = %e, attempt, ?backoff, "join failed, retrying");
                    time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e).context("could not join the cluster"),
            }
        }
    }
}
