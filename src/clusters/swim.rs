use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::clusters::dispatcher::MessageDispatcher;
use crate::clusters::transport::{MAX_PIGGYBACK_BYTES, Transport};
use crate::clusters::{
    Awareness, Broadcast, Member, MemberMap, Message, MessageEndpoint, MessageHandler, Payload,
    PiggyBack, PriorityPBStore, ProbeEngine,
};
use crate::config::SwimConfig;
use crate::error::{Result, SwimError};

const BROADCAST_CHANNEL_CAPACITY: usize = 1024;

/// A SWIM node. Owns the member registry, the gossip store, the failure detector
/// and the receive loop.
///
/// ```text
///                 ┌────────────── Swim ──────────────┐
///   transport ──► │ MessageEndpoint ─► MessageHandler │ ─► MessageDispatcher
///                 │        ▲                          │        │
///                 │        │ ping / indirect ping     │        ▼
///                 │   ProbeEngine ◄──── MemberMap ◄───┼── PriorityPBStore
///                 └──────────────────────────────────┘
/// ```
pub struct Swim {
    config: SwimConfig,
    members: Arc<MemberMap>,
    store: Arc<PriorityPBStore>,
    endpoint: Arc<MessageEndpoint>,
    engine: Arc<ProbeEngine>,
    dispatcher: MessageDispatcher,
    broadcast_seq: AtomicU64,
    started: AtomicBool,
    quit: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Swim {
    /// Builds a node bound to `transport`. Fails on invalid configuration before
    /// anything touches the network. The receiver yields broadcasts from other nodes.
    pub fn new(
        config: SwimConfig,
        transport: Arc<dyn Transport>,
        awareness: Arc<dyn Awareness>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<Broadcast>)> {
        config.validate()?;

        let local = config.bind_addr();
        let members = Arc::new(MemberMap::new(local, config.rng_seed));
        let store = Arc::new(PriorityPBStore::new(config.max_local_count));
        let endpoint = Arc::new(MessageEndpoint::new(local, transport));
        let engine = Arc::new(ProbeEngine::new(
            &config,
            members.clone(),
            store.clone(),
            endpoint.clone(),
            awareness.clone(),
        ));
        let (deliver, broadcasts) = mpsc::channel(BROADCAST_CHANNEL_CAPACITY);
        let dispatcher = MessageDispatcher::new(
            members.clone(),
            store.clone(),
            endpoint.clone(),
            awareness,
            config.ack_timeout,
            deliver,
        );

        let swim = Arc::new(Self {
            config,
            members,
            store,
            endpoint,
            engine,
            dispatcher,
            // Peers dedupe on (origin, seq); a restarted node must not reuse old ids.
            broadcast_seq: AtomicU64::new(rand::random::<u64>() >> 1),
            started: AtomicBool::new(false),
            quit: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });
        Ok((swim, broadcasts))
    }

    /// Spawns the receive loop and the failure detector.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SwimError::AlreadyStarted);
        }

        let handler: Arc<dyn MessageHandler> = self.clone();
        let listener = tokio::spawn(self.endpoint.clone().listen(handler, self.quit.clone()));
        let detector = tokio::spawn(self.engine.clone().run(self.quit.clone()));
        self.tasks.lock().extend([listener, detector]);

        tracing::info!(addr = %self.local_address(), "swim started");
        Ok(())
    }

    /// Pings every seed concurrently, announcing ourselves as Alive. Returns how many
    /// seeds answered within one probe period. With no seeds the node starts a new
    /// cluster on its own. Acks are only seen once the node is started.
    pub async fn join(&self, seeds: &[SocketAddr]) -> Result<usize> {
        let local = self.local_address();
        let seeds: Vec<SocketAddr> = seeds.iter().copied().filter(|s| *s != local).collect();
        if seeds.is_empty() {
            tracing::info!("no seed nodes, starting a new cluster");
            return Ok(0);
        }

        let announce = PiggyBack::alive(local, self.members.local_incarnation());
        self.store.push(announce.clone());

        let deadline = Instant::now() + self.config.period;
        let mut failures = Vec::new();
        let mut waiters = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let waiter = self.endpoint.register(self.endpoint.next_id());
            let ping = self
                .endpoint
                .message(waiter.id(), Payload::Ping, Some(announce.clone()));
            match self.endpoint.send(seed, &ping).await {
                Ok(()) => waiters.push((seed, waiter)),
                Err(e) => failures.push((seed, e.to_string())),
            }
        }

        let mut joined = 0;
        for (seed, mut waiter) in waiters {
            match waiter.wait_until(deadline).await {
                Some(_) => joined += 1,
                None => failures.push((seed, "no ack before timeout".to_owned())),
            }
        }

        if joined == 0 {
            return Err(SwimError::JoinFailed(failures));
        }
        for (seed, reason) in &failures {
            tracing::warn!(%seed, reason, "seed did not answer join");
        }
        tracing::info!(joined, members = self.members.len(), "joined cluster");
        Ok(joined)
    }

    /// Queues `payload` for epidemic delivery to every other member.
    pub fn gossip(&self, payload: Vec<u8>) -> Result<()> {
        let seq = self.broadcast_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let record = PiggyBack::broadcast(self.local_address(), seq, payload);
        let size = record.encoded_size();
        if size > MAX_PIGGYBACK_BYTES {
            return Err(SwimError::PayloadTooLarge {
                size,
                limit: MAX_PIGGYBACK_BYTES,
            });
        }
        self.store.push(record);
        Ok(())
    }

    /// Stops the receive loop and the failure detector. Probes already in flight run
    /// out on their own timers.
    pub async fn shutdown(&self) {
        self.quit.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "swim task failed");
            }
        }
        tracing::info!(addr = %self.local_address(), "swim stopped");
    }

    /// Snapshot of the known members, not including the local node.
    pub fn members(&self) -> Vec<Member> {
        self.members.get_members()
    }

    pub fn local_address(&self) -> SocketAddr {
        self.endpoint.local_address()
    }

    pub fn incarnation(&self) -> u64 {
        self.members.local_incarnation()
    }
}

#[async_trait]
impl MessageHandler for Swim {
    async fn handle(&self, message: Message) {
        self.dispatcher.handle(message).await;
    }
}
