use std::net::SocketAddr;
use std::ops::Deref;

use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};

// Decides the order in which one round walks the members. New members land at a random
// position so the order stays unpredictable between reshuffles.
pub(super) struct ProbeOrder {
    nodes: Vec<SocketAddr>,
    rng: StdRng,
}

impl Deref for ProbeOrder {
    type Target = [SocketAddr];

    fn deref(&self) -> &Self::Target {
        &self.nodes
    }
}

impl ProbeOrder {
    pub(super) fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            nodes: Vec::new(),
            rng,
        }
    }

    pub(super) fn add(&mut self, addr: SocketAddr) {
        if self.nodes.contains(&addr) {
            return;
        }
        let selected = self.rng.gen_range(0..=self.nodes.len());
        self.nodes.insert(selected, addr);
    }

    pub(super) fn remove(&mut self, addr: &SocketAddr) {
        if let Some(index) = self.nodes.iter().position(|x| x == addr) {
            self.nodes.remove(index);
        }
    }

    pub(super) fn shuffle(&mut self) {
        self.nodes.shuffle(&mut self.rng);
    }

    /// Up to `k` distinct candidates, uniformly at random.
    pub(super) fn choose(&mut self, candidates: &[SocketAddr], k: usize) -> Vec<SocketAddr> {
        candidates
            .choose_multiple(&mut self.rng, k)
            .copied()
            .collect()
    }
}
