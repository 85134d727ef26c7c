use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;

use parking_lot::Mutex;

// How many broadcast ids we remember. Anything older than this may be delivered twice
// if a straggling copy is still being gossiped.
const DEFAULT_CAPACITY: usize = 1024;

type BroadcastId = (SocketAddr, u64);

/// Remembers recently seen broadcasts so each is delivered once.
pub(crate) struct RecentEventQueue {
    capacity: usize,
    inner: Mutex<Seen>,
}

#[derive(Default)]
struct Seen {
    order: VecDeque<BroadcastId>,
    ids: HashSet<BroadcastId>,
}

impl RecentEventQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Seen::default()),
        }
    }

    /// Records the broadcast. Returns false if it was already seen.
    pub(crate) fn insert(&self, origin: SocketAddr, seq: u64) -> bool {
        let mut seen = self.inner.lock();
        if !seen.ids.insert((origin, seq)) {
            return false;
        }
        seen.order.push_back((origin, seq));
        if seen.order.len() > self.capacity {
            if let Some(oldest) = seen.order.pop_front() {
                seen.ids.remove(&oldest);
            }
        }
        true
    }
}

impl Default for RecentEventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
