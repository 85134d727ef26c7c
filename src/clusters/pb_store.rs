use parking_lot::Mutex;

use crate::clusters::PiggyBack;
use crate::error::{Result, SwimError};

// Upper bound on pending records. When full, the lowest priority record makes room.
const MAX_RECORDS: usize = 256;

/// Bounded-replay store of piggyback records.
///
/// Each record may ride on at most `max_local_count` outgoing messages. Records are
/// bucketed by replays already used; within a bucket the most recently pushed goes
/// first, and severity (Confirm > Suspect > Alive > Broadcast) only settles equal
/// stamps.
pub struct PriorityPBStore {
    max_local_count: u32,
    inner: Mutex<Entries>,
}

#[derive(Default)]
struct Entries {
    // Always sorted descending by priority.
    entries: Vec<PbEntry>,
    pushes: u64,
}

struct PbEntry {
    record: PiggyBack,
    remaining: u32,
    stamp: u64,
}

impl PbEntry {
    fn priority(&self) -> (u32, u64, u8) {
        (self.remaining, self.stamp, self.record.kind.severity())
    }
}

impl Entries {
    fn insert_sorted(&mut self, entry: PbEntry) {
        let priority = entry.priority();
        let pos = self
            .entries
            // reversed: entries are kept in descending priority
            .binary_search_by(|e| e.priority().cmp(&priority).reverse())
            .unwrap_or_else(|pos| pos);
        self.entries.insert(pos, entry);
    }
}

impl PriorityPBStore {
    pub fn new(max_local_count: u32) -> Self {
        Self {
            max_local_count,
            inner: Mutex::new(Entries::default()),
        }
    }

    /// Queues `record`, replacing a pending record about the same subject unless that
    /// one carries a higher incarnation or a more authoritative kind.
    /// Returns whether the record was queued.
    pub fn push(&self, record: PiggyBack) -> bool {
        let mut inner = self.inner.lock();
        let subject = record.subject();

        if let Some(pos) = inner
            .entries
            .iter()
            .position(|e| e.record.subject() == subject)
        {
            if inner.entries[pos].record.supersedes(&record) {
                return false;
            }
            inner.entries.remove(pos);
        }

        if inner.entries.len() >= MAX_RECORDS {
            inner.entries.pop();
        }

        inner.pushes += 1;
        let stamp = inner.pushes;
        inner.insert_sorted(PbEntry {
            record,
            remaining: self.max_local_count,
            stamp,
        });
        true
    }

    /// Takes the highest priority record for the next outgoing message.
    pub fn get(&self) -> Result<PiggyBack> {
        let mut inner = self.inner.lock();
        if inner.entries.is_empty() {
            return Err(SwimError::EmptyStore);
        }

        let mut entry = inner.entries.remove(0);
        entry.remaining = entry.remaining.saturating_sub(1);
        let record = entry.record.clone();
        if entry.remaining > 0 {
            inner.insert_sorted(entry);
        }
        Ok(record)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> Vec<PiggyBack> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|e| e.record.clone())
            .collect()
    }
}
