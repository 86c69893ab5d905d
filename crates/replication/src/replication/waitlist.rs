use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::registry::{EntityId, PeerId};

pub const DEFAULT_WAITLIST_TTL: Duration = Duration::from_secs(60);

/// Records that arrived for an entity whose Spawn has not been seen yet.
/// Only the latest of each kind is kept; older payloads are superseded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParkedRecords {
    pub state: Option<Vec<u8>>,
    pub fields: Option<Vec<u8>>,
    pub owner: Option<PeerId>,
}

#[derive(Debug)]
struct Entry {
    records: ParkedRecords,
    parked_at: Instant,
}

/// Holds records for unknown entity ids until their Spawn arrives or the
/// entry goes stale.
#[derive(Debug)]
pub struct EntityWaitlist {
    entries: HashMap<EntityId, Entry>,
    ttl: Duration,
}

impl Default for EntityWaitlist {
    fn default() -> Self {
        Self::new(DEFAULT_WAITLIST_TTL)
    }
}

impl EntityWaitlist {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entry(&mut self, id: EntityId, now: Instant) -> &mut ParkedRecords {
        let entry = self.entries.entry(id).or_insert_with(|| Entry {
            records: ParkedRecords::default(),
            parked_at: now,
        });
        entry.parked_at = now;
        &mut entry.records
    }

    pub fn park_state(&mut self, id: EntityId, payload: &[u8], now: Instant) {
        self.entry(id, now).state = Some(payload.to_vec());
    }

    pub fn park_fields(&mut self, id: EntityId, payload: &[u8], now: Instant) {
        self.entry(id, now).fields = Some(payload.to_vec());
    }

    pub fn park_owner(&mut self, id: EntityId, owner: PeerId, now: Instant) {
        self.entry(id, now).owner = Some(owner);
    }

    pub fn take(&mut self, id: EntityId) -> Option<ParkedRecords> {
        self.entries.remove(&id).map(|entry| entry.records)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Drops entries untouched for longer than the TTL. Returns how many went.
    pub fn expire(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|id, entry| {
            let keep = now.saturating_duration_since(entry.parked_at) < ttl;
            if !keep {
                log::debug!("Dropping parked records for entity {} that never spawned", id);
            }
            keep
        });
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
