use std::collections::BTreeSet;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::net::{
    DecodeError, FIELDS_MARKER, OwnershipRecord, Packet, PacketType, PacketWriter,
    PayloadRecord, SpawnRecord,
};
use crate::registry::{
    ARBITER_PEER, EntityId, EntityKind, PayloadError, PeerId, Registry, RegistryError,
    RegistryEvent, Replicated,
};

use super::waitlist::{EntityWaitlist, ParkedRecords};

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("malformed packet: {0}")]
    Decode(#[from] DecodeError),
    #[error("{0:?} packet is not accepted by this peer")]
    UnexpectedPacket(PacketType),
    #[error("only the arbiter can admit peers")]
    NotArbiter,
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationStats {
    pub records_applied: u64,
    pub records_suppressed: u64,
    pub records_parked: u64,
    pub parked_replayed: u64,
    pub waitlist_expired: u64,
    pub entities_spawned: u64,
    pub duplicate_spawns: u64,
    pub ownership_applied: u64,
    pub payloads_rejected: u64,
    /// State/Fields records a peer sent for an entity it does not own.
    pub unauthorized_writes: u64,
}

/// The two payload streams share every rule except which entity methods
/// they call and which force flag they consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadStream {
    State,
    Fields,
}

impl PayloadStream {
    fn packet_type(self) -> PacketType {
        match self {
            Self::State => PacketType::State,
            Self::Fields => PacketType::Fields,
        }
    }

    fn has_changes(self, entity: &dyn Replicated) -> bool {
        match self {
            Self::State => entity.has_pending_changes(),
            Self::Fields => entity.has_pending_field_changes(),
        }
    }

    fn write(self, entity: &mut dyn Replicated, out: &mut Vec<u8>) {
        match self {
            Self::State => entity.write_state(out),
            Self::Fields => entity.write_fields(out),
        }
    }

    fn read(self, entity: &mut dyn Replicated, payload: &[u8]) -> Result<(), PayloadError> {
        match self {
            Self::State => entity.read_state(payload),
            Self::Fields => entity.read_fields(payload),
        }
    }
}

/// Encodes and applies replication packets for one peer, enforcing that only
/// an entity's owner (or the arbiter) writes it.
#[derive(Debug)]
pub struct ReplicationManager {
    local_peer: PeerId,
    is_arbiter: bool,
    is_listen_peer: bool,
    events: Receiver<RegistryEvent>,
    pending_spawns: BTreeSet<EntityId>,
    relayed_state: BTreeSet<EntityId>,
    relayed_fields: BTreeSet<EntityId>,
    force_full_state_once: bool,
    force_full_fields_once: bool,
    ownership_buffer: Option<PacketWriter>,
    waitlist: EntityWaitlist,
    scratch: Vec<u8>,
    stats: ReplicationStats,
}

impl ReplicationManager {
    /// Dedicated arbiter, identity 0.
    pub fn arbiter(registry: &mut Registry) -> Self {
        Self::new(registry, ARBITER_PEER, true, false)
    }

    pub fn client(registry: &mut Registry, local_peer: PeerId) -> Self {
        Self::new(registry, local_peer, false, false)
    }

    /// Participant living in the arbiter's process and sharing its registry.
    pub fn listen_peer(registry: &mut Registry, local_peer: PeerId) -> Self {
        Self::new(registry, local_peer, true, true)
    }

    fn new(
        registry: &mut Registry,
        local_peer: PeerId,
        is_arbiter: bool,
        is_listen_peer: bool,
    ) -> Self {
        let manager = Self {
            local_peer,
            is_arbiter,
            is_listen_peer,
            events: registry.subscribe(),
            pending_spawns: BTreeSet::new(),
            relayed_state: BTreeSet::new(),
            relayed_fields: BTreeSet::new(),
            force_full_state_once: false,
            force_full_fields_once: false,
            ownership_buffer: None,
            waitlist: EntityWaitlist::default(),
            scratch: Vec::new(),
            stats: ReplicationStats::default(),
        };

        // Ownership assigned before we subscribed still has to drive input.
        if manager.toggles_input() {
            for record in registry.iter_mut() {
                record.sync_input(local_peer);
            }
        }
        manager
    }

    pub fn with_waitlist_ttl(mut self, ttl: Duration) -> Self {
        self.waitlist = EntityWaitlist::new(ttl);
        self
    }

    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    pub fn is_arbiter(&self) -> bool {
        self.is_arbiter
    }

    pub fn is_listen_peer(&self) -> bool {
        self.is_listen_peer
    }

    pub fn stats(&self) -> &ReplicationStats {
        &self.stats
    }

    pub fn waitlist(&self) -> &EntityWaitlist {
        &self.waitlist
    }

    pub fn pending_spawns(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.pending_spawns.iter().copied()
    }

    pub fn has_pending_ownership(&self) -> bool {
        self.ownership_buffer.is_some()
    }

    /// Makes the next state and fields writes include every entity this peer
    /// is authoritative over.
    pub fn request_full_resync(&mut self) {
        self.force_full_state_once = true;
        self.force_full_fields_once = true;
    }

    // A dedicated arbiter has no local participant whose input could matter.
    fn toggles_input(&self) -> bool {
        !self.is_arbiter || self.is_listen_peer
    }

    fn is_authoritative(&self, owner: PeerId) -> bool {
        self.is_arbiter || owner == self.local_peer
    }

    /// Applies registry notifications queued since the last call.
    pub fn process_registry_events(&mut self, registry: &mut Registry) {
        let events: Vec<RegistryEvent> = self.events.try_iter().collect();
        for event in events {
            match event {
                RegistryEvent::Added(id) => self.on_entity_added(id),
                RegistryEvent::OwnershipChanged(id) => self.on_ownership_changed(registry, id),
            }
        }
    }

    fn on_entity_added(&mut self, id: EntityId) {
        if self.is_arbiter {
            self.pending_spawns.insert(id);
        }
    }

    fn on_ownership_changed(&mut self, registry: &mut Registry, id: EntityId) {
        let Some(record) = registry.get_mut(id) else {
            return;
        };
        let owner = record.owner();
        if self.toggles_input() {
            record.sync_input(self.local_peer);
        }
        self.push_ownership_record(owner, id);
    }

    fn push_ownership_record(&mut self, owner: PeerId, id: EntityId) {
        let writer = self
            .ownership_buffer
            .get_or_insert_with(|| PacketWriter::with_packet_type(PacketType::SetOwnership));
        writer.write_u32(owner);
        writer.write_u32(id);
    }

    /// Writes a State packet into `out` and returns how many records it holds.
    pub fn write_state(&mut self, registry: &mut Registry, out: &mut PacketWriter) -> usize {
        self.write_payloads(registry, out, PayloadStream::State)
    }

    pub fn write_fields(&mut self, registry: &mut Registry, out: &mut PacketWriter) -> usize {
        self.write_payloads(registry, out, PayloadStream::Fields)
    }

    fn write_payloads(
        &mut self,
        registry: &mut Registry,
        out: &mut PacketWriter,
        stream: PayloadStream,
    ) -> usize {
        self.process_registry_events(registry);

        let (force, relayed) = match stream {
            PayloadStream::State => (
                std::mem::take(&mut self.force_full_state_once),
                std::mem::take(&mut self.relayed_state),
            ),
            PayloadStream::Fields => (
                std::mem::take(&mut self.force_full_fields_once),
                std::mem::take(&mut self.relayed_fields),
            ),
        };

        out.write_u8(stream.packet_type() as u8);
        if stream == PayloadStream::Fields {
            out.write_u8(FIELDS_MARKER);
        }

        let mut written = 0;
        for record in registry.iter_mut() {
            let id = record.id();
            if !self.is_authoritative(record.owner()) {
                continue;
            }
            let entity = record.entity_mut();
            if !(force || relayed.contains(&id) || stream.has_changes(entity)) {
                continue;
            }

            self.scratch.clear();
            stream.write(entity, &mut self.scratch);
            out.write_u32(id);
            out.write_bytes(&self.scratch);
            written += 1;
        }
        written
    }

    /// Announces queued entities. Non-arbiters write nothing, but the queue
    /// is cleared on every call regardless of role.
    pub fn write_spawns(&mut self, registry: &mut Registry, out: &mut PacketWriter) -> usize {
        self.process_registry_events(registry);
        let pending = std::mem::take(&mut self.pending_spawns);
        if !self.is_arbiter {
            return 0;
        }

        out.write_u8(PacketType::Spawn as u8);
        let mut written = 0;
        for id in pending {
            if let Some(record) = registry.get(id) {
                out.write_u32(id);
                out.write_u32(record.kind());
                written += 1;
            }
        }
        written
    }

    /// Hands out the batched SetOwnership packet, if any change was recorded
    /// since the last call.
    pub fn take_ownership_packet(&mut self, registry: &mut Registry) -> Option<Vec<u8>> {
        self.process_registry_events(registry);
        self.ownership_buffer.take().map(|mut writer| writer.take())
    }

    pub fn read(
        &mut self,
        registry: &mut Registry,
        data: &[u8],
    ) -> Result<usize, ReplicationError> {
        self.read_at(registry, data, Instant::now())
    }

    /// Decodes `data` completely, then applies it. Returns the number of
    /// records that changed local state.
    pub fn read_at(
        &mut self,
        registry: &mut Registry,
        data: &[u8],
        now: Instant,
    ) -> Result<usize, ReplicationError> {
        self.read_packet(registry, data, None, now)
    }

    /// Like [`read_at`](Self::read_at) for a packet that came from `sender`.
    /// On the arbiter, State and Fields records are only applied (and
    /// relayed) for entities `sender` owns at the time of arrival.
    pub fn read_from(
        &mut self,
        registry: &mut Registry,
        data: &[u8],
        sender: PeerId,
        now: Instant,
    ) -> Result<usize, ReplicationError> {
        self.read_packet(registry, data, Some(sender), now)
    }

    fn read_packet(
        &mut self,
        registry: &mut Registry,
        data: &[u8],
        sender: Option<PeerId>,
        now: Instant,
    ) -> Result<usize, ReplicationError> {
        self.process_registry_events(registry);

        let packet = Packet::decode(data)?;
        log::trace!(
            "Applying {:?} packet with {} records",
            packet.packet_type(),
            packet.record_count()
        );
        let applied = match packet {
            Packet::Join(_) => return Err(ReplicationError::UnexpectedPacket(PacketType::Join)),
            Packet::State(records) => {
                self.apply_payloads(registry, PayloadStream::State, &records, sender, now)
            }
            Packet::Fields(records) => {
                self.apply_payloads(registry, PayloadStream::Fields, &records, sender, now)
            }
            Packet::Spawn(records) => self.apply_spawns(registry, &records)?,
            Packet::SetOwnership(records) => self.apply_ownership(registry, &records, now)?,
        };

        self.process_registry_events(registry);
        Ok(applied)
    }

    fn apply_payloads(
        &mut self,
        registry: &mut Registry,
        stream: PayloadStream,
        records: &[PayloadRecord<'_>],
        sender: Option<PeerId>,
        now: Instant,
    ) -> usize {
        if self.is_listen_peer {
            return 0;
        }

        let mut applied = 0;
        for record in records {
            if !registry.contains(record.id) {
                log::debug!(
                    "Parking {:?} record for unknown entity {}",
                    stream,
                    record.id
                );
                match stream {
                    PayloadStream::State => {
                        self.waitlist.park_state(record.id, record.payload, now)
                    }
                    PayloadStream::Fields => {
                        self.waitlist.park_fields(record.id, record.payload, now)
                    }
                }
                self.stats.records_parked += 1;
                continue;
            }

            if self.apply_payload(registry, stream, record.id, record.payload, sender) {
                applied += 1;
            }
        }
        applied
    }

    fn apply_payload(
        &mut self,
        registry: &mut Registry,
        stream: PayloadStream,
        id: EntityId,
        payload: &[u8],
        sender: Option<PeerId>,
    ) -> bool {
        let Some(record) = registry.get_mut(id) else {
            return false;
        };

        if record.is_owned_by(self.local_peer) {
            log::trace!("Suppressing echo of {:?} for owned entity {}", stream, id);
            self.stats.records_suppressed += 1;
            return false;
        }

        // Ownership wins over writes still in flight from a previous owner.
        if let Some(sender) = sender.filter(|_| self.is_arbiter) {
            if !record.is_owned_by(sender) {
                log::debug!(
                    "Dropping {:?} for entity {} from peer {}: owned by peer {}",
                    stream,
                    id,
                    sender,
                    record.owner()
                );
                self.stats.unauthorized_writes += 1;
                return false;
            }
        }

        if let Err(err) = stream.read(record.entity_mut(), payload) {
            log::warn!("Entity {} rejected {:?} payload: {}", id, stream, err);
            self.stats.payloads_rejected += 1;
            return false;
        }

        self.stats.records_applied += 1;
        if self.is_arbiter {
            match stream {
                PayloadStream::State => self.relayed_state.insert(id),
                PayloadStream::Fields => self.relayed_fields.insert(id),
            };
        }
        true
    }

    fn apply_spawns(
        &mut self,
        registry: &mut Registry,
        records: &[SpawnRecord],
    ) -> Result<usize, ReplicationError> {
        if self.is_listen_peer {
            return Ok(0);
        }
        if self.is_arbiter {
            return Err(ReplicationError::UnexpectedPacket(PacketType::Spawn));
        }

        let mut spawned = 0;
        for &SpawnRecord { id, kind } in records {
            if registry.contains(id) {
                self.stats.duplicate_spawns += 1;
                continue;
            }
            if let Err(err) = registry.insert_with_id(id, kind) {
                log::warn!("Cannot spawn entity {} of kind {}: {}", id, kind, err);
                continue;
            }
            log::debug!("Spawned entity {} (kind {})", id, kind);
            spawned += 1;
            self.stats.entities_spawned += 1;

            if let Some(parked) = self.waitlist.take(id) {
                self.replay_parked(registry, id, parked);
            }
            if let Some(record) = registry.get_mut(id) {
                record.sync_input(self.local_peer);
            }
        }
        Ok(spawned)
    }

    fn replay_parked(&mut self, registry: &mut Registry, id: EntityId, parked: ParkedRecords) {
        log::debug!("Replaying parked records for entity {}", id);
        self.stats.parked_replayed += 1;

        if let Some(owner) = parked.owner {
            if registry.assign_owner(id, owner).is_ok() {
                self.stats.ownership_applied += 1;
            }
        }
        if let Some(state) = parked.state {
            self.apply_payload(registry, PayloadStream::State, id, &state, None);
        }
        if let Some(fields) = parked.fields {
            self.apply_payload(registry, PayloadStream::Fields, id, &fields, None);
        }
    }

    fn apply_ownership(
        &mut self,
        registry: &mut Registry,
        records: &[OwnershipRecord],
        now: Instant,
    ) -> Result<usize, ReplicationError> {
        let mut applied = 0;
        for &OwnershipRecord { owner, id } in records {
            if !registry.contains(id) {
                log::debug!("Parking owner {} for unknown entity {}", owner, id);
                self.waitlist.park_owner(id, owner, now);
                self.stats.records_parked += 1;
                continue;
            }

            // The arbiter goes through the notifying path so the change is
            // rebroadcast; everyone else applies silently.
            let changed = if self.is_arbiter {
                registry.set_owner(id, owner)?
            } else {
                registry.assign_owner(id, owner)?
            };
            if changed {
                log::debug!("Entity {} now owned by peer {}", id, owner);
            }

            if self.toggles_input() {
                if let Some(record) = registry.get_mut(id) {
                    record.sync_input(self.local_peer);
                }
            }
            self.stats.ownership_applied += 1;
            applied += 1;
        }
        Ok(applied)
    }

    /// Arbiter side of a peer joining: every existing entity is re-announced
    /// with its owner, a player entity of `player_kind` is granted to the
    /// newcomer, and the next writes become full snapshots.
    pub fn on_peer_connected(
        &mut self,
        registry: &mut Registry,
        peer: PeerId,
        player_kind: Option<EntityKind>,
    ) -> Result<Option<EntityId>, ReplicationError> {
        if !self.is_arbiter {
            return Err(ReplicationError::NotArbiter);
        }
        self.process_registry_events(registry);

        for record in registry.iter() {
            self.pending_spawns.insert(record.id());
            self.push_ownership_record(record.owner(), record.id());
        }

        let player = match player_kind {
            Some(kind) => Some(registry.spawn_owned(kind, peer)?),
            None => None,
        };

        self.request_full_resync();
        self.process_registry_events(registry);
        Ok(player)
    }

    /// Returns everything `peer` owned to the arbiter.
    pub fn reclaim_ownership(&mut self, registry: &mut Registry, peer: PeerId) -> Vec<EntityId> {
        let reclaimed = registry.reclaim(peer);
        self.process_registry_events(registry);
        reclaimed
    }

    pub fn expire_waitlist(&mut self, now: Instant) -> usize {
        let expired = self.waitlist.expire(now);
        self.stats.waitlist_expired += expired as u64;
        expired
    }
}
