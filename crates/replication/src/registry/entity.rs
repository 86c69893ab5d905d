use std::any::Any;
use std::fmt;

use thiserror::Error;

pub type EntityId = u32;
pub type EntityKind = u32;
pub type PeerId = u32;

/// Owner value meaning "the arbiter holds write authority".
pub const ARBITER_PEER: PeerId = 0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("entity payload rejected: {0}")]
pub struct PayloadError(pub String);

impl PayloadError {
    pub fn new(reason: impl fmt::Display) -> Self {
        Self(reason.to_string())
    }
}

/// Optional capability for entities driven by local input.
pub trait InputControl {
    fn set_enabled(&mut self, enabled: bool);

    fn is_enabled(&self) -> bool;
}

/// What the replication core needs from a replicated entity. Payloads are
/// opaque; the core only frames and routes them.
pub trait Replicated: Any {
    fn has_pending_changes(&self) -> bool;

    /// Appends the full state and clears the pending-changes flag.
    fn write_state(&mut self, out: &mut Vec<u8>);

    /// Replaces local state with a remote payload. Must not mark the entity
    /// as changed.
    fn read_state(&mut self, payload: &[u8]) -> Result<(), PayloadError>;

    fn has_pending_field_changes(&self) -> bool {
        false
    }

    fn write_fields(&mut self, _out: &mut Vec<u8>) {}

    fn read_fields(&mut self, _payload: &[u8]) -> Result<(), PayloadError> {
        Ok(())
    }

    fn input(&mut self) -> Option<&mut dyn InputControl> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub struct EntityRecord {
    id: EntityId,
    kind: EntityKind,
    owner: PeerId,
    entity: Box<dyn Replicated>,
}

impl fmt::Debug for EntityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRecord")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl EntityRecord {
    pub(crate) fn new(id: EntityId, kind: EntityKind, entity: Box<dyn Replicated>) -> Self {
        Self {
            id,
            kind,
            owner: ARBITER_PEER,
            entity,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn owner(&self) -> PeerId {
        self.owner
    }

    pub fn is_owned_by(&self, peer: PeerId) -> bool {
        self.owner == peer
    }

    pub(crate) fn set_owner(&mut self, owner: PeerId) {
        self.owner = owner;
    }

    pub fn entity(&self) -> &dyn Replicated {
        &*self.entity
    }

    pub fn entity_mut(&mut self) -> &mut dyn Replicated {
        &mut *self.entity
    }

    pub fn downcast_ref<T: Replicated>(&self) -> Option<&T> {
        self.entity.as_any().downcast_ref()
    }

    pub fn downcast_mut<T: Replicated>(&mut self) -> Option<&mut T> {
        self.entity.as_any_mut().downcast_mut()
    }

    /// Enables input iff `local_peer` owns the entity. Entities without the
    /// capability are left alone.
    pub fn sync_input(&mut self, local_peer: PeerId) -> Option<bool> {
        let enabled = self.owner == local_peer;
        let input = self.entity.input()?;
        input.set_enabled(enabled);
        Some(enabled)
    }
}
