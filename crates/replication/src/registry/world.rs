use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};

use thiserror::Error;

use super::entity::{ARBITER_PEER, EntityId, EntityKind, EntityRecord, PeerId, Replicated};
use super::factory::EntityFactory;

const FIRST_ENTITY_ID: EntityId = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryEvent {
    Added(EntityId),
    OwnershipChanged(EntityId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no constructor registered for entity kind {0}")]
    UnknownKind(EntityKind),
    #[error("entity {0} is not in the registry")]
    UnknownEntity(EntityId),
    #[error("entity {0} already exists")]
    DuplicateEntity(EntityId),
    #[error("entity id space exhausted")]
    IdSpaceExhausted,
}

/// Every replicated entity known locally, keyed by id. Iteration is in id
/// order so packets are written deterministically.
#[derive(Debug)]
pub struct Registry {
    entities: BTreeMap<EntityId, EntityRecord>,
    factory: EntityFactory,
    /// `None` once `EntityId::MAX` has been handed out.
    next_entity_id: Option<EntityId>,
    subscribers: Vec<Sender<RegistryEvent>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(EntityFactory::default())
    }
}

impl Registry {
    pub fn new(factory: EntityFactory) -> Self {
        Self {
            entities: BTreeMap::new(),
            factory,
            next_entity_id: Some(FIRST_ENTITY_ID),
            subscribers: Vec::new(),
        }
    }

    pub fn factory(&self) -> &EntityFactory {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut EntityFactory {
        &mut self.factory
    }

    /// Opens a channel that receives every add and ownership change from now on.
    pub fn subscribe(&mut self) -> Receiver<RegistryEvent> {
        let (sender, receiver) = mpsc::channel();
        self.subscribers.push(sender);
        receiver
    }

    fn notify(&mut self, event: RegistryEvent) {
        self.subscribers.retain(|sender| sender.send(event).is_ok());
    }

    /// Instantiates `kind` under a freshly allocated id, arbiter-owned.
    pub fn spawn(&mut self, kind: EntityKind) -> Result<EntityId, RegistryError> {
        let entity = self
            .factory
            .instantiate(kind)
            .ok_or(RegistryError::UnknownKind(kind))?;
        self.insert(kind, entity)
    }

    pub fn spawn_owned(
        &mut self,
        kind: EntityKind,
        owner: PeerId,
    ) -> Result<EntityId, RegistryError> {
        let id = self.spawn(kind)?;
        self.set_owner(id, owner)?;
        Ok(id)
    }

    /// Adds an entity the host application built itself.
    pub fn insert(
        &mut self,
        kind: EntityKind,
        entity: Box<dyn Replicated>,
    ) -> Result<EntityId, RegistryError> {
        let id = self.allocate_id()?;
        self.entities.insert(id, EntityRecord::new(id, kind, entity));
        self.notify(RegistryEvent::Added(id));
        Ok(id)
    }

    /// Adds an entity under an id chosen elsewhere (a received Spawn).
    pub fn insert_with_id(&mut self, id: EntityId, kind: EntityKind) -> Result<(), RegistryError> {
        if self.entities.contains_key(&id) {
            return Err(RegistryError::DuplicateEntity(id));
        }
        let entity = self
            .factory
            .instantiate(kind)
            .ok_or(RegistryError::UnknownKind(kind))?;

        self.entities.insert(id, EntityRecord::new(id, kind, entity));
        if self.next_entity_id.is_some_and(|next| id >= next) {
            self.next_entity_id = id.checked_add(1);
        }
        self.notify(RegistryEvent::Added(id));
        Ok(())
    }

    /// Changes the owner and notifies subscribers. Returns whether anything
    /// changed; setting the current owner again is silent.
    pub fn set_owner(&mut self, id: EntityId, owner: PeerId) -> Result<bool, RegistryError> {
        let changed = self.assign_owner(id, owner)?;
        if changed {
            self.notify(RegistryEvent::OwnershipChanged(id));
        }
        Ok(changed)
    }

    /// Changes the owner without notifying anyone. Used when applying
    /// ownership that arrived from the network.
    pub(crate) fn assign_owner(&mut self, id: EntityId, owner: PeerId) -> Result<bool, RegistryError> {
        let record = self
            .entities
            .get_mut(&id)
            .ok_or(RegistryError::UnknownEntity(id))?;
        if record.owner() == owner {
            return Ok(false);
        }
        record.set_owner(owner);
        Ok(true)
    }

    /// Hands every entity owned by `peer` back to the arbiter.
    pub fn reclaim(&mut self, peer: PeerId) -> Vec<EntityId> {
        let owned = self.owned_by(peer);
        for &id in &owned {
            if let Some(record) = self.entities.get_mut(&id) {
                record.set_owner(ARBITER_PEER);
            }
            self.notify(RegistryEvent::OwnershipChanged(id));
        }
        owned
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityRecord> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut EntityRecord> {
        self.entities.get_mut(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn owner_of(&self, id: EntityId) -> Option<PeerId> {
        self.entities.get(&id).map(EntityRecord::owner)
    }

    pub fn owned_by(&self, peer: PeerId) -> Vec<EntityId> {
        self.entities
            .values()
            .filter(|record| record.is_owned_by(peer))
            .map(EntityRecord::id)
            .collect()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityRecord> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut EntityRecord> {
        self.entities.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn allocate_id(&mut self) -> Result<EntityId, RegistryError> {
        let mut id = self.next_entity_id.ok_or(RegistryError::IdSpaceExhausted)?;
        while self.entities.contains_key(&id) {
            id = id.checked_add(1).ok_or(RegistryError::IdSpaceExhausted)?;
        }
        self.next_entity_id = id.checked_add(1);
        Ok(id)
    }
}
