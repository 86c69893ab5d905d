mod entity;
mod factory;
mod world;

pub use entity::{
    ARBITER_PEER, EntityId, EntityKind, EntityRecord, InputControl, PayloadError, PeerId,
    Replicated,
};
pub use factory::EntityFactory;
pub use world::{Registry, RegistryError, RegistryEvent};
