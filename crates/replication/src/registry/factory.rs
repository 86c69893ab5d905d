use std::collections::HashMap;
use std::fmt;

use super::entity::{EntityKind, Replicated};

type Constructor = Box<dyn Fn() -> Box<dyn Replicated>>;

/// Maps a kind tag to the constructor the host application registered for it.
#[derive(Default)]
pub struct EntityFactory {
    constructors: HashMap<EntityKind, Constructor>,
}

impl fmt::Debug for EntityFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.constructors.keys().collect();
        kinds.sort();
        f.debug_struct("EntityFactory").field("kinds", &kinds).finish()
    }
}

impl EntityFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: EntityKind, constructor: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Replicated> + 'static,
    {
        self.constructors.insert(kind, Box::new(constructor));
        self
    }

    pub fn register_default<T>(&mut self, kind: EntityKind) -> &mut Self
    where
        T: Replicated + Default,
    {
        self.register(kind, || Box::new(T::default()))
    }

    pub fn instantiate(&self, kind: EntityKind) -> Option<Box<dyn Replicated>> {
        self.constructors.get(&kind).map(|constructor| constructor())
    }

    pub fn contains(&self, kind: EntityKind) -> bool {
        self.constructors.contains_key(&kind)
    }
}
