#![allow(dead_code)]

use std::any::Any;

use tether::{
    EntityFactory, EntityId, EntityKind, InputControl, PayloadError, Registry, Replicated,
};

pub const GAUGE_KIND: EntityKind = 1;
pub const PILOTED_GAUGE_KIND: EntityKind = 2;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Default)]
pub struct Throttle {
    enabled: bool,
}

impl InputControl for Throttle {
    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Test entity: a counter for state, a name for fields.
#[derive(Debug, Default)]
pub struct Gauge {
    pub reading: u32,
    pub name: String,
    dirty: bool,
    name_dirty: bool,
    throttle: Option<Throttle>,
}

impl Gauge {
    pub fn piloted() -> Self {
        Self {
            throttle: Some(Throttle::default()),
            ..Self::default()
        }
    }

    pub fn set_reading(&mut self, reading: u32) {
        self.reading = reading;
        self.dirty = true;
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
        self.name_dirty = true;
    }

    pub fn throttle_enabled(&self) -> Option<bool> {
        self.throttle.as_ref().map(|throttle| throttle.enabled)
    }
}

impl Replicated for Gauge {
    fn has_pending_changes(&self) -> bool {
        self.dirty
    }

    fn write_state(&mut self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.reading.to_le_bytes());
        self.dirty = false;
    }

    fn read_state(&mut self, payload: &[u8]) -> Result<(), PayloadError> {
        let bytes: [u8; 4] = payload
            .try_into()
            .map_err(|_| PayloadError::new("gauge state is four bytes"))?;
        self.reading = u32::from_le_bytes(bytes);
        Ok(())
    }

    fn has_pending_field_changes(&self) -> bool {
        self.name_dirty
    }

    fn write_fields(&mut self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.name.as_bytes());
        self.name_dirty = false;
    }

    fn read_fields(&mut self, payload: &[u8]) -> Result<(), PayloadError> {
        self.name = String::from_utf8(payload.to_vec()).map_err(PayloadError::new)?;
        Ok(())
    }

    fn input(&mut self) -> Option<&mut dyn InputControl> {
        self.throttle
            .as_mut()
            .map(|throttle| throttle as &mut dyn InputControl)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub fn gauge_registry() -> Registry {
    let mut factory = EntityFactory::new();
    factory
        .register_default::<Gauge>(GAUGE_KIND)
        .register(PILOTED_GAUGE_KIND, || Box::new(Gauge::piloted()));
    Registry::new(factory)
}

pub fn gauge(registry: &Registry, id: EntityId) -> &Gauge {
    registry
        .get(id)
        .and_then(|record| record.downcast_ref::<Gauge>())
        .unwrap_or_else(|| panic!("entity {} is not a gauge", id))
}

pub fn gauge_mut(registry: &mut Registry, id: EntityId) -> &mut Gauge {
    registry
        .get_mut(id)
        .and_then(|record| record.downcast_mut::<Gauge>())
        .unwrap_or_else(|| panic!("entity {} is not a gauge", id))
}

/// `(id, owner, reading, name)` for every entity, in id order.
pub fn snapshot(registry: &Registry) -> Vec<(EntityId, u32, u32, String)> {
    registry
        .iter()
        .map(|record| {
            let gauge = record.downcast_ref::<Gauge>().expect("gauge entity");
            (
                record.id(),
                record.owner(),
                gauge.reading,
                gauge.name.clone(),
            )
        })
        .collect()
}
