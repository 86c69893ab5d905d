//! Minimal entity used by the unit tests.

use std::any::Any;

use crate::registry::{EntityFactory, EntityKind, InputControl, PayloadError, Replicated};

pub const COUNTER_KIND: EntityKind = 1;
pub const CONTROLLED_KIND: EntityKind = 2;

#[derive(Debug, Default)]
pub struct Switch {
    pub enabled: bool,
}

impl InputControl for Switch {
    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// State is a single `u32`, fields are a UTF-8 label.
#[derive(Debug, Default)]
pub struct Counter {
    pub value: u32,
    pub dirty: bool,
    pub label: String,
    pub label_dirty: bool,
    pub input: Option<Switch>,
}

impl Counter {
    pub fn with_value(value: u32) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    pub fn controlled() -> Self {
        Self {
            input: Some(Switch::default()),
            ..Self::default()
        }
    }

    pub fn bump(&mut self) {
        self.value += 1;
        self.dirty = true;
    }

    pub fn rename(&mut self, label: &str) {
        self.label = label.to_string();
        self.label_dirty = true;
    }

    pub fn input_enabled(&self) -> Option<bool> {
        self.input.as_ref().map(|switch| switch.enabled)
    }
}

impl Replicated for Counter {
    fn has_pending_changes(&self) -> bool {
        self.dirty
    }

    fn write_state(&mut self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.value.to_le_bytes());
        self.dirty = false;
    }

    fn read_state(&mut self, payload: &[u8]) -> Result<(), PayloadError> {
        let bytes: [u8; 4] = payload
            .try_into()
            .map_err(|_| PayloadError::new(format!("expected 4 bytes, got {}", payload.len())))?;
        self.value = u32::from_le_bytes(bytes);
        Ok(())
    }

    fn has_pending_field_changes(&self) -> bool {
        self.label_dirty
    }

    fn write_fields(&mut self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.label.as_bytes());
        self.label_dirty = false;
    }

    fn read_fields(&mut self, payload: &[u8]) -> Result<(), PayloadError> {
        self.label = String::from_utf8(payload.to_vec()).map_err(PayloadError::new)?;
        Ok(())
    }

    fn input(&mut self) -> Option<&mut dyn InputControl> {
        self.input
            .as_mut()
            .map(|switch| switch as &mut dyn InputControl)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub fn counter_factory() -> EntityFactory {
    let mut factory = EntityFactory::new();
    factory
        .register_default::<Counter>(COUNTER_KIND)
        .register(CONTROLLED_KIND, || Box::new(Counter::controlled()));
    factory
}

pub fn counter_value(registry: &crate::registry::Registry, id: u32) -> Option<u32> {
    registry
        .get(id)?
        .downcast_ref::<Counter>()
        .map(|counter| counter.value)
}
