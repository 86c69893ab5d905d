use std::any::Any;

use glam::Vec3;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

use tether::{EntityFactory, EntityKind, InputControl, PayloadError, Registry, Replicated};

pub const AVATAR_KIND: EntityKind = 1;

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
struct Motion {
    position: [f32; 3],
    velocity: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
struct Profile {
    name: String,
    score: u32,
}

/// Payload slices sit at arbitrary offsets inside a packet; rkyv wants them
/// aligned before validation.
fn aligned(payload: &[u8]) -> AlignedVec<16> {
    let mut buffer = AlignedVec::<16>::with_capacity(payload.len());
    buffer.extend_from_slice(payload);
    buffer
}

#[derive(Debug, Default)]
pub struct Pilot {
    enabled: bool,
}

impl InputControl for Pilot {
    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[derive(Debug, Default)]
pub struct Avatar {
    pub position: Vec3,
    pub velocity: Vec3,
    pub name: String,
    pub score: u32,
    motion_dirty: bool,
    profile_dirty: bool,
    pilot: Pilot,
}

impl Avatar {
    pub fn is_piloted(&self) -> bool {
        self.pilot.enabled
    }

    pub fn steer(&mut self, heading: f32, speed: f32, dt: f32) {
        let (sin, cos) = heading.sin_cos();
        self.velocity = Vec3::new(cos, 0.0, sin) * speed;
        self.position += self.velocity * dt;
        self.motion_dirty = true;
    }

    pub fn rename(&mut self, name: &str) {
        self.name = name.to_string();
        self.profile_dirty = true;
    }

    pub fn add_score(&mut self, points: u32) {
        self.score += points;
        self.profile_dirty = true;
    }

    /// Queues a full resend of both streams.
    pub fn touch(&mut self) {
        self.motion_dirty = true;
        self.profile_dirty = true;
    }

    pub fn matches(&self, other: &Avatar) -> bool {
        self.position == other.position
            && self.velocity == other.velocity
            && self.name == other.name
            && self.score == other.score
    }
}

impl Replicated for Avatar {
    fn has_pending_changes(&self) -> bool {
        self.motion_dirty
    }

    fn write_state(&mut self, out: &mut Vec<u8>) {
        let motion = Motion {
            position: self.position.to_array(),
            velocity: self.velocity.to_array(),
        };
        match rkyv::to_bytes::<rancor::Error>(&motion) {
            Ok(bytes) => out.extend_from_slice(&bytes),
            Err(err) => log::warn!("Failed to encode avatar motion: {}", err),
        }
        self.motion_dirty = false;
    }

    fn read_state(&mut self, payload: &[u8]) -> Result<(), PayloadError> {
        let motion = rkyv::from_bytes::<Motion, rancor::Error>(&aligned(payload))
            .map_err(PayloadError::new)?;
        self.position = Vec3::from_array(motion.position);
        self.velocity = Vec3::from_array(motion.velocity);
        Ok(())
    }

    fn has_pending_field_changes(&self) -> bool {
        self.profile_dirty
    }

    fn write_fields(&mut self, out: &mut Vec<u8>) {
        let profile = Profile {
            name: self.name.clone(),
            score: self.score,
        };
        match rkyv::to_bytes::<rancor::Error>(&profile) {
            Ok(bytes) => out.extend_from_slice(&bytes),
            Err(err) => log::warn!("Failed to encode avatar profile: {}", err),
        }
        self.profile_dirty = false;
    }

    fn read_fields(&mut self, payload: &[u8]) -> Result<(), PayloadError> {
        let profile = rkyv::from_bytes::<Profile, rancor::Error>(&aligned(payload))
            .map_err(PayloadError::new)?;
        self.name = profile.name;
        self.score = profile.score;
        Ok(())
    }

    fn input(&mut self) -> Option<&mut dyn InputControl> {
        Some(&mut self.pilot)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub fn avatar_registry() -> Registry {
    let mut factory = EntityFactory::new();
    factory.register_default::<Avatar>(AVATAR_KIND);
    Registry::new(factory)
}
