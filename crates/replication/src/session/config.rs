use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::{DEFAULT_TICK_RATE, LatencyConfig};
use crate::registry::EntityKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub tick_rate: u32,
    /// Kind spawned and handed to every peer that joins. `None` grants nothing.
    pub player_kind: Option<EntityKind>,
    pub latency: LatencyConfig,
    pub waitlist_ttl_ms: u64,
    /// Packets held while waiting for Join; further ones are dropped.
    pub max_early_packets: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            player_kind: None,
            latency: LatencyConfig::default(),
            waitlist_ttl_ms: 60_000,
            max_early_packets: 1024,
        }
    }
}

impl SessionConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate.max(1)))
    }

    pub fn waitlist_ttl(&self) -> Duration {
        Duration::from_millis(self.waitlist_ttl_ms)
    }
}
