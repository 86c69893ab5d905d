use std::time::Duration;

use tether::{DEFAULT_PORT, DEFAULT_TICK_RATE, LatencyConfig, SessionConfig};

use crate::avatar::AVATAR_KIND;

/// Extra ticks run without movement at the end so in-flight packets land.
const SETTLE_MARGIN_TICKS: u32 = 10;

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub port: u16,
    pub clients: usize,
    pub ticks: u32,
    pub tick_rate: u32,
    pub beacons: usize,
    pub listen_peer: bool,
    pub latency: LatencyConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            clients: 2,
            ticks: 300,
            tick_rate: DEFAULT_TICK_RATE,
            beacons: 2,
            listen_peer: false,
            latency: LatencyConfig::default(),
        }
    }
}

impl SandboxConfig {
    pub fn host_session(&self) -> SessionConfig {
        SessionConfig {
            tick_rate: self.tick_rate,
            player_kind: Some(AVATAR_KIND),
            latency: self.latency.clone(),
            ..SessionConfig::default()
        }
    }

    pub fn client_session(&self) -> SessionConfig {
        SessionConfig {
            tick_rate: self.tick_rate,
            latency: self.latency.clone(),
            ..SessionConfig::default()
        }
    }

    pub fn tick_duration(&self) -> Duration {
        self.host_session().tick_duration()
    }

    /// Enough idle ticks for a relayed update to land. A relay crosses two
    /// links and each link delays on both ends.
    pub fn settle_ticks(&self) -> u32 {
        let tick_ms = self.tick_duration().as_millis().max(1) as u32;
        let (_, max_ms) = if self.latency.simulate_latency {
            self.latency.latency_bounds_ms()
        } else {
            (0, 0)
        };
        (4 * max_ms).div_ceil(tick_ms) + SETTLE_MARGIN_TICKS
    }
}
