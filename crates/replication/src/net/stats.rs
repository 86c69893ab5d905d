use serde::{Deserialize, Serialize};

/// Adverse-network emulation knobs. Everything is off by default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyConfig {
    pub simulate_latency: bool,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
    pub simulate_packet_loss: bool,
    /// Percent, 0-100.
    pub packet_loss_chance: f32,
    pub seed: Option<u64>,
}

impl LatencyConfig {
    pub fn is_enabled(&self) -> bool {
        self.simulate_latency || self.simulate_packet_loss
    }

    /// Bounds with `min <= max` regardless of how they were configured.
    pub fn latency_bounds_ms(&self) -> (u32, u32) {
        if self.min_latency_ms <= self.max_latency_ms {
            (self.min_latency_ms, self.max_latency_ms)
        } else {
            (self.max_latency_ms, self.min_latency_ms)
        }
    }

    pub fn loss_probability(&self) -> f64 {
        if !self.simulate_packet_loss {
            return 0.0;
        }
        (f64::from(self.packet_loss_chance) / 100.0).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_delayed: u64,
    pub packets_dropped: u64,
    pub early_packets_queued: u64,
    pub early_packets_replayed: u64,
    pub early_packets_dropped: u64,
    pub malformed_packets: u64,
}

impl NetworkStats {
    pub fn record_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
    }
}
