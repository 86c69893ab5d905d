use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::stats::LatencyConfig;
use super::transport::{Channel, ConnectionHandle, Target};

/// A received packet and the link it came in on. Local loopback copies have
/// no link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPacket {
    pub data: Vec<u8>,
    pub from: Option<ConnectionHandle>,
}

impl InboundPacket {
    pub fn new(data: Vec<u8>, from: Option<ConnectionHandle>) -> Self {
        Self { data, from }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPacket {
    pub data: Vec<u8>,
    pub channel: Channel,
    pub target: Target,
}

#[derive(Debug)]
struct DelayedPacket<T> {
    release_time: Instant,
    sequence: u64,
    packet: T,
}

impl<T> PartialEq for DelayedPacket<T> {
    fn eq(&self, other: &Self) -> bool {
        self.release_time == other.release_time && self.sequence == other.sequence
    }
}

impl<T> Eq for DelayedPacket<T> {}

impl<T> PartialOrd for DelayedPacket<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for DelayedPacket<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap; equal release times leave in insertion order
        other
            .release_time
            .cmp(&self.release_time)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Holds opaque packets back for a random interval in both directions.
/// Knows nothing about what the bytes mean.
#[derive(Debug)]
pub struct LatencySimulator {
    config: LatencyConfig,
    rng: StdRng,
    inbound_queue: BinaryHeap<DelayedPacket<InboundPacket>>,
    outbound_queue: BinaryHeap<DelayedPacket<OutboundPacket>>,
    next_sequence: u64,
    delayed: u64,
    dropped: u64,
}

impl LatencySimulator {
    pub fn new(config: LatencyConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            config,
            rng,
            inbound_queue: BinaryHeap::new(),
            outbound_queue: BinaryHeap::new(),
            next_sequence: 0,
            delayed: 0,
            dropped: 0,
        }
    }

    pub fn config(&self) -> &LatencyConfig {
        &self.config
    }

    pub fn sample_delay(&mut self) -> Duration {
        if !self.config.simulate_latency {
            return Duration::ZERO;
        }
        let (min, max) = self.config.latency_bounds_ms();
        Duration::from_millis(u64::from(self.rng.gen_range(min..=max)))
    }

    fn should_drop(&mut self) -> bool {
        let chance = self.config.loss_probability();
        chance > 0.0 && self.rng.gen_bool(chance)
    }

    fn next_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// Schedules an inbound packet. Returns `false` when the loss roll
    /// swallowed it.
    pub fn delay(&mut self, packet: InboundPacket, now: Instant) -> bool {
        if self.should_drop() {
            self.dropped += 1;
            log::trace!("Dropped inbound packet ({} bytes)", packet.data.len());
            return false;
        }

        let delay = self.sample_delay();
        let sequence = self.next_sequence();
        log::trace!("Delaying inbound packet by {:?}", delay);
        self.inbound_queue.push(DelayedPacket {
            release_time: now + delay,
            sequence,
            packet,
        });
        self.delayed += 1;
        true
    }

    /// Yields inbound packets whose delay has elapsed, removing them as the
    /// iterator is consumed.
    pub fn drain_ready(&mut self, now: Instant) -> impl Iterator<Item = InboundPacket> + '_ {
        std::iter::from_fn(move || pop_ready(&mut self.inbound_queue, now))
    }

    /// Schedules an outbound packet. With `also_deliver_locally` a copy also
    /// goes through the inbound delay path so the local peer sees its own
    /// broadcast.
    pub fn send_delayed(&mut self, packet: OutboundPacket, also_deliver_locally: bool, now: Instant) {
        if also_deliver_locally {
            self.delay(InboundPacket::new(packet.data.clone(), None), now);
        }

        if self.should_drop() {
            self.dropped += 1;
            log::trace!("Dropped outbound packet ({} bytes)", packet.data.len());
            return;
        }

        let delay = self.sample_delay();
        let sequence = self.next_sequence();
        self.outbound_queue.push(DelayedPacket {
            release_time: now + delay,
            sequence,
            packet,
        });
        self.delayed += 1;
    }

    pub fn drain_ready_outbound(
        &mut self,
        now: Instant,
    ) -> impl Iterator<Item = OutboundPacket> + '_ {
        std::iter::from_fn(move || pop_ready(&mut self.outbound_queue, now))
    }

    pub fn pending_inbound(&self) -> usize {
        self.inbound_queue.len()
    }

    pub fn pending_outbound(&self) -> usize {
        self.outbound_queue.len()
    }

    pub fn delayed_count(&self) -> u64 {
        self.delayed
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }
}

fn pop_ready<T>(queue: &mut BinaryHeap<DelayedPacket<T>>, now: Instant) -> Option<T> {
    if queue.peek()?.release_time <= now {
        queue.pop().map(|delayed| delayed.packet)
    } else {
        None
    }
}
