use std::time::{Duration, Instant};

use anyhow::Context;

use tether::{
    ARBITER_PEER, LocalNetwork, LocalTransport, NetworkStats, PeerId, Registry, Session,
    SessionConfig, SessionEvent,
};

use crate::avatar::{AVATAR_KIND, Avatar, avatar_registry};
use crate::config::SandboxConfig;
use crate::simulation::{drive_avatars, republish_avatars};

struct Node {
    label: String,
    session: Session<LocalTransport>,
    registry: Registry,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientReport {
    pub label: String,
    pub peer_id: Option<PeerId>,
    pub entities: usize,
    pub matching: usize,
    pub stats: NetworkStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub frames: u32,
    pub arbiter_entities: usize,
    pub clients: Vec<ClientReport>,
}

impl Report {
    pub fn converged(&self) -> bool {
        self.clients.iter().all(|client| {
            client.entities == self.arbiter_entities && client.matching == self.arbiter_entities
        })
    }
}

/// One arbiter plus a handful of clients wired over an in-process network,
/// stepped on a virtual clock so simulated latency needs no sleeping.
pub struct Sandbox {
    config: SandboxConfig,
    host: Node,
    listen_peer: Option<Session<LocalTransport>>,
    clients: Vec<Node>,
    epoch: Instant,
    tick_duration: Duration,
    frame: u32,
}

fn seeded(mut config: SessionConfig, offset: u64) -> SessionConfig {
    config.latency.seed = config.latency.seed.map(|seed| seed.wrapping_add(offset));
    config
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> anyhow::Result<Self> {
        let network = LocalNetwork::new();

        let mut registry = avatar_registry();
        for _ in 0..config.beacons {
            registry
                .spawn(AVATAR_KIND)
                .context("Failed to spawn beacon avatar")?;
        }
        let mut session = Session::new(network.endpoint(), seeded(config.host_session(), 0));
        session
            .listen(config.port, &mut registry)
            .context("Arbiter failed to listen")?;
        let host = Node {
            label: "arbiter".to_string(),
            session,
            registry,
        };

        let listen_peer = if config.listen_peer {
            let mut session = Session::new(network.endpoint(), seeded(config.client_session(), 1));
            session
                .connect("127.0.0.1", config.port, true)
                .context("Listen peer failed to connect")?;
            Some(session)
        } else {
            None
        };

        let mut clients = Vec::with_capacity(config.clients);
        for index in 0..config.clients {
            let client_config = seeded(config.client_session(), index as u64 + 2);
            let mut session = Session::new(network.endpoint(), client_config);
            session
                .connect("127.0.0.1", config.port, false)
                .with_context(|| format!("Client {} failed to connect", index))?;
            clients.push(Node {
                label: format!("client-{}", index),
                session,
                registry: avatar_registry(),
            });
        }

        let tick_duration = config.tick_duration();
        log::info!(
            "Sandbox ready: {} clients, {} beacons, listen peer: {}",
            config.clients,
            config.beacons,
            config.listen_peer
        );

        Ok(Self {
            config,
            host,
            listen_peer,
            clients,
            epoch: Instant::now(),
            tick_duration,
            frame: 0,
        })
    }

    /// Advances every peer by one tick. Avatars only move while `drive` is set.
    pub fn step(&mut self, drive: bool) {
        let now = self.epoch + self.tick_duration * self.frame;
        let dt = self.tick_duration.as_secs_f32();

        if drive {
            drive_avatars(&mut self.host.registry, ARBITER_PEER, self.frame, dt);
            if let Some(peer) = self.listen_peer.as_ref().and_then(Session::local_peer) {
                drive_avatars(&mut self.host.registry, peer, self.frame, dt);
            }
            for client in &mut self.clients {
                if let Some(peer) = client.session.local_peer() {
                    drive_avatars(&mut client.registry, peer, self.frame, dt);
                }
            }
        }

        self.host.session.tick_at(&mut self.host.registry, now);
        if let Some(session) = self.listen_peer.as_mut() {
            session.tick_at(&mut self.host.registry, now);
        }
        for client in &mut self.clients {
            client.session.tick_at(&mut client.registry, now);
        }

        self.log_events();
        self.frame += 1;
    }

    /// Drives for the configured ticks, then settles. State travels
    /// unordered, so a late stale update can land after the final one; every
    /// peer republishes what it owns once the network is quiet to overwrite it.
    pub fn run(&mut self) -> Report {
        for _ in 0..self.config.ticks {
            self.step(true);
        }
        self.settle();
        self.republish();
        self.settle();
        self.report()
    }

    fn settle(&mut self) {
        let ticks = self.config.settle_ticks();
        log::debug!("Settling for {} ticks", ticks);
        for _ in 0..ticks {
            self.step(false);
        }
    }

    fn republish(&mut self) {
        let mut touched = republish_avatars(&mut self.host.registry, ARBITER_PEER);
        if let Some(peer) = self.listen_peer.as_ref().and_then(Session::local_peer) {
            touched += republish_avatars(&mut self.host.registry, peer);
        }
        for client in &mut self.clients {
            if let Some(peer) = client.session.local_peer() {
                touched += republish_avatars(&mut client.registry, peer);
            }
        }
        log::debug!("Republished {} avatars", touched);
    }

    pub fn report(&self) -> Report {
        let clients = self
            .clients
            .iter()
            .map(|client| ClientReport {
                label: client.label.clone(),
                peer_id: client.session.local_peer(),
                entities: client.registry.len(),
                matching: self.matching_entities(&client.registry),
                stats: client.session.stats().clone(),
            })
            .collect();

        Report {
            frames: self.frame,
            arbiter_entities: self.host.registry.len(),
            clients,
        }
    }

    fn matching_entities(&self, registry: &Registry) -> usize {
        self.host
            .registry
            .iter()
            .filter(|record| {
                let Some(copy) = registry.get(record.id()) else {
                    return false;
                };
                let (Some(expected), Some(actual)) =
                    (record.downcast_ref::<Avatar>(), copy.downcast_ref::<Avatar>())
                else {
                    return false;
                };
                copy.owner() == record.owner() && expected.matches(actual)
            })
            .count()
    }

    fn log_events(&mut self) {
        for event in self.host.session.drain_events() {
            match event {
                SessionEvent::PeerConnected {
                    peer_id,
                    player_entity,
                } => log::info!("Peer {} joined, avatar {:?}", peer_id, player_entity),
                SessionEvent::PeerDisconnected { peer_id, reclaimed } => {
                    log::info!("Peer {} left, reclaimed {:?}", peer_id, reclaimed)
                }
                SessionEvent::PacketRejected { reason } => {
                    log::warn!("[{}] {}", self.host.label, reason)
                }
                other => log::debug!("[{}] {:?}", self.host.label, other),
            }
        }
        if let Some(session) = self.listen_peer.as_mut() {
            for event in session.drain_events() {
                log::debug!("[listen-peer] {:?}", event);
            }
        }
        for client in &mut self.clients {
            for event in client.session.drain_events() {
                match event {
                    SessionEvent::PacketRejected { reason } => {
                        log::warn!("[{}] {}", client.label, reason)
                    }
                    other => log::debug!("[{}] {:?}", client.label, other),
                }
            }
        }
    }
}
