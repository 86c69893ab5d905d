use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use thiserror::Error;

use crate::net::{
    Channel, ConnectionHandle, InboundPacket, JoinPacket, LatencySimulator, NetworkStats,
    OutboundPacket,
    PacketType, PacketWriter, PeerIndex, Target, Transport, TransportError, TransportEvent,
    peek_packet_type,
};
use crate::registry::{ARBITER_PEER, PeerId, Registry};
use crate::replication::{ReplicationError, ReplicationManager};

use super::config::SessionConfig;
use super::events::SessionEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Inactive,
    Host,
    Client,
    /// Arbiter process that also takes part as a player.
    HostClient,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Inactive => "inactive",
            Role::Host => "host",
            Role::Client => "client",
            Role::HostClient => "host-client",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot {operation}: session is already {role}")]
    InvalidRole { operation: &'static str, role: Role },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Drives one peer: owns the transport, classifies inbound packets and turns
/// replication writes into broadcasts once per tick.
#[derive(Debug)]
pub struct Session<T: Transport> {
    transport: T,
    config: SessionConfig,
    role: Role,
    local_peer: Option<PeerId>,
    frame: u32,
    replication: Option<ReplicationManager>,
    peers: PeerIndex,
    arbiter_connection: Option<ConnectionHandle>,
    early_packets: VecDeque<InboundPacket>,
    latency: Option<LatencySimulator>,
    outbound: PacketWriter,
    stats: NetworkStats,
    pending_events: VecDeque<SessionEvent>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let latency = config
            .latency
            .is_enabled()
            .then(|| LatencySimulator::new(config.latency.clone()));

        Self {
            transport,
            config,
            role: Role::Inactive,
            local_peer: None,
            frame: 0,
            replication: None,
            peers: PeerIndex::new(),
            arbiter_connection: None,
            early_packets: VecDeque::new(),
            latency,
            outbound: PacketWriter::new(),
            stats: NetworkStats::default(),
            pending_events: VecDeque::new(),
        }
    }

    fn ensure_inactive(&self, operation: &'static str) -> Result<(), SessionError> {
        if self.role != Role::Inactive {
            return Err(SessionError::InvalidRole {
                operation,
                role: self.role,
            });
        }
        Ok(())
    }

    /// Becomes the arbiter. The replication manager exists from here on.
    pub fn listen(&mut self, port: u16, registry: &mut Registry) -> Result<(), SessionError> {
        self.ensure_inactive("listen")?;
        self.transport.listen(port)?;

        self.role = Role::Host;
        self.local_peer = Some(ARBITER_PEER);
        self.frame = 0;
        self.replication = Some(
            ReplicationManager::arbiter(registry).with_waitlist_ttl(self.config.waitlist_ttl()),
        );

        log::info!("Listening on port {}", port);
        self.pending_events
            .push_back(SessionEvent::Listening { port });
        Ok(())
    }

    /// Starts connecting to an arbiter. Replication only starts once the Join
    /// packet arrives with our identity.
    pub fn connect(
        &mut self,
        addr: &str,
        port: u16,
        as_listen_peer: bool,
    ) -> Result<(), SessionError> {
        self.ensure_inactive("connect")?;
        self.transport.connect(addr, port)?;

        self.role = if as_listen_peer {
            Role::HostClient
        } else {
            Role::Client
        };
        log::info!("Connecting to {}:{} as {}", addr, port, self.role);
        Ok(())
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_peer(&self) -> Option<PeerId> {
        self.local_peer
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        self.replication.is_some()
    }

    pub fn replication(&self) -> Option<&ReplicationManager> {
        self.replication.as_ref()
    }

    pub fn replication_mut(&mut self) -> Option<&mut ReplicationManager> {
        self.replication.as_mut()
    }

    pub fn peers(&self) -> &PeerIndex {
        &self.peers
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn early_packet_count(&self) -> usize {
        self.early_packets.len()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = SessionEvent> + '_ {
        self.pending_events.drain(..)
    }

    fn is_listen_peer(&self) -> bool {
        self.role == Role::HostClient
    }

    pub fn tick(&mut self, registry: &mut Registry) {
        self.tick_at(registry, Instant::now());
    }

    /// One simulation step: receive, then send, then advance the frame.
    pub fn tick_at(&mut self, registry: &mut Registry, now: Instant) {
        self.poll_at(registry, now);
        self.send_updates_at(registry, now);
        self.frame = self.frame.wrapping_add(1);
    }

    pub fn poll(&mut self, registry: &mut Registry) {
        self.poll_at(registry, Instant::now());
    }

    pub fn poll_at(&mut self, registry: &mut Registry, now: Instant) {
        self.drain_early_packets(registry, now);

        for event in self.transport.poll() {
            self.handle_transport_event(registry, event, now);
        }

        if !self.is_listen_peer() {
            self.drain_delayed_inbound(registry, now);
        }
        self.flush_delayed_outbound(now);

        if let Some(manager) = self.replication.as_mut() {
            manager.expire_waitlist(now);
        }
        self.sync_latency_stats();
    }

    fn handle_transport_event(
        &mut self,
        registry: &mut Registry,
        event: TransportEvent,
        now: Instant,
    ) {
        match event {
            TransportEvent::ConnectionRequest(handle) => {
                if let Err(err) = self.transport.accept(handle) {
                    log::warn!("Failed to accept {}: {}", handle, err);
                }
            }
            TransportEvent::Connected(handle) => match self.role {
                Role::Host => self.admit_peer(registry, handle),
                Role::Client | Role::HostClient => {
                    log::info!("Connected to arbiter on {}, awaiting join", handle);
                    self.arbiter_connection = Some(handle);
                }
                Role::Inactive => {}
            },
            TransportEvent::Disconnected(handle) => self.handle_disconnect(registry, handle),
            TransportEvent::Packet { from, data, .. } => {
                self.stats.record_received(data.len());
                self.handle_packet(registry, InboundPacket::new(data, Some(from)), now);
            }
        }
    }

    fn admit_peer(&mut self, registry: &mut Registry, handle: ConnectionHandle) {
        let frame = self.frame;
        let peer_id = self.peers.register(handle, frame).peer_id;

        let join = JoinPacket::new(peer_id, frame).encode();
        self.send_now(&join, PacketType::Join.channel(), Target::Peer(handle));

        let Some(manager) = self.replication.as_mut() else {
            return;
        };
        let player_entity =
            match manager.on_peer_connected(registry, peer_id, self.config.player_kind) {
                Ok(player_entity) => player_entity,
                Err(err) => {
                    log::warn!("Could not grant a player entity to peer {}: {}", peer_id, err);
                    None
                }
            };
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.player_entity = player_entity;
        }

        log::info!(
            "Peer {} connected on {} at frame {}",
            peer_id,
            handle,
            frame
        );
        self.pending_events.push_back(SessionEvent::PeerConnected {
            peer_id,
            player_entity,
        });
    }

    fn handle_disconnect(&mut self, registry: &mut Registry, handle: ConnectionHandle) {
        if self.role == Role::Host {
            let Some(peer) = self.peers.remove_by_handle(handle) else {
                return;
            };
            let reclaimed = match self.replication.as_mut() {
                Some(manager) => manager.reclaim_ownership(registry, peer.peer_id),
                None => Vec::new(),
            };
            log::info!(
                "Peer {} disconnected, reclaimed {} entities",
                peer.peer_id,
                reclaimed.len()
            );
            self.pending_events.push_back(SessionEvent::PeerDisconnected {
                peer_id: peer.peer_id,
                reclaimed,
            });
        } else if self.arbiter_connection == Some(handle) {
            log::info!("Lost connection to arbiter");
            self.arbiter_connection = None;
            if !self.early_packets.is_empty() {
                log::debug!("Discarding {} early packets", self.early_packets.len());
                self.early_packets.clear();
            }
            self.pending_events.push_back(SessionEvent::Disconnected);
        }
    }

    fn handle_packet(&mut self, registry: &mut Registry, packet: InboundPacket, now: Instant) {
        let packet_type = match peek_packet_type(&packet.data) {
            Ok(packet_type) => packet_type,
            Err(err) => {
                self.stats.malformed_packets += 1;
                self.reject(err.to_string());
                return;
            }
        };

        match packet_type {
            PacketType::Join => self.handle_join(registry, &packet.data, now),
            _ if self.replication.is_none() => self.queue_early(packet_type, packet),
            _ => self.route_inbound(registry, packet, now),
        }
    }

    fn handle_join(&mut self, registry: &mut Registry, data: &[u8], now: Instant) {
        if self.role == Role::Host {
            self.reject(format!("{:?} packet sent to the arbiter", PacketType::Join));
            return;
        }
        if self.replication.is_some() {
            log::warn!("Ignoring repeated join packet");
            return;
        }

        let join = match JoinPacket::decode(data) {
            Ok(join) => join,
            Err(err) => {
                self.stats.malformed_packets += 1;
                self.reject(err.to_string());
                return;
            }
        };

        self.local_peer = Some(join.peer_id);
        self.frame = join.frame;
        let manager = if self.is_listen_peer() {
            ReplicationManager::listen_peer(registry, join.peer_id)
        } else {
            ReplicationManager::client(registry, join.peer_id)
        };
        self.replication = Some(manager.with_waitlist_ttl(self.config.waitlist_ttl()));

        log::info!(
            "Joined as peer {} at frame {}",
            join.peer_id,
            join.frame
        );
        self.pending_events.push_back(SessionEvent::Joined {
            peer_id: join.peer_id,
            frame: join.frame,
        });

        // Anything that overtook the join goes first, in arrival order.
        self.drain_early_packets(registry, now);
    }

    fn queue_early(&mut self, packet_type: PacketType, packet: InboundPacket) {
        if self.early_packets.len() >= self.config.max_early_packets {
            if self.stats.early_packets_dropped == 0 {
                log::warn!(
                    "Early packet queue full ({} packets), dropping until join",
                    self.early_packets.len()
                );
            }
            self.stats.early_packets_dropped += 1;
            return;
        }
        log::debug!("Queueing {:?} packet received before join", packet_type);
        self.early_packets.push_back(packet);
        self.stats.early_packets_queued += 1;
    }

    fn drain_early_packets(&mut self, registry: &mut Registry, now: Instant) {
        if self.replication.is_none() {
            return;
        }
        while let Some(packet) = self.early_packets.pop_front() {
            log::debug!("Replaying early packet ({} bytes)", packet.data.len());
            self.stats.early_packets_replayed += 1;
            self.route_inbound(registry, packet, now);
        }
    }

    fn route_inbound(&mut self, registry: &mut Registry, packet: InboundPacket, now: Instant) {
        if !self.is_listen_peer() {
            if let Some(latency) = self.latency.as_mut() {
                latency.delay(packet, now);
                return;
            }
        }
        self.apply(registry, &packet, now);
    }

    fn drain_delayed_inbound(&mut self, registry: &mut Registry, now: Instant) {
        let ready: Vec<InboundPacket> = match self.latency.as_mut() {
            Some(latency) => latency.drain_ready(now).collect(),
            None => return,
        };
        for packet in ready {
            self.apply(registry, &packet, now);
        }
    }

    fn apply(&mut self, registry: &mut Registry, packet: &InboundPacket, now: Instant) {
        let Some(manager) = self.replication.as_mut() else {
            return;
        };
        // The arbiter checks writes against the sending peer; a packet from a
        // link that has since left the peer index is dropped.
        let result = match (self.role, packet.from) {
            (Role::Host, Some(handle)) => match self.peers.get_by_handle(handle) {
                Some(peer) => manager.read_from(registry, &packet.data, peer.peer_id, now),
                None => {
                    log::debug!("Dropping packet from departed link {}", handle);
                    return;
                }
            },
            _ => manager.read_at(registry, &packet.data, now),
        };
        if let Err(err) = result {
            if matches!(err, ReplicationError::Decode(_)) {
                self.stats.malformed_packets += 1;
            }
            self.reject(err.to_string());
        }
    }

    fn reject(&mut self, reason: String) {
        log::warn!("Rejected packet: {}", reason);
        self.pending_events
            .push_back(SessionEvent::PacketRejected { reason });
    }

    pub fn send_updates(&mut self, registry: &mut Registry) {
        self.send_updates_at(registry, Instant::now());
    }

    /// Spawns go first so receivers know an entity before its ownership and
    /// state arrive.
    pub fn send_updates_at(&mut self, registry: &mut Registry, now: Instant) {
        self.send_spawns(registry, now);
        self.send_ownership(registry, now);
        self.send_state(registry, now);
        self.send_fields(registry, now);
        self.sync_latency_stats();
    }

    pub fn send_state(&mut self, registry: &mut Registry, now: Instant) {
        if self.is_listen_peer() {
            return;
        }
        let Some(manager) = self.replication.as_mut() else {
            return;
        };
        self.outbound.clear();
        let written = manager.write_state(registry, &mut self.outbound);
        self.transmit_outbound(written, now);
    }

    pub fn send_fields(&mut self, registry: &mut Registry, now: Instant) {
        if self.is_listen_peer() {
            return;
        }
        let Some(manager) = self.replication.as_mut() else {
            return;
        };
        self.outbound.clear();
        let written = manager.write_fields(registry, &mut self.outbound);
        self.transmit_outbound(written, now);
    }

    /// Flushes the spawn queue every tick. A listen peer shares the arbiter's
    /// registry, so its announcements are never sent.
    pub fn send_spawns(&mut self, registry: &mut Registry, now: Instant) {
        let Some(manager) = self.replication.as_mut() else {
            return;
        };
        self.outbound.clear();
        let written = manager.write_spawns(registry, &mut self.outbound);
        if self.is_listen_peer() {
            self.outbound.clear();
            return;
        }
        self.transmit_outbound(written, now);
    }

    pub fn send_ownership(&mut self, registry: &mut Registry, now: Instant) {
        let Some(manager) = self.replication.as_mut() else {
            return;
        };
        if let Some(packet) = manager.take_ownership_packet(registry) {
            self.transmit(packet, now);
        }
    }

    fn transmit_outbound(&mut self, written: usize, now: Instant) {
        if written > 0 {
            let data = self.outbound.take();
            self.transmit(data, now);
        }
        self.outbound.clear();
    }

    /// Broadcasts never loop back: a listen peer shares the arbiter's
    /// registry, so nothing local needs to observe its own send.
    fn transmit(&mut self, data: Vec<u8>, now: Instant) {
        if let Some(latency) = self.latency.as_mut() {
            let packet = OutboundPacket {
                data,
                channel: Channel::UnorderedReliable,
                target: Target::Broadcast,
            };
            latency.send_delayed(packet, false, now);
            return;
        }
        self.send_now(&data, Channel::UnorderedReliable, Target::Broadcast);
    }

    fn flush_delayed_outbound(&mut self, now: Instant) {
        let ready: Vec<OutboundPacket> = match self.latency.as_mut() {
            Some(latency) => latency.drain_ready_outbound(now).collect(),
            None => return,
        };
        for packet in ready {
            self.send_now(&packet.data, packet.channel, packet.target);
        }
    }

    fn send_now(&mut self, data: &[u8], channel: Channel, target: Target) {
        match self.transport.send(data, channel, target) {
            Ok(()) => self.stats.record_sent(data.len()),
            Err(err) => log::warn!("Send failed: {}", err),
        }
    }

    fn sync_latency_stats(&mut self) {
        if let Some(latency) = &self.latency {
            self.stats.packets_delayed = latency.delayed_count();
            self.stats.packets_dropped = latency.dropped_count();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{LocalNetwork, LocalTransport};
    use crate::testing::counter_factory;

    fn session(network: &LocalNetwork) -> Session<LocalTransport> {
        Session::new(network.endpoint(), SessionConfig::default())
    }

    #[test]
    fn listen_makes_an_arbiter_at_frame_zero() {
        let network = LocalNetwork::new();
        let mut registry = Registry::new(counter_factory());
        let mut host = session(&network);

        host.listen(4000, &mut registry).unwrap();

        assert_eq!(host.role(), Role::Host);
        assert_eq!(host.local_peer(), Some(ARBITER_PEER));
        assert_eq!(host.frame(), 0);
        assert!(host.replication().unwrap().is_arbiter());
        assert_eq!(
            host.drain_events().collect::<Vec<_>>(),
            vec![SessionEvent::Listening { port: 4000 }]
        );
    }

    #[test]
    fn role_is_fixed_once_chosen() {
        let network = LocalNetwork::new();
        let mut registry = Registry::new(counter_factory());
        let mut host = session(&network);
        host.listen(4001, &mut registry).unwrap();

        assert!(matches!(
            host.listen(4002, &mut registry),
            Err(SessionError::InvalidRole {
                operation: "listen",
                role: Role::Host
            })
        ));
        assert!(matches!(
            host.connect("127.0.0.1", 4001, false),
            Err(SessionError::InvalidRole { role: Role::Host, .. })
        ));
    }

    #[test]
    fn client_role_is_fixed_once_chosen() {
        let network = LocalNetwork::new();
        let mut registry = Registry::new(counter_factory());
        let mut host = session(&network);
        host.listen(4005, &mut registry).unwrap();
        let mut client = session(&network);
        client.connect("127.0.0.1", 4005, false).unwrap();

        assert!(matches!(
            client.connect("127.0.0.1", 4005, false),
            Err(SessionError::InvalidRole {
                operation: "connect",
                role: Role::Client
            })
        ));
        assert!(matches!(
            client.listen(4006, &mut registry),
            Err(SessionError::InvalidRole {
                operation: "listen",
                role: Role::Client
            })
        ));
        assert_eq!(client.role(), Role::Client);
    }

    #[test]
    fn early_queue_is_bounded_and_cleared_on_disconnect() {
        let network = LocalNetwork::new();
        let mut registry = Registry::new(counter_factory());
        let mut client = Session::new(
            network.endpoint(),
            SessionConfig {
                max_early_packets: 2,
                ..SessionConfig::default()
            },
        );
        let arbiter = ConnectionHandle(9);
        client.arbiter_connection = Some(arbiter);

        for _ in 0..3 {
            let state = vec![PacketType::State as u8];
            let packet = InboundPacket::new(state, Some(arbiter));
            client.handle_packet(&mut registry, packet, Instant::now());
        }
        assert_eq!(client.early_packet_count(), 2);
        assert_eq!(client.stats().early_packets_queued, 2);
        assert_eq!(client.stats().early_packets_dropped, 1);

        client.handle_disconnect(&mut registry, arbiter);
        assert_eq!(client.early_packet_count(), 0);
        assert_eq!(
            client.drain_events().collect::<Vec<_>>(),
            vec![SessionEvent::Disconnected]
        );
    }

    #[test]
    fn client_has_no_manager_until_joined() {
        let network = LocalNetwork::new();
        let mut host_registry = Registry::new(counter_factory());
        let mut client_registry = Registry::new(counter_factory());
        let mut host = session(&network);
        let mut client = session(&network);
        host.listen(4003, &mut host_registry).unwrap();

        client.connect("127.0.0.1", 4003, false).unwrap();
        assert_eq!(client.role(), Role::Client);
        assert!(!client.is_ready());

        host.tick(&mut host_registry);
        host.tick(&mut host_registry);
        client.tick(&mut client_registry);

        assert!(client.is_ready());
        assert_eq!(client.local_peer(), Some(1));
        assert_eq!(host.peers().len(), 1);
    }

    #[test]
    fn failed_connect_leaves_session_inactive() {
        let network = LocalNetwork::new();
        let mut client = session(&network);
        assert!(matches!(
            client.connect("127.0.0.1", 4999, false),
            Err(SessionError::Transport(TransportError::Unreachable { .. }))
        ));
        assert_eq!(client.role(), Role::Inactive);
    }

    #[test]
    fn garbage_is_rejected_without_stopping_the_tick() {
        let network = LocalNetwork::new();
        let mut registry = Registry::new(counter_factory());
        let mut host = session(&network);
        host.listen(4004, &mut registry).unwrap();
        let _ = host.drain_events().count();

        host.handle_packet(
            &mut registry,
            InboundPacket::new(vec![42, 1, 2], None),
            Instant::now(),
        );

        assert_eq!(host.stats().malformed_packets, 1);
        assert!(matches!(
            host.drain_events().next(),
            Some(SessionEvent::PacketRejected { .. })
        ));
    }
}
