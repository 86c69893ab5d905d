mod common;

use common::{PILOTED_GAUGE_KIND, GAUGE_KIND, init_logging, gauge, gauge_mut, gauge_registry};
use tether::{
    Channel, EntityId, EntityKind, JoinPacket, LocalNetwork, Packet, PacketType, PacketWriter,
    PeerId, Replicated, ReplicationManager, Session, SessionConfig, Target, Transport,
    TransportEvent,
};

fn state_packet(records: &[(EntityId, u32)]) -> Vec<u8> {
    let mut writer = PacketWriter::with_packet_type(PacketType::State);
    for &(id, reading) in records {
        writer.write_u32(id);
        writer.write_bytes(&reading.to_le_bytes());
    }
    writer.take()
}

fn spawn_packet(records: &[(EntityId, EntityKind)]) -> Vec<u8> {
    let mut writer = PacketWriter::with_packet_type(PacketType::Spawn);
    for &(id, kind) in records {
        writer.write_u32(id);
        writer.write_u32(kind);
    }
    writer.take()
}

fn ownership_packet(records: &[(PeerId, EntityId)]) -> Vec<u8> {
    let mut writer = PacketWriter::with_packet_type(PacketType::SetOwnership);
    for &(owner, id) in records {
        writer.write_u32(owner);
        writer.write_u32(id);
    }
    writer.take()
}

#[test]
fn joining_peer_gets_every_entity_in_the_next_state_packet() {
    let mut registry = gauge_registry();
    registry.spawn(GAUGE_KIND).unwrap();
    registry.spawn(GAUGE_KIND).unwrap();
    let mut arbiter = ReplicationManager::arbiter(&mut registry);

    let player = arbiter
        .on_peer_connected(&mut registry, 1, Some(GAUGE_KIND))
        .unwrap();
    assert_eq!(player, Some(3));

    let mut out = PacketWriter::new();
    assert_eq!(arbiter.write_state(&mut registry, &mut out), 3);
    let Packet::State(records) = Packet::decode(out.as_slice()).unwrap() else {
        panic!("expected a state packet");
    };
    let ids: Vec<EntityId> = records.iter().map(|record| record.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    out.clear();
    assert_eq!(arbiter.write_fields(&mut registry, &mut out), 3);
}

#[test]
fn owned_entity_ignores_its_own_echo() {
    let mut registry = gauge_registry();
    registry.insert_with_id(5, GAUGE_KIND).unwrap();
    registry.set_owner(5, 2).unwrap();
    gauge_mut(&mut registry, 5).set_reading(31);
    let mut peer = ReplicationManager::client(&mut registry, 2);

    peer.read(&mut registry, &state_packet(&[(5, 1)])).unwrap();

    assert_eq!(gauge(&registry, 5).reading, 31);
    assert!(registry.get(5).unwrap().entity().has_pending_changes());
}

#[test]
fn ownership_moves_input_between_entities() {
    let mut registry = gauge_registry();
    let mut peer = ReplicationManager::client(&mut registry, 3);
    peer.read(
        &mut registry,
        &spawn_packet(&[(7, PILOTED_GAUGE_KIND), (8, PILOTED_GAUGE_KIND)]),
    )
    .unwrap();
    peer.read(&mut registry, &ownership_packet(&[(3, 8)])).unwrap();

    peer.read(&mut registry, &ownership_packet(&[(3, 7), (1, 8)]))
        .unwrap();

    assert_eq!(gauge(&registry, 7).throttle_enabled(), Some(true));
    assert_eq!(gauge(&registry, 8).throttle_enabled(), Some(false));
}

#[test]
fn duplicate_spawn_yields_one_entity() {
    let mut registry = gauge_registry();
    let mut peer = ReplicationManager::client(&mut registry, 1);
    let packet = spawn_packet(&[(4, GAUGE_KIND), (4, GAUGE_KIND)]);

    peer.read(&mut registry, &packet).unwrap();
    peer.read(&mut registry, &packet).unwrap();

    assert_eq!(registry.ids(), vec![4]);
}

#[test]
fn every_peer_agrees_on_owners_after_ownership_settles() {
    let mut arbiter_registry = gauge_registry();
    let a = arbiter_registry.spawn(GAUGE_KIND).unwrap();
    let b = arbiter_registry.spawn(GAUGE_KIND).unwrap();
    let mut arbiter = ReplicationManager::arbiter(&mut arbiter_registry);

    let mut peer_registry = gauge_registry();
    let mut peer = ReplicationManager::client(&mut peer_registry, 2);
    peer.read(
        &mut peer_registry,
        &spawn_packet(&[(a, GAUGE_KIND), (b, GAUGE_KIND)]),
    )
    .unwrap();

    arbiter_registry.set_owner(a, 2).unwrap();
    arbiter_registry.set_owner(b, 5).unwrap();
    arbiter_registry.set_owner(a, 4).unwrap();
    let packet = arbiter.take_ownership_packet(&mut arbiter_registry).unwrap();
    peer.read(&mut peer_registry, &packet).unwrap();

    for id in [a, b] {
        assert_eq!(peer_registry.owner_of(id), arbiter_registry.owner_of(id));
    }
    assert_eq!(peer_registry.owner_of(a), Some(4));
}

/// Drives a client against a hand-rolled arbiter so the arrival order is
/// exactly State, Join, State.
#[test]
fn early_state_is_applied_before_later_state() {
    init_logging();
    let network = LocalNetwork::new();
    let mut arbiter = network.endpoint();
    arbiter.listen(6000).unwrap();

    let mut registry = gauge_registry();
    let mut client = Session::new(network.endpoint(), SessionConfig::default());
    client.connect("127.0.0.1", 6000, false).unwrap();

    let events = arbiter.poll();
    let Some(&TransportEvent::ConnectionRequest(handle)) = events.first() else {
        panic!("expected a connection request, got {:?}", events);
    };
    arbiter.accept(handle).unwrap();
    arbiter.poll();
    client.tick(&mut registry);

    let target = Target::Peer(handle);
    let unordered = Channel::UnorderedReliable;
    arbiter
        .send(&spawn_packet(&[(5, GAUGE_KIND)]), unordered, target)
        .unwrap();
    arbiter
        .send(&state_packet(&[(5, 10)]), unordered, target)
        .unwrap();
    arbiter
        .send(&JoinPacket::new(2, 40).encode(), Channel::OrderedReliable, target)
        .unwrap();
    arbiter
        .send(&state_packet(&[(5, 20)]), unordered, target)
        .unwrap();

    client.tick(&mut registry);

    assert_eq!(client.local_peer(), Some(2));
    assert_eq!(client.frame(), 41);
    assert_eq!(client.stats().early_packets_queued, 2);
    assert_eq!(client.stats().early_packets_replayed, 2);
    assert_eq!(gauge(&registry, 5).reading, 20);
}

#[test]
fn state_for_a_late_spawn_is_not_lost() {
    let mut registry = gauge_registry();
    let mut peer = ReplicationManager::client(&mut registry, 1);

    peer.read(&mut registry, &state_packet(&[(9, 77)])).unwrap();
    assert!(!registry.contains(9));

    peer.read(&mut registry, &spawn_packet(&[(9, GAUGE_KIND)]))
        .unwrap();
    assert_eq!(gauge(&registry, 9).reading, 77);
}
