//! Property tests for the packet decoder and the apply path.
//!
//! Inbound bytes come straight off the network, so no input may panic and a
//! packet that fails to decode must leave the registry untouched.

mod common;

use common::{GAUGE_KIND, gauge_registry, snapshot};
use proptest::prelude::*;
use tether::{JoinPacket, Packet, PacketType, PacketWriter, ReplicationManager};

fn state_bytes(records: &[(u32, u32)]) -> Vec<u8> {
    let mut writer = PacketWriter::with_packet_type(PacketType::State);
    for &(id, reading) in records {
        writer.write_u32(id);
        writer.write_bytes(&reading.to_le_bytes());
    }
    writer.take()
}

proptest! {
    /// Property: arbitrary bytes never crash the decoder
    #[test]
    fn arbitrary_bytes_dont_crash_decoder(
        random_bytes in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let _result = Packet::decode(&random_bytes);
    }

    /// Property: arbitrary bytes never crash a client applying them
    #[test]
    fn arbitrary_bytes_dont_crash_client(
        tag in 0u8..6,
        body in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let mut registry = gauge_registry();
        registry.insert_with_id(1, GAUGE_KIND).unwrap();
        let mut client = ReplicationManager::client(&mut registry, 2);

        let mut bytes = vec![tag];
        bytes.extend_from_slice(&body);
        let _result = client.read(&mut registry, &bytes);
    }

    /// Property: Join packets roundtrip
    #[test]
    fn join_roundtrips(peer_id in any::<u32>(), frame in any::<u32>()) {
        let join = JoinPacket::new(peer_id, frame);
        prop_assert_eq!(JoinPacket::decode(&join.encode()).unwrap(), join);
    }

    /// Property: a truncated State packet applies nothing
    #[test]
    fn truncated_state_is_all_or_nothing(
        readings in prop::collection::vec(any::<u32>(), 1..8),
        cut in 1usize..8,
    ) {
        let mut registry = gauge_registry();
        for _ in &readings {
            registry.spawn(GAUGE_KIND).unwrap();
        }
        let mut client = ReplicationManager::client(&mut registry, 9);
        let before = snapshot(&registry);

        let records: Vec<(u32, u32)> = readings
            .iter()
            .enumerate()
            .map(|(index, &reading)| (index as u32 + 1, reading))
            .collect();
        let mut bytes = state_bytes(&records);
        let cut = cut.min(bytes.len() - 1);
        bytes.truncate(bytes.len() - cut);

        let result = client.read(&mut registry, &bytes);
        prop_assert!(result.is_err());
        prop_assert_eq!(snapshot(&registry), before);
    }

    /// Property: applying a spawn packet twice never duplicates an entity
    #[test]
    fn spawn_is_idempotent(ids in prop::collection::vec(1u32..64, 0..16)) {
        let mut registry = gauge_registry();
        let mut client = ReplicationManager::client(&mut registry, 1);

        let mut writer = PacketWriter::with_packet_type(PacketType::Spawn);
        for &id in &ids {
            writer.write_u32(id);
            writer.write_u32(GAUGE_KIND);
        }
        let bytes = writer.take();
        client.read(&mut registry, &bytes).unwrap();
        client.read(&mut registry, &bytes).unwrap();

        let mut expected = ids.clone();
        expected.sort_unstable();
        expected.dedup();
        prop_assert_eq!(registry.ids(), expected);
    }
}
