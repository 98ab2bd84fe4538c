// SPDX-License-Identifier: Apache-2.0

//! Cross-module round trips for the wire types: a varint at each of its
//! four length boundaries, packet-number truncation across a plausible
//! handshake exchange, an ACK rangeset built from out-of-order packet
//! arrivals, and a transport parameter set with every field populated.

use quic_core::{
    frame::AckFrame,
    interval_set::RangeSet,
    packet::number::PacketNumberSpace,
    transport_parameters::TransportParameters,
    varint::VarInt,
};
use quic_wire::{DecoderBuffer, EncoderBuffer, EncoderValue};

#[test]
fn varint_boundaries_round_trip_through_their_shortest_encoding() {
    // one past the top of each of the four varint length classes, per
    // RFC 9000 §16's two-bit length tag.
    for &(value, expected_len) in &[(63u64, 1), (16383, 2), (1_073_741_823, 4), ((1u64 << 62) - 1, 8)] {
        let varint = VarInt::new(value).unwrap();
        let mut storage = [0u8; 8];
        let mut encoder = EncoderBuffer::new(&mut storage);
        varint.encode(&mut encoder);
        assert_eq!(encoder.as_slice().len(), expected_len);

        let (decoded, remaining) = DecoderBuffer::new(encoder.as_slice()).decode::<VarInt>().unwrap();
        assert_eq!(decoded, varint);
        assert!(remaining.is_empty());
    }
}

#[test]
fn packet_numbers_survive_truncation_across_a_handshake_exchange() {
    // client sends 0..=3 before hearing anything back, so the first
    // truncation has no largest_acked to shrink against.
    let space = PacketNumberSpace::ApplicationData;
    let sent: Vec<_> = (0..4u64).map(|n| space.new_packet_number(VarInt::new(n).unwrap())).collect();

    let mut largest_acked = None;
    for pn in &sent {
        let truncated = pn.truncate(largest_acked);
        let mut bytes = Vec::new();
        bytes.resize(truncated.len(), 0);
        truncated.encode_to(&mut bytes);

        let reparsed = quic_core::packet::number::TruncatedPacketNumber::from_bytes(space, &bytes);
        let expanded = reparsed.expand(largest_acked);
        assert_eq!(expanded, *pn);
        largest_acked = Some(*pn);
    }
}

#[test]
fn ack_rangeset_built_from_out_of_order_arrivals_encodes_the_gaps() {
    let mut received = RangeSet::new();
    for &pn in &[0u64, 1, 2, 5, 6, 9] {
        received.insert_value(pn);
    }
    assert_eq!(received.interval_len(), 3);

    let ranges: Vec<_> = received.iter_rev().collect();
    let ack_ranges: Vec<(VarInt, VarInt)> = {
        let mut out = Vec::new();
        let mut prev_start: Option<u64> = None;
        for r in &ranges {
            let len = VarInt::new(r.len() - 1).unwrap();
            let gap = match prev_start {
                None => VarInt::ZERO,
                Some(prev) => VarInt::new(prev - r.end - 1).unwrap(),
            };
            out.push((gap, len));
            prev_start = Some(r.start);
        }
        out
    };

    let frame = AckFrame {
        largest_acknowledged: VarInt::new(9).unwrap(),
        ack_delay: VarInt::new(0).unwrap(),
        ack_ranges,
        ecn_counts: None,
    };
    let mut storage = [0u8; 64];
    let mut encoder = EncoderBuffer::new(&mut storage);
    frame.encode(&mut encoder);

    let (decoded, remaining) = AckFrame::decode(DecoderBuffer::new(encoder.as_slice())).unwrap();
    assert_eq!(decoded, frame);
    assert!(remaining.is_empty());
}

#[test]
fn transport_parameters_with_every_field_set_round_trip() {
    let params = TransportParameters {
        original_destination_connection_id: Some(
            quic_core::connection_id::ConnectionId::try_from_bytes(&[1, 2, 3, 4]).unwrap(),
        ),
        max_idle_timeout: Some(core::time::Duration::from_millis(30_000)),
        stateless_reset_token: Some([7u8; 16]),
        max_udp_payload_size: Some(VarInt::new(1472).unwrap()),
        initial_max_data: VarInt::new(1 << 20).unwrap(),
        initial_max_stream_data_bidi_local: VarInt::new(1 << 16).unwrap(),
        initial_max_stream_data_bidi_remote: VarInt::new(1 << 16).unwrap(),
        initial_max_stream_data_uni: VarInt::new(1 << 16).unwrap(),
        initial_max_streams_bidi: VarInt::new(100).unwrap(),
        initial_max_streams_uni: VarInt::new(100).unwrap(),
        ack_delay_exponent: 3,
        max_ack_delay: core::time::Duration::from_millis(25),
        disable_active_migration: true,
        active_connection_id_limit: VarInt::new(4).unwrap(),
        initial_source_connection_id: Some(
            quic_core::connection_id::ConnectionId::try_from_bytes(&[9, 9, 9, 9]).unwrap(),
        ),
        retry_source_connection_id: None,
    };

    let mut storage = [0u8; 256];
    let mut encoder = EncoderBuffer::new(&mut storage);
    params.encode_into(&mut encoder);

    let decoded = TransportParameters::decode(DecoderBuffer::new(encoder.as_slice())).unwrap();
    assert_eq!(decoded, params);
}
