//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use bfdd_core::packet::{DecodeError, Packet, PacketFlags, State};

//
// Helper functions.
//

fn test_encode_packet(bytes_expected: &[u8], packet: &Packet) {
    let bytes_actual = packet.encode();
    assert_eq!(bytes_expected, bytes_actual.as_ref());
}

fn test_decode_packet(bytes: &[u8], packet_expected: &Packet) {
    let packet_actual = Packet::decode(bytes).unwrap();
    assert_eq!(*packet_expected, packet_actual);
}

fn test_decode_error(bytes: &[u8], error_expected: DecodeError) {
    assert_eq!(Packet::decode(bytes), Err(error_expected));
}

//
// Test packets.
//

static PACKET_UP: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x20, 0xc0, 0x03, 0x18, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66,
            0x77, 0x88, 0x00, 0x04, 0x93, 0xe0, 0x00, 0x04, 0x93, 0xe0,
            0x00, 0x00, 0x00, 0x00,
        ],
        Packet {
            version: 1,
            diag: 0,
            state: State::Up,
            flags: PacketFlags::empty(),
            detect_mult: 3,
            my_discr: 0x11223344,
            your_discr: 0x55667788,
            desired_min_tx: 300000,
            req_min_rx: 300000,
            req_min_echo_rx: 0,
        },
    )
});

static PACKET_BOOTSTRAP: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x20, 0x40, 0x03, 0x18, 0x00, 0x00, 0x00, 0x2a, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0xc3, 0x50, 0x00, 0x00, 0xc3, 0x50,
            0x00, 0x00, 0x00, 0x00,
        ],
        Packet {
            version: 1,
            diag: 0,
            state: State::Down,
            flags: PacketFlags::empty(),
            detect_mult: 3,
            my_discr: 42,
            your_discr: 0,
            desired_min_tx: 50000,
            req_min_rx: 50000,
            req_min_echo_rx: 0,
        },
    )
});

static PACKET_FINAL: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x23, 0xd0, 0x03, 0x18, 0x9a, 0x8b, 0x7c, 0x6d, 0x01, 0x02,
            0x03, 0x04, 0x00, 0x0f, 0x42, 0x40, 0x00, 0x0f, 0x42, 0x40,
            0x00, 0x00, 0x00, 0x00,
        ],
        Packet {
            version: 1,
            diag: 3,
            state: State::Up,
            flags: PacketFlags::F,
            detect_mult: 3,
            my_discr: 0x9a8b7c6d,
            your_discr: 0x01020304,
            desired_min_tx: 1000000,
            req_min_rx: 1000000,
            req_min_echo_rx: 0,
        },
    )
});

//
// Tests.
//

#[test]
fn test_encode_up() {
    let (ref bytes, ref packet) = *PACKET_UP;
    test_encode_packet(bytes, packet);
}

#[test]
fn test_decode_up() {
    let (ref bytes, ref packet) = *PACKET_UP;
    test_decode_packet(bytes, packet);
}

#[test]
fn test_encode_bootstrap() {
    let (ref bytes, ref packet) = *PACKET_BOOTSTRAP;
    test_encode_packet(bytes, packet);
}

#[test]
fn test_decode_bootstrap() {
    let (ref bytes, ref packet) = *PACKET_BOOTSTRAP;
    test_decode_packet(bytes, packet);
}

#[test]
fn test_encode_final() {
    let (ref bytes, ref packet) = *PACKET_FINAL;
    test_encode_packet(bytes, packet);
}

#[test]
fn test_decode_final() {
    let (ref bytes, ref packet) = *PACKET_FINAL;
    test_decode_packet(bytes, packet);
}

//
// Decode boundary cases.
//

#[test]
fn test_decode_short_frame() {
    let bytes = &PACKET_UP.0[..23];
    test_decode_error(bytes, DecodeError::IncompletePacket);
}

#[test]
fn test_decode_bad_version() {
    for version in [0u8, 2, 7] {
        let mut bytes = PACKET_UP.0.clone();
        bytes[0] = (version << 5) | (bytes[0] & 0x1f);
        test_decode_error(&bytes, DecodeError::InvalidVersion(version));
    }
}

#[test]
fn test_decode_multipoint_flag() {
    let mut bytes = PACKET_UP.0.clone();
    bytes[1] |= 0x01;
    test_decode_error(&bytes, DecodeError::InvalidFlags(PacketFlags::M));
}

#[test]
fn test_decode_zero_detect_mult() {
    let mut bytes = PACKET_UP.0.clone();
    bytes[2] = 0;
    test_decode_error(&bytes, DecodeError::InvalidDetectMult(0));
}

#[test]
fn test_decode_zero_my_discr() {
    let mut bytes = PACKET_UP.0.clone();
    bytes[4..8].fill(0);
    test_decode_error(&bytes, DecodeError::InvalidMyDiscriminator(0));
}

#[test]
fn test_decode_zero_your_discr_init() {
    let mut bytes = PACKET_UP.0.clone();
    bytes[1] = (State::Init as u8) << 6;
    bytes[8..12].fill(0);
    test_decode_error(&bytes, DecodeError::InvalidYourDiscriminator(0));
}

#[test]
fn test_decode_zero_your_discr_up() {
    let mut bytes = PACKET_UP.0.clone();
    bytes[8..12].fill(0);
    test_decode_error(&bytes, DecodeError::InvalidYourDiscriminator(0));
}

#[test]
fn test_decode_length_beyond_datagram() {
    let mut bytes = PACKET_UP.0.clone();
    bytes[3] = 25;
    test_decode_error(&bytes, DecodeError::InvalidPacketLength(25));
}

#[test]
fn test_decode_auth_too_short() {
    // The A bit requires a length of at least 26.
    let mut bytes = PACKET_UP.0.clone();
    bytes[1] |= 0x04;
    test_decode_error(&bytes, DecodeError::InvalidPacketLength(24));
}

#[test]
fn test_decode_auth_present() {
    // A 26-byte frame with the A bit set decodes successfully; the auth-bit
    // disagreement is handled by the session layer.
    let mut bytes = PACKET_UP.0.clone();
    bytes[1] |= 0x04;
    bytes[3] = 26;
    bytes.extend_from_slice(&[0x01, 0x02]);
    let packet = Packet::decode(&bytes).unwrap();
    assert!(packet.flags.contains(PacketFlags::A));
    assert_eq!(packet.my_discr, 0x11223344);
}
