//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::time::Duration;

use bfdd_core::events;
use bfdd_core::master::{Config, InputChannelsRx, Master};
use bfdd_core::packet::{DiagnosticCode, Packet, PacketFlags, State};
use bfdd_core::session::{SLOW_TX_INTERVAL, Session};

//
// Helper functions.
//

fn local_addr() -> IpAddr {
    "127.0.0.1".parse().unwrap()
}

fn remote_addr() -> IpAddr {
    "127.0.0.2".parse().unwrap()
}

fn setup(min_tx: u32, min_rx: u32, passive: bool) -> (Master, InputChannelsRx) {
    let (tx, rx) = Master::channels();
    let config = Config {
        local: local_addr(),
        peers: vec![remote_addr()],
        passive,
        local_multiplier: 3,
        min_tx,
        min_rx,
    };
    let master = Master::new(config, tx).unwrap();
    (master, rx)
}

fn remote_packet(state: State, your_discr: u32) -> Packet {
    Packet {
        version: 1,
        diag: 0,
        state,
        flags: PacketFlags::empty(),
        detect_mult: 3,
        my_discr: 42,
        your_discr,
        desired_min_tx: 50000,
        req_min_rx: 50000,
        req_min_echo_rx: 0,
    }
}

fn inject(
    master: &mut Master,
    packet: &Packet,
) -> Result<(), bfdd_core::error::Error> {
    events::process_udp_packet(master, remote_addr(), &packet.encode())
}

fn session(master: &mut Master) -> &mut Session {
    let (_, sess) = master.sessions.get_mut_by_addr(&remote_addr()).unwrap();
    sess
}

// Brings the session to the Up state through a regular handshake.
fn bringup(master: &mut Master) -> u32 {
    inject(master, &remote_packet(State::Down, 0)).unwrap();
    let local_discr = session(master).state.local_discr;
    inject(master, &remote_packet(State::Init, local_discr)).unwrap();
    assert_eq!(session(master).state.local_state, State::Up);
    local_discr
}

//
// Tests.
//

#[test]
fn test_initial_conditions() {
    let (mut master, _rx) = setup(100_000, 1_000_000, false);

    let sess = session(&mut master);
    assert_eq!(sess.state.local_state, State::Down);
    assert_eq!(sess.state.remote_state, State::Down);
    assert_ne!(sess.state.local_discr, 0);
    assert_eq!(sess.state.remote_discr, 0);
    assert_eq!(sess.desired_min_tx_interval(), SLOW_TX_INTERVAL);
    assert_eq!(sess.required_min_rx_interval(), 1_000_000);
    assert_eq!(sess.remote_min_rx_interval(), 1);
    assert_eq!(sess.remote_min_tx_interval(), None);
    assert_eq!(sess.remote_multiplier(), None);
    assert_eq!(sess.state.async_tx_interval, SLOW_TX_INTERVAL);
    assert_eq!(sess.async_detect_time(), None);
    assert!(!sess.poll_sequence_is_active());
    assert_eq!(sess.last_rx_time(), None);
}

#[test]
fn test_generated_packet() {
    let (mut master, _rx) = setup(100_000, 1_000_000, false);

    let sess = session(&mut master);
    let packet = sess.generate_packet();
    assert_eq!(packet.state, State::Down);
    assert!(packet.flags.is_empty());
    assert_eq!(packet.my_discr, sess.state.local_discr);
    assert_eq!(packet.your_discr, 0);
    assert_eq!(packet.desired_min_tx, SLOW_TX_INTERVAL);
    assert_eq!(packet.req_min_rx, 1_000_000);
    assert_eq!(packet.req_min_echo_rx, 0);
}

#[test]
fn test_cold_bringup() {
    let (mut master, _rx) = setup(100_000, 1_000_000, false);

    inject(&mut master, &remote_packet(State::Down, 0)).unwrap();

    let sess = session(&mut master);
    assert_eq!(sess.state.local_state, State::Init);
    assert_eq!(sess.state.remote_discr, 42);
    assert_eq!(sess.remote_min_tx_interval(), Some(50000));
    assert_eq!(sess.remote_min_rx_interval(), 50000);
    // Detection time: remote multiplier times the agreed remote transmit
    // interval (the local Rx floor dominates here).
    assert_eq!(sess.async_detect_time(), Some(3_000_000));
    // The slow Tx rate remains in effect until the session is Up.
    assert_eq!(sess.desired_min_tx_interval(), SLOW_TX_INTERVAL);
    assert_eq!(sess.state.async_tx_interval, SLOW_TX_INTERVAL);
    assert!(sess.last_rx_time().is_some());
}

#[test]
fn test_handshake_to_up() {
    let (mut master, _rx) = setup(100_000, 1_000_000, false);

    bringup(&mut master);

    let sess = session(&mut master);
    assert_eq!(sess.state.local_state, State::Up);
    assert_eq!(sess.desired_min_tx_interval(), 100_000);
    assert_eq!(sess.state.async_tx_interval, 100_000);
    // Lowering the Tx interval starts a Poll Sequence.
    assert!(sess.poll_sequence_is_active());
}

#[test]
fn test_up_init_no_transition() {
    let (mut master, _rx) = setup(100_000, 1_000_000, false);

    let local_discr = bringup(&mut master);
    inject(&mut master, &remote_packet(State::Init, local_discr)).unwrap();

    let sess = session(&mut master);
    assert_eq!(sess.state.local_state, State::Up);
    assert_eq!(sess.state.remote_state, State::Init);
}

#[test]
fn test_neighbor_signaled_down() {
    let (mut master, _rx) = setup(100_000, 1_000_000, false);

    let local_discr = bringup(&mut master);
    inject(&mut master, &remote_packet(State::Down, local_discr)).unwrap();

    let sess = session(&mut master);
    assert_eq!(sess.state.local_state, State::Down);
    assert_eq!(sess.state.local_diag, DiagnosticCode::NbrDown);
    assert_eq!(sess.desired_min_tx_interval(), SLOW_TX_INTERVAL);
    assert_eq!(sess.state.async_tx_interval, SLOW_TX_INTERVAL);
}

#[test]
fn test_neighbor_signaled_admin_down() {
    let (mut master, _rx) = setup(100_000, 1_000_000, false);

    let local_discr = bringup(&mut master);
    inject(&mut master, &remote_packet(State::AdminDown, local_discr))
        .unwrap();

    let sess = session(&mut master);
    assert_eq!(sess.state.local_state, State::Down);
    assert_eq!(sess.state.local_diag, DiagnosticCode::NbrDown);
    assert_eq!(sess.desired_min_tx_interval(), SLOW_TX_INTERVAL);
}

#[test]
fn test_detection_expiry() {
    let (mut master, _rx) = setup(100_000, 4000, false);

    let mut packet = remote_packet(State::Down, 0);
    packet.desired_min_tx = 2000;
    inject(&mut master, &packet).unwrap();
    let local_discr = session(&mut master).state.local_discr;
    let mut packet = remote_packet(State::Init, local_discr);
    packet.desired_min_tx = 2000;
    inject(&mut master, &packet).unwrap();

    let sess = session(&mut master);
    let sess_id = sess.id;
    assert_eq!(sess.state.local_state, State::Up);
    assert_eq!(sess.async_detect_time(), Some(12_000));

    // Stay silent for longer than the detection time.
    std::thread::sleep(Duration::from_millis(13));
    events::process_detection_timer_expiry(&mut master, sess_id).unwrap();

    let sess = session(&mut master);
    assert_eq!(sess.state.local_state, State::Down);
    assert_eq!(sess.state.local_diag, DiagnosticCode::TimeExpired);
    assert_eq!(sess.desired_min_tx_interval(), SLOW_TX_INTERVAL);
}

#[test]
fn test_detection_expiry_revalidation() {
    let (mut master, _rx) = setup(100_000, 1_000_000, false);

    bringup(&mut master);
    let sess_id = session(&mut master).id;

    // The deadline hasn't passed, so a spurious notification is a no-op.
    events::process_detection_timer_expiry(&mut master, sess_id).unwrap();

    let sess = session(&mut master);
    assert_eq!(sess.state.local_state, State::Up);
}

#[test]
fn test_poll_sequence_deferred_raise() {
    let (mut master, _rx) = setup(1_000_000, 1_000_000, false);

    let mut packet = remote_packet(State::Down, 0);
    packet.desired_min_tx = 1_000_000;
    packet.req_min_rx = 1_000_000;
    inject(&mut master, &packet).unwrap();
    let local_discr = session(&mut master).state.local_discr;
    let mut packet = remote_packet(State::Init, local_discr);
    packet.desired_min_tx = 1_000_000;
    packet.req_min_rx = 1_000_000;
    inject(&mut master, &packet).unwrap();

    let sess = session(&mut master);
    assert_eq!(sess.state.local_state, State::Up);
    // The configured Tx interval equals the slow interval, so no Poll
    // Sequence is running yet.
    assert!(!sess.poll_sequence_is_active());

    // Raising the Tx interval while Up must not take effect until the peer
    // acknowledges it.
    sess.set_desired_min_tx_interval(1_000_001);
    assert!(sess.poll_sequence_is_active());
    assert_eq!(sess.state.async_tx_interval, 1_000_000);
    assert_eq!(sess.state.pending_tx_interval, Some(1_000_001));

    // The peer acknowledges with the Final bit.
    let mut packet = remote_packet(State::Up, local_discr);
    packet.desired_min_tx = 1_000_000;
    packet.req_min_rx = 1_000_000;
    packet.flags.insert(PacketFlags::F);
    inject(&mut master, &packet).unwrap();

    let sess = session(&mut master);
    assert!(!sess.poll_sequence_is_active());
    assert_eq!(sess.state.async_tx_interval, 1_000_001);
    assert_eq!(sess.state.pending_tx_interval, None);
}

#[test]
fn test_poll_sequence_deferred_detect_time() {
    let (mut master, _rx) = setup(100_000, 1_000_000, false);

    let local_discr = bringup(&mut master);

    let sess = session(&mut master);
    assert_eq!(sess.async_detect_time(), Some(3_000_000));

    // Lowering the Rx interval while Up worsens the detection time from the
    // peer's point of view; the change is deferred.
    sess.set_required_min_rx_interval(10_000);
    assert!(sess.poll_sequence_is_active());
    assert_eq!(sess.async_detect_time(), Some(3_000_000));
    assert_eq!(sess.state.pending_detect_time, Some(150_000));

    let mut packet = remote_packet(State::Up, local_discr);
    packet.flags.insert(PacketFlags::F);
    inject(&mut master, &packet).unwrap();

    let sess = session(&mut master);
    assert!(!sess.poll_sequence_is_active());
    assert_eq!(sess.async_detect_time(), Some(150_000));
    assert_eq!(sess.state.pending_detect_time, None);
}

#[test]
fn test_immediate_rate_drop() {
    let (mut master, _rx) = setup(400_000, 1_000_000, false);

    let mut packet = remote_packet(State::Down, 0);
    packet.req_min_rx = 1_500_000;
    inject(&mut master, &packet).unwrap();
    let local_discr = session(&mut master).state.local_discr;
    let mut packet = remote_packet(State::Init, local_discr);
    packet.req_min_rx = 1_500_000;
    inject(&mut master, &packet).unwrap();

    let sess = session(&mut master);
    assert_eq!(sess.state.local_state, State::Up);
    assert_eq!(sess.desired_min_tx_interval(), 400_000);
    assert_eq!(sess.state.async_tx_interval, 1_500_000);

    // The remote lowered its Rx interval; the new rate applies immediately.
    sess.set_remote_min_rx_interval(900_000);
    assert_eq!(sess.remote_min_rx_interval(), 900_000);
    assert_eq!(sess.state.async_tx_interval, 900_000);
}

#[test]
fn test_passive_role_suppression() {
    let (mut master, _rx) = setup(100_000, 1_000_000, true);

    // A passive system must not transmit before learning the remote
    // discriminator.
    let sess = session(&mut master);
    assert!(sess.periodic_tx_suppressed());

    inject(&mut master, &remote_packet(State::Down, 0)).unwrap();

    let sess = session(&mut master);
    assert_eq!(sess.state.remote_discr, 42);
    assert!(!sess.periodic_tx_suppressed());
}

#[test]
fn test_remote_min_rx_zero_suppression() {
    let (mut master, _rx) = setup(100_000, 1_000_000, false);

    assert!(!session(&mut master).periodic_tx_suppressed());

    let mut packet = remote_packet(State::Down, 0);
    packet.req_min_rx = 0;
    inject(&mut master, &packet).unwrap();

    let sess = session(&mut master);
    assert_eq!(sess.negotiated_tx_interval(), None);
    assert!(sess.periodic_tx_suppressed());
}
