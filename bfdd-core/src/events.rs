//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use tracing::trace;

use crate::debug::Debug;
use crate::error::Error;
use crate::master::Master;
use crate::packet::{DiagnosticCode, Packet, PacketFlags, State};
use crate::session::{SLOW_TX_INTERVAL, Session, SessionId};

// ===== UDP packet receipt =====

pub fn process_udp_packet(
    master: &mut Master,
    src: IpAddr,
    data: &[u8],
) -> Result<(), Error> {
    // Decode the packet, discarding malformed ones.
    let packet =
        Packet::decode(data).map_err(Error::UdpPacketDecodeError)?;

    trace!(source = %src, ?packet, "received packet");

    // If the Your Discriminator field is nonzero, it MUST be used to select
    // the session with which this packet is associated; otherwise the
    // session is selected based on the source address. If no session is
    // found, the packet MUST be discarded - sessions are never created on
    // demand.
    let Some((_, sess)) = (match packet.your_discr {
        0 => master.sessions.get_mut_by_addr(&src),
        _ => master.sessions.get_mut_by_discr(packet.your_discr),
    }) else {
        return Err(Error::SessionNoMatch(src, packet.your_discr));
    };

    process_session_packet(sess, src, packet)
}

// Applies the reception rules of RFC 5880, section 6.8.6, to a packet
// dispatched to the given session.
fn process_session_packet(
    sess: &mut Session,
    src: IpAddr,
    packet: Packet,
) -> Result<(), Error> {
    // Update packet counter.
    sess.statistics.rx_packet_count += 1;

    // If the A bit is set and no authentication is in use (bfd.AuthType is
    // zero), or the A bit is clear and authentication is in use, the packet
    // MUST be discarded. Authenticated operation itself isn't supported.
    match (packet.flags.contains(PacketFlags::A), sess.config.auth_type) {
        (false, None) => {}
        (true, Some(_)) => {
            sess.statistics.rx_error_count += 1;
            return Err(Error::AuthUnsupported(src));
        }
        _ => {
            sess.statistics.rx_error_count += 1;
            return Err(Error::AuthMismatch(src));
        }
    }

    // Update the remote state variables unconditionally, each through its
    // setter so that timer recomputations take place.
    let old_remote_discr = sess.state.remote_discr;
    let old_remote_state = sess.state.remote_state;
    let old_remote_demand = sess.state.remote_demand_mode;
    sess.state.remote_discr = packet.my_discr;
    sess.state.remote_state = packet.state;
    sess.state.remote_demand_mode = packet.flags.contains(PacketFlags::D);
    sess.set_remote_min_rx_interval(packet.req_min_rx);
    sess.set_remote_multiplier(packet.detect_mult);
    sess.set_remote_min_tx_interval(packet.desired_min_tx);

    // Resynchronize the Tx task if any of its other inputs changed.
    if sess.state.remote_discr != old_remote_discr
        || sess.state.remote_state != old_remote_state
        || sess.state.remote_demand_mode != old_remote_demand
    {
        sess.update_tx_task();
    }

    // Invoke the FSM (RFC 5880, section 6.8.6).
    if sess.state.local_state == State::AdminDown {
        // Silently discard the packet.
        return Err(Error::AdminDownViolation(src));
    }
    match (sess.state.local_state, packet.state) {
        (State::Init | State::Up, State::AdminDown) => {
            sess.state_update(State::Down, DiagnosticCode::NbrDown);
            sess.set_desired_min_tx_interval(SLOW_TX_INTERVAL);
        }
        (State::Down, State::Down) => {
            sess.state_update(State::Init, DiagnosticCode::Nothing);
        }
        (State::Down, State::Init) | (State::Init, State::Init | State::Up) => {
            sess.state_update(State::Up, DiagnosticCode::Nothing);
            // Fast probing may resume now that the session is Up.
            sess.set_desired_min_tx_interval(sess.config.min_tx);
        }
        (State::Up, State::Down) => {
            sess.state_update(State::Down, DiagnosticCode::NbrDown);
            sess.set_desired_min_tx_interval(SLOW_TX_INTERVAL);
        }
        _ => {}
    }

    // If the Poll (P) bit is set, send a BFD Control packet to the remote
    // system with the Poll (P) bit clear, and the Final (F) bit set.
    if packet.flags.contains(PacketFlags::P) {
        sess.send_tx_final();
    }

    // If a Poll Sequence is being transmitted by the local system and the
    // Final (F) bit in the received packet is set, the Poll Sequence MUST be
    // terminated.
    if packet.flags.contains(PacketFlags::F) && sess.poll_sequence_is_active()
    {
        sess.poll_sequence_terminate();
    }

    // Set the time a packet was received to right now.
    sess.mark_last_rx_time();

    Ok(())
}

// ===== detection timer expiry =====

pub fn process_detection_timer_expiry(
    master: &mut Master,
    sess_id: SessionId,
) -> Result<(), Error> {
    let (_, sess) = master.sessions.get_mut_by_id(sess_id)?;

    // The detection poller runs off shared timestamps; revalidate against
    // the authoritative session state, as a packet might have been processed
    // after the notification was sent.
    if sess.state.demand_mode
        || !matches!(sess.state.local_state, State::Init | State::Up)
        || !sess.detection_time_expired()
    {
        return Ok(());
    }

    Debug::DetectionTimeExpiry(&sess.config.remote).log();

    // A period of time equal to the Detection Time has passed without
    // receiving a BFD Control packet: the local system MUST set
    // bfd.SessionState to Down and bfd.LocalDiag to 1 (Control Detection
    // Time Expired).
    sess.state_update(State::Down, DiagnosticCode::TimeExpired);
    sess.set_desired_min_tx_interval(SLOW_TX_INTERVAL);

    Ok(())
}
