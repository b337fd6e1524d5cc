//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::sync::atomic;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc::Sender;
use tokio::time::sleep;

use crate::network;
use crate::packet::{PacketFlags, State};
use crate::session::Session;
use crate::socket::UdpSocket;
use crate::task::{SessionTask, Task};
use crate::tasks::messages::input::{DetectTimerMsg, UdpRxPacketMsg};

//
// BFD tasks diagram:
//
//                            +--------------+
//           udp_rx (1x) ->   |              | -> (Nx) udp_tx_interval
//  detection_timer (Nx) ->   |    master    | -> (Nx) udp_tx_final
//                            +--------------+
//

// BFD inter-task message types.
pub mod messages {
    // Input messages (child task -> main task).
    pub mod input {
        use std::net::IpAddr;

        use bytes::Bytes;
        use serde::{Deserialize, Serialize};

        use crate::session::SessionId;

        #[derive(Debug, Deserialize, Serialize)]
        pub struct UdpRxPacketMsg {
            pub src: IpAddr,
            pub bytes: Bytes,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct DetectTimerMsg {
            pub sess_id: SessionId,
        }
    }
}

// ===== BFD tasks =====

// UDP Rx task.
pub(crate) fn udp_rx(
    socket: UdpSocket,
    udp_packet_rxp: &Sender<UdpRxPacketMsg>,
) -> SessionTask {
    #[cfg(not(feature = "testing"))]
    {
        let socket = Arc::new(socket);
        let udp_packet_rxp = udp_packet_rxp.clone();
        SessionTask::spawn(async move {
            network::read_loop(socket, udp_packet_rxp).await;
        })
    }
    #[cfg(feature = "testing")]
    {
        SessionTask::stub()
    }
}

// Sends periodic BFD control packets.
pub(crate) fn udp_tx_interval(sess: &Session) -> SessionTask {
    #[cfg(not(feature = "testing"))]
    {
        let interval = sess.state.async_tx_interval;
        let local_multiplier = sess.config.local_multiplier;
        let packet = sess.generate_packet();
        let sockaddr = sess.state.sockaddr;

        // Clone reference-counted pointers.
        let socket = sess.state.socket_tx.clone();
        let poll_active = sess.state.poll_active.clone();
        let tx_packet_count = sess.statistics.tx_packet_count.clone();
        let tx_error_count = sess.statistics.tx_error_count.clone();

        // A system MUST NOT periodically transmit BFD Control packets if
        // Demand mode is active on the remote system (bfd.RemoteDemandMode is
        // 1, bfd.SessionState is Up, and bfd.RemoteSessionState is Up) and a
        // Poll Sequence is not being transmitted.
        let remote_demand = sess.state.remote_demand_mode
            && sess.state.local_state == State::Up
            && sess.state.remote_state == State::Up;

        SessionTask::spawn(async move {
            loop {
                // Update the P-bit as necessary.
                let poll = poll_active.load(atomic::Ordering::Relaxed);
                if poll || !remote_demand {
                    let mut packet = packet.clone();
                    if poll {
                        packet.flags.insert(PacketFlags::P);
                    }
                    network::send_packet(
                        socket.clone(),
                        sockaddr,
                        packet,
                        tx_packet_count.clone(),
                        tx_error_count.clone(),
                    )
                    .await;
                }

                // The periodic transmission of BFD Control packets MUST be
                // jittered on a per-packet basis by up to 25%. If
                // bfd.DetectMult is equal to 1, the interval between
                // transmitted packets MUST be no more than 90% and no less
                // than 75% of the negotiated transmission interval.
                let jitter = if local_multiplier == 1 {
                    rand::rng().random_range(0.75..0.90)
                } else {
                    1.0 - rand::rng().random_range(0.0..0.25)
                };
                let sleep_time = (interval as f64 * jitter) as u64;
                sleep(Duration::from_micros(sleep_time)).await;
            }
        })
    }
    #[cfg(feature = "testing")]
    {
        SessionTask::stub()
    }
}

// Sends single BFD control packet with the F-bit set.
pub(crate) fn udp_tx_final(sess: &Session) {
    #[cfg(not(feature = "testing"))]
    {
        // Generate packet with the F-bit set.
        let mut packet = sess.generate_packet();
        packet.flags.insert(PacketFlags::F);
        let sockaddr = sess.state.sockaddr;

        // Clone reference-counted pointers.
        let socket = sess.state.socket_tx.clone();
        let tx_packet_count = sess.statistics.tx_packet_count.clone();
        let tx_error_count = sess.statistics.tx_error_count.clone();

        // Send the packet asynchronously.
        let mut task = Task::spawn(async move {
            network::send_packet(
                socket,
                sockaddr,
                packet,
                tx_packet_count,
                tx_error_count,
            )
            .await;
        });
        task.detach();
    }
}

// BFD session detection timer.
//
// The detection deadline is polled roughly once per millisecond over the
// timestamps shared with the session. The master revalidates the expiry
// against the authoritative session state upon receiving the notification.
pub(crate) fn detection_timer(
    sess: &Session,
    detect_timerp: &Sender<DetectTimerMsg>,
) -> SessionTask {
    #[cfg(not(feature = "testing"))]
    {
        let sess_id = sess.id;
        let epoch = sess.state.epoch;
        let last_rx_time = sess.state.last_rx_time.clone();
        let detect_time = sess.state.detect_time.clone();
        let detect_timerp = detect_timerp.clone();

        SessionTask::spawn(async move {
            // Reception generation of the last notification, so the master
            // isn't flooded while no new packets arrive.
            let mut notified_rx = 0;

            loop {
                sleep(Duration::from_millis(1)).await;

                let detect_time =
                    detect_time.load(atomic::Ordering::Relaxed);
                let last_rx = last_rx_time.load(atomic::Ordering::Relaxed);
                if detect_time == 0 || last_rx == 0 || last_rx == notified_rx
                {
                    continue;
                }

                let elapsed = epoch.elapsed().as_micros() as u64;
                if elapsed.saturating_sub(last_rx) > detect_time {
                    notified_rx = last_rx;
                    let msg = DetectTimerMsg { sess_id };
                    if detect_timerp.send(msg).await.is_err() {
                        return;
                    }
                }
            }
        })
    }
    #[cfg(feature = "testing")]
    {
        SessionTask::stub()
    }
}
