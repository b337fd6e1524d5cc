//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::sync::atomic;

use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::{info, warn};

use crate::error::{Error, IoError};
use crate::session::{Session, SessionCfg, Sessions};
use crate::task::SessionTask;
use crate::tasks;
use crate::tasks::messages::input::{DetectTimerMsg, UdpRxPacketMsg};
use crate::{events, network};

// Daemon-wide configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub local: IpAddr,
    pub peers: Vec<IpAddr>,
    pub passive: bool,
    pub local_multiplier: u8,
    pub min_tx: u32,
    pub min_rx: u32,
}

#[derive(Debug)]
pub struct Master {
    // BFD sessions.
    pub sessions: Sessions,
    // Input channel endpoints shared with the session tasks.
    pub tx: InputChannelsTx,
    // UDP Rx task.
    _udp_rx_task: SessionTask,
}

#[derive(Clone, Debug)]
pub struct InputChannelsTx {
    // UDP Rx event.
    pub udp_packet_rx: Sender<UdpRxPacketMsg>,
    // Detection timer event.
    pub detect_timer: Sender<DetectTimerMsg>,
}

#[derive(Debug)]
pub struct InputChannelsRx {
    // UDP Rx event.
    pub udp_packet_rx: Receiver<UdpRxPacketMsg>,
    // Detection timer event.
    pub detect_timer: Receiver<DetectTimerMsg>,
}

// ===== impl Master =====

impl Master {
    // Creates the input channels connecting the session tasks to the master.
    pub fn channels() -> (InputChannelsTx, InputChannelsRx) {
        let (udp_packet_rxp, udp_packet_rxc) = mpsc::channel(4);
        let (detect_timerp, detect_timerc) = mpsc::channel(4);

        let tx = InputChannelsTx {
            udp_packet_rx: udp_packet_rxp,
            detect_timer: detect_timerp,
        };
        let rx = InputChannelsRx {
            udp_packet_rx: udp_packet_rxc,
            detect_timer: detect_timerc,
        };

        (tx, rx)
    }

    // Initializes the BFD master: binds the ingress socket and creates one
    // session per configured remote.
    pub fn new(config: Config, tx: InputChannelsTx) -> Result<Master, Error> {
        // Bind ingress socket and start receiving packets.
        let socket = network::socket_rx(config.local)
            .map_err(|error| Error::IoError(IoError::UdpSocketError(error)))?;
        let udp_rx_task = tasks::udp_rx(socket, &tx.udp_packet_rx);
        info!(
            local = %config.local,
            port = network::PORT_DST,
            "accepting BFD control traffic"
        );

        // Create sessions.
        let mut sessions = Sessions::default();
        for remote in &config.peers {
            let sess_cfg = SessionCfg {
                remote: *remote,
                passive: config.passive,
                local_multiplier: config.local_multiplier,
                min_tx: config.min_tx,
                min_rx: config.min_rx,
                auth_type: None,
            };
            let id = sessions.next_id();
            let sess =
                Session::new(id, sess_cfg, config.local, &tx.detect_timer)?;
            sessions.insert(sess);
        }

        Ok(Master {
            sessions,
            tx,
            _udp_rx_task: udp_rx_task,
        })
    }

    // Runs the master's main loop until an external shutdown signal arrives.
    pub async fn run(mut self, mut rx: InputChannelsRx) {
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                msg = rx.udp_packet_rx.recv() => {
                    let Some(msg) = msg else { break };
                    if let Err(error) =
                        events::process_udp_packet(&mut self, msg.src, &msg.bytes)
                    {
                        error.log();
                    }
                }
                msg = rx.detect_timer.recv() => {
                    let Some(msg) = msg else { break };
                    if let Err(error) =
                        events::process_detection_timer_expiry(&mut self, msg.sess_id)
                    {
                        error.log();
                    }
                }
                result = &mut shutdown => {
                    if let Err(error) = result {
                        warn!(%error, "failed to listen for the shutdown signal");
                    }
                    break;
                }
            }
        }

        // Log a final per-session summary before the tasks are torn down.
        for sess in self.sessions.iter() {
            info!(
                peer = %sess.config.remote,
                state = ?sess.state.local_state,
                rx_packets = sess.statistics.rx_packet_count,
                tx_packets = sess
                    .statistics
                    .tx_packet_count
                    .load(atomic::Ordering::Relaxed),
                down_count = sess.statistics.down_count,
                "session summary"
            );
        }
        info!("shutting down");
    }
}
