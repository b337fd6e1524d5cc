//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{self, AtomicU64};

use bytes::Bytes;
use rand::Rng;
use tokio::sync::mpsc::Sender;

use crate::error::{Error, IoError};
use crate::packet::Packet;
use crate::socket::{
    AddressFamily, SocketExt, TTL_MAX, UdpSocket, UdpSocketExt,
};
use crate::tasks::messages::input::UdpRxPacketMsg;

// UDP destination port for single-hop BFD control packets (RFC 5881).
pub const PORT_DST: u16 = 3784;
// Valid source port range for BFD control packets (RFC 5881).
pub const PORT_SRC_RANGE: std::ops::RangeInclusive<u16> = 49152..=65535;
// Attempts at binding a random source port before giving up.
const PORT_SRC_ATTEMPTS: usize = 10;

pub(crate) fn socket_rx(local: IpAddr) -> Result<UdpSocket, std::io::Error> {
    #[cfg(not(feature = "testing"))]
    {
        // Create ingress socket.
        let sockaddr = SocketAddr::from((local, PORT_DST));
        let socket = UdpSocket::bind_reuseaddr(sockaddr)?;

        // Set socket options.
        //
        // RFC 5881 - Section 5: "All received BFD Control packets that are
        // demultiplexed to the session MUST be discarded if the received TTL
        // or Hop Limit is not equal to 255".
        match AddressFamily::of(&local) {
            AddressFamily::Ipv4 => {
                socket.set_ipv4_minttl(TTL_MAX)?;
            }
            AddressFamily::Ipv6 => {
                socket.set_ipv6_min_hopcount(TTL_MAX)?;
            }
        }

        Ok(socket)
    }
    #[cfg(feature = "testing")]
    {
        Ok(UdpSocket {})
    }
}

pub(crate) fn socket_tx(local: IpAddr) -> Result<UdpSocket, std::io::Error> {
    #[cfg(not(feature = "testing"))]
    {
        // Create egress socket.
        //
        // RFC 5881 says the following:
        // "The source port MUST be in the range 49152 through 65535.  The same
        // UDP source port number MUST be used for all BFD Control packets
        // associated with a particular session.  The source port number SHOULD
        // be unique among all BFD sessions on the system".
        //
        // Pick a random port within the valid range, retrying a bounded number
        // of times in case another socket already grabbed it.
        let mut last_error = None;
        for _ in 0..PORT_SRC_ATTEMPTS {
            let port = rand::rng().random_range(PORT_SRC_RANGE);
            let sockaddr = SocketAddr::from((local, port));
            match UdpSocket::bind_reuseaddr(sockaddr) {
                Ok(socket) => {
                    // Set socket options.
                    //
                    // RFC 5881 - Section 5: "The BFD Control packet MUST be
                    // transmitted with a TTL or Hop Limit of 255" (GTSM).
                    match AddressFamily::of(&local) {
                        AddressFamily::Ipv4 => {
                            socket.set_ipv4_tos(
                                libc::IPTOS_PREC_INTERNETCONTROL,
                            )?;
                            socket.set_ipv4_ttl(TTL_MAX)?;
                        }
                        AddressFamily::Ipv6 => {
                            socket.set_ipv6_tclass(
                                libc::IPTOS_PREC_INTERNETCONTROL,
                            )?;
                            socket.set_ipv6_unicast_hops(TTL_MAX)?;
                        }
                    }
                    return Ok(socket);
                }
                Err(error)
                    if error.kind() == std::io::ErrorKind::AddrInUse =>
                {
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            std::io::Error::from(std::io::ErrorKind::AddrInUse)
        }))
    }
    #[cfg(feature = "testing")]
    {
        Ok(UdpSocket {})
    }
}

#[cfg(not(feature = "testing"))]
pub(crate) async fn send_packet(
    socket: Arc<UdpSocket>,
    sockaddr: SocketAddr,
    packet: Packet,
    tx_packet_count: Arc<AtomicU64>,
    tx_error_count: Arc<AtomicU64>,
) {
    // Encode packet.
    let buf = packet.encode();

    // Send packet.
    match socket.send_to(&buf, sockaddr).await {
        Ok(_) => {
            tx_packet_count.fetch_add(1, atomic::Ordering::Relaxed);
        }
        Err(error) => {
            IoError::UdpSendError(error).log();
            tx_error_count.fetch_add(1, atomic::Ordering::Relaxed);
        }
    }
}

#[cfg(not(feature = "testing"))]
pub(crate) async fn read_loop(
    socket: Arc<UdpSocket>,
    udp_packet_rxp: Sender<UdpRxPacketMsg>,
) {
    let mut buf = [0; 1024];

    loop {
        // Receive data from the network.
        match socket.recv_from(&mut buf).await {
            Ok((num_bytes, src)) => {
                // Validate packet's source address.
                let src = src.ip();
                if src.is_unspecified() || src.is_multicast() {
                    Error::UdpInvalidSourceAddr(src).log();
                    continue;
                }

                // Notify the BFD main task about the received datagram.
                let msg = UdpRxPacketMsg {
                    src,
                    bytes: Bytes::copy_from_slice(&buf[..num_bytes]),
                };
                if udp_packet_rxp.send(msg).await.is_err() {
                    // The main task is gone, stop receiving.
                    return;
                }
            }
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {
                // Retry if the syscall was interrupted (EINTR).
                continue;
            }
            Err(error) => {
                IoError::UdpRecvError(error).log();
            }
        }
    }
}
