//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use tracing::{debug, debug_span};

// BFD debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    SessionCreate(&'a IpAddr),
    PollSequenceStart(&'a IpAddr),
    PollSequenceEnd(&'a IpAddr),
    TxIntervalUpdate(&'a IpAddr, u32),
    TxIntervalDefer(&'a IpAddr, u32),
    DetectTimeUpdate(&'a IpAddr, Option<u64>),
    DetectTimeDefer(&'a IpAddr, Option<u64>),
    RemoteRateDrop(&'a IpAddr, u32),
    DetectionTimeExpiry(&'a IpAddr),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::SessionCreate(peer)
            | Debug::PollSequenceStart(peer)
            | Debug::PollSequenceEnd(peer)
            | Debug::DetectionTimeExpiry(peer) => {
                debug_span!("session", %peer).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::TxIntervalUpdate(peer, interval)
            | Debug::TxIntervalDefer(peer, interval)
            | Debug::RemoteRateDrop(peer, interval) => {
                debug_span!("session", %peer).in_scope(|| {
                    debug!(%interval, "{}", self);
                });
            }
            Debug::DetectTimeUpdate(peer, detect_time)
            | Debug::DetectTimeDefer(peer, detect_time) => {
                debug_span!("session", %peer).in_scope(|| {
                    debug!(?detect_time, "{}", self);
                });
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::SessionCreate(..) => {
                write!(f, "session created")
            }
            Debug::PollSequenceStart(..) => {
                write!(f, "poll sequence started")
            }
            Debug::PollSequenceEnd(..) => {
                write!(f, "poll sequence terminated")
            }
            Debug::TxIntervalUpdate(..) => {
                write!(f, "transmission interval updated")
            }
            Debug::TxIntervalDefer(..) => {
                write!(f, "transmission interval raise deferred")
            }
            Debug::DetectTimeUpdate(..) => {
                write!(f, "detection time updated")
            }
            Debug::DetectTimeDefer(..) => {
                write!(f, "detection time change deferred")
            }
            Debug::RemoteRateDrop(..) => {
                write!(f, "remote lowered the transmission interval")
            }
            Debug::DetectionTimeExpiry(..) => {
                write!(f, "detection timer expired")
            }
        }
    }
}
