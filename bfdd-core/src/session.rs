//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{self, AtomicBool, AtomicU64};
use std::time::Instant;

use chrono::{DateTime, Utc};
use generational_arena::{Arena, Index};
use rand::RngCore;
use tokio::sync::mpsc::Sender;
use tracing::error;

use crate::debug::Debug;
use crate::error::{Error, IoError};
use crate::network;
use crate::packet::{
    AuthenticationType, DiagnosticCode, Packet, PacketFlags, State,
};
use crate::socket::UdpSocket;
use crate::task::SessionTask;
use crate::tasks;
use crate::tasks::messages::input::DetectTimerMsg;

// The slow Tx interval is used to conserve bandwidth when the session is not
// up.
pub const SLOW_TX_INTERVAL: u32 = 1000000;

pub type SessionId = usize;
pub type SessionIndex = Index;

// BFD session configuration.
#[derive(Clone, Copy, Debug)]
pub struct SessionCfg {
    pub remote: IpAddr,
    pub passive: bool,
    pub local_multiplier: u8,
    pub min_tx: u32,
    pub min_rx: u32,
    pub auth_type: Option<AuthenticationType>,
}

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub config: SessionCfg,
    pub state: SessionState,
    pub statistics: SessionStatistics,
}

#[derive(Debug)]
pub struct SessionState {
    pub socket_tx: Arc<UdpSocket>,
    pub sockaddr: SocketAddr,
    pub local_state: State,
    pub remote_state: State,
    pub local_discr: u32,
    pub remote_discr: u32,
    pub local_diag: DiagnosticCode,
    pub demand_mode: bool,
    pub remote_demand_mode: bool,
    // Actual transmission interval currently in use.
    pub async_tx_interval: u32,
    // Deferred timer changes, applied when the Poll Sequence terminates.
    pub pending_tx_interval: Option<u32>,
    pub pending_detect_time: Option<u64>,
    // State shared with the session tasks.
    pub poll_active: Arc<AtomicBool>,
    pub epoch: Instant,
    pub last_rx_time: Arc<AtomicU64>,
    pub detect_time: Arc<AtomicU64>,
    // RFC 5880 state variables, updated through the guarded setters only.
    desired_min_tx: u32,
    required_min_rx: u32,
    remote_min_rx: u32,
    remote_min_tx: Option<u32>,
    remote_multiplier: Option<u8>,
    // Task handles.
    tx_task: Option<SessionTask>,
    _detection_task: Option<SessionTask>,
}

#[derive(Debug)]
pub struct SessionStatistics {
    pub create_time: DateTime<Utc>,
    pub last_state_change_time: Option<DateTime<Utc>>,
    pub last_down_time: Option<DateTime<Utc>>,
    pub last_up_time: Option<DateTime<Utc>>,
    pub down_count: u32,
    pub admin_down_count: u32,
    pub rx_packet_count: u64,
    pub rx_error_count: u64,
    pub tx_packet_count: Arc<AtomicU64>,
    pub tx_error_count: Arc<AtomicU64>,
}

#[derive(Debug, Default)]
pub struct Sessions {
    // Session arena.
    arena: Arena<Session>,
    // Session hash table keyed by ID (1:1).
    id_tree: HashMap<SessionId, SessionIndex>,
    // Session hash table keyed by local discriminator (1:1).
    discr_tree: HashMap<u32, SessionIndex>,
    // Session hash table keyed by remote address (1:1).
    addr_tree: HashMap<IpAddr, SessionIndex>,
    // Next available ID.
    next_id: SessionId,
}

// ===== impl Session =====

impl Session {
    // Creates a new BFD session, binding its egress socket and starting its
    // tasks.
    pub(crate) fn new(
        id: SessionId,
        config: SessionCfg,
        local: IpAddr,
        detect_timerp: &Sender<DetectTimerMsg>,
    ) -> Result<Session, Error> {
        let socket_tx = network::socket_tx(local)
            .map_err(|error| Error::IoError(IoError::UdpSocketError(error)))?;
        let sockaddr = SocketAddr::new(config.remote, network::PORT_DST);

        Debug::SessionCreate(&config.remote).log();

        let mut sess = Session {
            id,
            config,
            state: SessionState {
                socket_tx: Arc::new(socket_tx),
                sockaddr,
                local_state: State::Down,
                remote_state: State::Down,
                local_discr: random_discriminator(),
                remote_discr: 0,
                local_diag: DiagnosticCode::Nothing,
                demand_mode: false,
                remote_demand_mode: false,
                async_tx_interval: SLOW_TX_INTERVAL,
                pending_tx_interval: None,
                pending_detect_time: None,
                poll_active: Arc::new(AtomicBool::new(false)),
                epoch: Instant::now(),
                last_rx_time: Arc::new(AtomicU64::new(0)),
                detect_time: Arc::new(AtomicU64::new(0)),
                desired_min_tx: SLOW_TX_INTERVAL,
                required_min_rx: config.min_rx,
                remote_min_rx: 1,
                remote_min_tx: None,
                remote_multiplier: None,
                tx_task: None,
                _detection_task: None,
            },
            statistics: Default::default(),
        };

        sess.update_tx_task();
        sess.state._detection_task =
            Some(tasks::detection_timer(&sess, detect_timerp));

        Ok(sess)
    }

    // bfd.DesiredMinTxInterval.
    pub fn desired_min_tx_interval(&self) -> u32 {
        self.state.desired_min_tx
    }

    // bfd.RequiredMinRxInterval.
    pub fn required_min_rx_interval(&self) -> u32 {
        self.state.required_min_rx
    }

    // bfd.RemoteMinRxInterval.
    pub fn remote_min_rx_interval(&self) -> u32 {
        self.state.remote_min_rx
    }

    // Last received Desired Min TX Interval, if any.
    pub fn remote_min_tx_interval(&self) -> Option<u32> {
        self.state.remote_min_tx
    }

    // Last received Detect Mult, if any.
    pub fn remote_multiplier(&self) -> Option<u8> {
        self.state.remote_multiplier
    }

    // Current detection deadline, when it can be computed.
    pub fn async_detect_time(&self) -> Option<u64> {
        match self.state.detect_time.load(atomic::Ordering::Relaxed) {
            0 => None,
            detect_time => Some(detect_time),
        }
    }

    // Time of the last valid packet reception, in microseconds since the
    // session epoch.
    pub fn last_rx_time(&self) -> Option<u64> {
        match self.state.last_rx_time.load(atomic::Ordering::Relaxed) {
            0 => None,
            last_rx => Some(last_rx),
        }
    }

    // Updates bfd.DesiredMinTxInterval.
    //
    // The transmit interval MUST be recalculated whenever
    // bfd.DesiredMinTxInterval changes, and is equal to the greater of that
    // value and bfd.RemoteMinRxInterval. A Poll Sequence MUST be initiated.
    // If bfd.DesiredMinTxInterval is increased and bfd.SessionState is Up,
    // the actual transmission interval MUST NOT change until the Poll
    // Sequence has terminated.
    pub fn set_desired_min_tx_interval(&mut self, value: u32) {
        if value == self.state.desired_min_tx {
            return;
        }

        let tx_interval = std::cmp::max(value, self.state.remote_min_rx);
        if value > self.state.desired_min_tx
            && self.state.local_state == State::Up
        {
            Debug::TxIntervalDefer(&self.config.remote, tx_interval).log();
            self.state.pending_tx_interval = Some(tx_interval);
        } else {
            Debug::TxIntervalUpdate(&self.config.remote, tx_interval).log();
            self.state.pending_tx_interval = None;
            self.state.async_tx_interval = tx_interval;
        }
        self.state.desired_min_tx = value;
        self.poll_sequence_start();
        self.update_tx_task();
    }

    // Updates bfd.RequiredMinRxInterval.
    //
    // A Poll Sequence MUST be initiated. If the value is reduced and
    // bfd.SessionState is Up, the previous value must be used when
    // calculating the Detection Time until the Poll Sequence has terminated.
    pub fn set_required_min_rx_interval(&mut self, value: u32) {
        if value == self.state.required_min_rx {
            return;
        }

        let detect_time = calc_detect_time(
            self.state.remote_multiplier,
            value,
            self.state.remote_min_tx,
        );
        if value < self.state.required_min_rx
            && self.state.local_state == State::Up
        {
            Debug::DetectTimeDefer(&self.config.remote, detect_time).log();
            self.state.pending_detect_time = detect_time;
        } else {
            self.state.pending_detect_time = None;
            self.set_detect_time(detect_time);
        }
        self.state.required_min_rx = value;
        self.poll_sequence_start();
        self.update_tx_task();
    }

    // Updates bfd.RemoteMinRxInterval.
    //
    // If the local system reduces its transmit interval due to the remote
    // system advertising a reduced Required Min RX Interval, the new
    // interval MUST be honored immediately.
    pub fn set_remote_min_rx_interval(&mut self, value: u32) {
        if value == self.state.remote_min_rx {
            return;
        }

        self.state.remote_min_rx = value;
        let tx_interval = std::cmp::max(value, self.state.desired_min_tx);
        if tx_interval < self.state.async_tx_interval {
            Debug::RemoteRateDrop(&self.config.remote, tx_interval).log();
            self.state.pending_tx_interval = None;
            self.state.async_tx_interval = tx_interval;
        } else if self.state.pending_tx_interval.is_some() {
            // A raise is being negotiated; retarget it and keep the current
            // interval untouched until the Poll Sequence terminates.
            self.state.pending_tx_interval = Some(tx_interval);
        } else {
            self.state.async_tx_interval = tx_interval;
        }
        self.update_tx_task();
    }

    // Updates the last received Desired Min TX Interval.
    pub fn set_remote_min_tx_interval(&mut self, value: u32) {
        if self.state.remote_min_tx == Some(value) {
            return;
        }

        self.state.remote_min_tx = Some(value);
        let detect_time = calc_detect_time(
            self.state.remote_multiplier,
            self.state.required_min_rx,
            Some(value),
        );
        self.set_detect_time(detect_time);
    }

    // Updates the last received Detect Mult.
    pub fn set_remote_multiplier(&mut self, value: u8) {
        if self.state.remote_multiplier == Some(value) {
            return;
        }

        self.state.remote_multiplier = Some(value);
        let detect_time = calc_detect_time(
            Some(value),
            self.state.required_min_rx,
            self.state.remote_min_tx,
        );
        self.set_detect_time(detect_time);
    }

    fn set_detect_time(&mut self, detect_time: Option<u64>) {
        Debug::DetectTimeUpdate(&self.config.remote, detect_time).log();
        self.state
            .detect_time
            .store(detect_time.unwrap_or(0), atomic::Ordering::Relaxed);
    }

    // Returns the negotiated Tx interval for the session.
    //
    // A system MUST NOT periodically transmit BFD Control packets if
    // bfd.RemoteMinRxInterval is zero.
    pub fn negotiated_tx_interval(&self) -> Option<u32> {
        if self.state.remote_min_rx == 0 {
            return None;
        }

        Some(self.state.async_tx_interval)
    }

    // Returns whether periodic transmission is suppressed entirely.
    //
    // A system MUST NOT transmit BFD Control packets if bfd.RemoteDiscr is
    // zero and the system is taking the Passive role.
    pub fn periodic_tx_suppressed(&self) -> bool {
        (self.state.remote_discr == 0 && self.config.passive)
            || self.negotiated_tx_interval().is_none()
    }

    // Generates a BFD Control packet from the session's state.
    pub fn generate_packet(&self) -> Packet {
        let mut flags = PacketFlags::empty();

        // A system MUST NOT set the Demand (D) bit unless bfd.DemandMode is
        // 1, bfd.SessionState is Up, and bfd.RemoteSessionState is Up.
        if self.state.demand_mode
            && self.state.local_state == State::Up
            && self.state.remote_state == State::Up
        {
            flags.insert(PacketFlags::D);
        }
        if self.config.auth_type.is_some() {
            flags.insert(PacketFlags::A);
        }

        Packet {
            version: 1,
            diag: self.state.local_diag as u8,
            state: self.state.local_state,
            flags,
            detect_mult: self.config.local_multiplier,
            my_discr: self.state.local_discr,
            your_discr: self.state.remote_discr,
            desired_min_tx: self.state.desired_min_tx,
            req_min_rx: self.state.required_min_rx,
            req_min_echo_rx: 0,
        }
    }

    // (Re)starts or stops the periodic transmission of BFD packets.
    //
    // Restarting is synchronous with respect to the caller: the previous
    // task is canceled before this function returns.
    pub(crate) fn update_tx_task(&mut self) {
        if self.periodic_tx_suppressed() {
            self.state.tx_task = None;
        } else {
            self.state.tx_task = Some(tasks::udp_tx_interval(self));
        }
    }

    // Sends a single BFD control packet with the F-bit set.
    pub(crate) fn send_tx_final(&self) {
        tasks::udp_tx_final(self);
    }

    // Initiates a Poll Sequence.
    pub(crate) fn poll_sequence_start(&self) {
        if !self.poll_sequence_is_active() {
            Debug::PollSequenceStart(&self.config.remote).log();
        }
        self.state.poll_active.store(true, atomic::Ordering::Relaxed);
    }

    // Terminates a Poll Sequence.
    //
    // The peer is aware of the updated timer values, so any deferred changes
    // can now effectively be used.
    pub(crate) fn poll_sequence_terminate(&mut self) {
        Debug::PollSequenceEnd(&self.config.remote).log();
        self.state.poll_active.store(false, atomic::Ordering::Relaxed);

        if let Some(tx_interval) = self.state.pending_tx_interval.take() {
            Debug::TxIntervalUpdate(&self.config.remote, tx_interval).log();
            self.state.async_tx_interval = tx_interval;
            self.update_tx_task();
        }
        if let Some(detect_time) = self.state.pending_detect_time.take() {
            self.set_detect_time(Some(detect_time));
        }
    }

    // Checks whether a Poll Sequence is in progress.
    pub fn poll_sequence_is_active(&self) -> bool {
        self.state.poll_active.load(atomic::Ordering::Relaxed)
    }

    // Updates the FSM state of the BFD session.
    pub(crate) fn state_update(&mut self, state: State, diag: DiagnosticCode) {
        let old_state = self.state.local_state;
        if old_state == state {
            return;
        }

        self.state.local_state = state;
        self.state.local_diag = diag;

        // Session state changes must be visible at the default log level.
        error!(
            peer = %self.config.remote,
            ?old_state,
            new_state = ?state,
            "session state change"
        );

        // Update statistics.
        self.statistics.last_state_change_time = Some(Utc::now());
        match state {
            State::AdminDown => {
                self.statistics.admin_down_count += 1;
            }
            State::Down => {
                self.statistics.last_down_time = Some(Utc::now());
                self.statistics.down_count += 1;
            }
            State::Up => {
                self.statistics.last_up_time = Some(Utc::now());
            }
            _ => {}
        }

        // Synchronize the Tx task since the advertised state has changed.
        self.update_tx_task();
    }

    // Records the reception time of a valid packet.
    pub(crate) fn mark_last_rx_time(&self) {
        // Zero is reserved to mean "no packet received yet".
        let elapsed = self.state.epoch.elapsed().as_micros() as u64;
        self.state
            .last_rx_time
            .store(elapsed.max(1), atomic::Ordering::Relaxed);
    }

    // Returns whether the Detection Time has expired without a packet being
    // received.
    pub(crate) fn detection_time_expired(&self) -> bool {
        let Some(detect_time) = self.async_detect_time() else {
            return false;
        };
        let Some(last_rx) = self.last_rx_time() else {
            return false;
        };

        let elapsed = self.state.epoch.elapsed().as_micros() as u64;
        elapsed.saturating_sub(last_rx) > detect_time
    }
}

// ===== impl SessionStatistics =====

impl Default for SessionStatistics {
    fn default() -> SessionStatistics {
        SessionStatistics {
            create_time: Utc::now(),
            last_state_change_time: None,
            last_down_time: None,
            last_up_time: None,
            down_count: 0,
            admin_down_count: 0,
            rx_packet_count: 0,
            rx_error_count: 0,
            tx_packet_count: Arc::new(AtomicU64::new(0)),
            tx_error_count: Arc::new(AtomicU64::new(0)),
        }
    }
}

// ===== impl Sessions =====

impl Sessions {
    // Inserts a session, linking it to the lookup tables.
    pub(crate) fn insert(&mut self, sess: Session) -> SessionIndex {
        let sess_id = sess.id;
        let local_discr = sess.state.local_discr;
        let remote = sess.config.remote;

        let sess_idx = self.arena.insert(sess);
        self.id_tree.insert(sess_id, sess_idx);
        self.discr_tree.insert(local_discr, sess_idx);
        self.addr_tree.insert(remote, sess_idx);
        sess_idx
    }

    // Returns a mutable reference to the session corresponding to the given
    // ID.
    pub fn get_mut_by_id(
        &mut self,
        id: SessionId,
    ) -> Result<(SessionIndex, &mut Session), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(move |sess_idx| (sess_idx, &mut self.arena[sess_idx]))
            .ok_or(Error::SessionIdNotFound(id))
    }

    // Returns a mutable reference to the session corresponding to the given
    // local discriminator.
    pub fn get_mut_by_discr(
        &mut self,
        discr: u32,
    ) -> Option<(SessionIndex, &mut Session)> {
        self.discr_tree
            .get(&discr)
            .copied()
            .map(move |sess_idx| (sess_idx, &mut self.arena[sess_idx]))
    }

    // Returns a mutable reference to the session corresponding to the given
    // remote address.
    pub fn get_mut_by_addr(
        &mut self,
        addr: &IpAddr,
    ) -> Option<(SessionIndex, &mut Session)> {
        self.addr_tree
            .get(addr)
            .copied()
            .map(move |sess_idx| (sess_idx, &mut self.arena[sess_idx]))
    }

    // Returns an iterator visiting all sessions.
    pub fn iter(&self) -> impl Iterator<Item = &'_ Session> + '_ {
        self.arena.iter().map(|(_, sess)| sess)
    }

    // Get next session ID.
    pub(crate) fn next_id(&mut self) -> SessionId {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }
}

impl std::ops::Index<SessionIndex> for Sessions {
    type Output = Session;

    fn index(&self, index: SessionIndex) -> &Self::Output {
        &self.arena[index]
    }
}

impl std::ops::IndexMut<SessionIndex> for Sessions {
    fn index_mut(&mut self, index: SessionIndex) -> &mut Self::Output {
        &mut self.arena[index]
    }
}

// ===== global functions =====

// Calculates the Detection Time (RFC 5880, section 6.8.4).
//
// In Asynchronous mode, the Detection Time calculated in the local system is
// equal to the value of Detect Mult received from the remote system,
// multiplied by the agreed transmit interval of the remote system (the
// greater of bfd.RequiredMinRxInterval and the last received Desired Min TX
// Interval).
fn calc_detect_time(
    multiplier: Option<u8>,
    rx_interval: u32,
    tx_interval: Option<u32>,
) -> Option<u64> {
    let multiplier = multiplier?;
    let tx_interval = tx_interval?;
    if multiplier == 0 || rx_interval == 0 || tx_interval == 0 {
        return None;
    }

    Some(multiplier as u64 * std::cmp::max(rx_interval, tx_interval) as u64)
}

// Generates a random nonzero discriminator.
fn random_discriminator() -> u32 {
    loop {
        let discr = rand::rng().next_u32();
        if discr != 0 {
            return discr;
        }
    }
}
