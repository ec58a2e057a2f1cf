//! Heartbeat liveness protocol (ISO 11783-7 §8): a monotonic sequence number
//! the sender cycles through, and a receiver state machine that turns gaps
//! and silence in that sequence into a health signal.

use alloc::vec::Vec;

use crate::common::{HEARTBEAT_COMM_ERROR_TIMEOUT_MS, HEARTBEAT_INTERVAL_MS, HEARTBEAT_MAX_JUMP, HEARTBEAT_RECOVERY_COUNT};
use crate::event::Event;
use crate::frame::{Frame, Message};
use crate::pgn::PGN_HEARTBEAT;
use crate::types::{Address, Priority, BROADCAST_ADDRESS};

mod hb_seq {
    pub const INIT: u8 = 251;
    pub const RESERVED_LOW: u8 = 252;
    pub const RESERVED_HIGH: u8 = 253;
    pub const SENDER_ERROR: u8 = 254;
    pub const SHUTDOWN: u8 = 255;
    pub const MAX_NORMAL: u8 = 250;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HbReceiverState {
    Normal,
    SequenceError,
    CommError,
}

/// Produces the ISO-mandated sequence: 251 once, then 0..250 wrapping, with
/// 254/255 as one-shot injections that fall back to the 0..250 cycle.
pub struct HeartbeatSender {
    sequence: u8,
    init_sent: bool,
    special_pending: bool,
    timer_ms: u32,
}

impl Default for HeartbeatSender {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatSender {
    pub fn new() -> Self {
        HeartbeatSender { sequence: hb_seq::INIT, init_sent: false, special_pending: false, timer_ms: 0 }
    }

    pub fn next_sequence(&mut self) -> u8 {
        if !self.init_sent {
            self.init_sent = true;
            self.sequence = hb_seq::INIT;
            return hb_seq::INIT;
        }
        if self.special_pending {
            self.special_pending = false;
            return self.sequence;
        }
        self.sequence = if self.sequence >= hb_seq::INIT {
            0
        } else if self.sequence >= hb_seq::MAX_NORMAL {
            0
        } else {
            self.sequence + 1
        };
        self.sequence
    }

    pub fn signal_error(&mut self) {
        self.sequence = hb_seq::SENDER_ERROR;
        self.special_pending = true;
    }

    pub fn signal_shutdown(&mut self) {
        self.sequence = hb_seq::SHUTDOWN;
        self.special_pending = true;
    }

    /// Returns true once `elapsed_ms` has accumulated past the interval.
    pub fn update(&mut self, elapsed_ms: u32, interval_ms: u32) -> bool {
        self.timer_ms += elapsed_ms;
        if self.timer_ms >= interval_ms {
            self.timer_ms -= interval_ms;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.sequence = hb_seq::INIT;
        self.init_sent = false;
        self.special_pending = false;
        self.timer_ms = 0;
    }
}

/// Tracks one remote source's sequence and turns gaps/silence into state.
pub struct HeartbeatReceiver {
    state: HbReceiverState,
    last_sequence: u8,
    recovery_counter: u8,
    time_since_last_ms: u32,
    first_received: bool,
    pub on_state_change: Event<(HbReceiverState, HbReceiverState)>,
    pub on_shutdown_received: Event<()>,
    pub on_sender_error: Event<()>,
    pub on_reset_received: Event<()>,
}

impl Default for HeartbeatReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatReceiver {
    pub fn new() -> Self {
        HeartbeatReceiver {
            state: HbReceiverState::Normal,
            last_sequence: 0xFF,
            recovery_counter: 0,
            time_since_last_ms: 0,
            first_received: false,
            on_state_change: Event::new(),
            on_shutdown_received: Event::new(),
            on_sender_error: Event::new(),
            on_reset_received: Event::new(),
        }
    }

    pub fn state(&self) -> HbReceiverState {
        self.state
    }

    pub fn is_healthy(&self) -> bool {
        self.state == HbReceiverState::Normal
    }

    pub fn process(&mut self, sequence: u8) {
        self.time_since_last_ms = 0;

        if sequence == hb_seq::RESERVED_LOW || sequence == hb_seq::RESERVED_HIGH {
            return;
        }
        if sequence == hb_seq::SENDER_ERROR {
            self.on_sender_error.emit(());
            return;
        }
        if sequence == hb_seq::SHUTDOWN {
            self.on_shutdown_received.emit(());
            return;
        }

        if self.state == HbReceiverState::CommError {
            let old = self.state;
            self.state = HbReceiverState::Normal;
            self.recovery_counter = 0;
            self.last_sequence = sequence;
            self.on_state_change.emit((old, self.state));
            return;
        }

        if !self.first_received {
            self.first_received = true;
            self.last_sequence = sequence;
            return;
        }

        if sequence == hb_seq::INIT {
            self.last_sequence = hb_seq::INIT;
            self.on_reset_received.emit(());
            return;
        }

        let is_error = sequence == self.last_sequence || Self::compute_jump(self.last_sequence, sequence) > HEARTBEAT_MAX_JUMP;

        match self.state {
            HbReceiverState::Normal => {
                if is_error {
                    let old = self.state;
                    self.state = HbReceiverState::SequenceError;
                    self.recovery_counter = 0;
                    self.on_state_change.emit((old, self.state));
                }
            }
            HbReceiverState::SequenceError => {
                if is_error {
                    self.recovery_counter = 0;
                } else {
                    self.recovery_counter += 1;
                    if self.recovery_counter as u32 >= HEARTBEAT_RECOVERY_COUNT {
                        let old = self.state;
                        self.state = HbReceiverState::Normal;
                        self.recovery_counter = 0;
                        self.on_state_change.emit((old, self.state));
                    }
                }
            }
            HbReceiverState::CommError => unreachable!("handled above"),
        }

        self.last_sequence = sequence;
    }

    pub fn update(&mut self, elapsed_ms: u32) {
        if !self.first_received {
            return;
        }
        self.time_since_last_ms += elapsed_ms;
        if self.time_since_last_ms > HEARTBEAT_COMM_ERROR_TIMEOUT_MS && self.state != HbReceiverState::CommError {
            let old = self.state;
            self.state = HbReceiverState::CommError;
            self.recovery_counter = 0;
            self.on_state_change.emit((old, self.state));
        }
    }

    fn compute_jump(from: u8, to: u8) -> u8 {
        if from == hb_seq::INIT {
            return if to == 0 { 1 } else { to + 1 };
        }
        if to > from {
            to - from
        } else {
            (hb_seq::MAX_NORMAL + 1) - from + to
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub interval_ms: u32,
    pub auto_start: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatConfig { interval_ms: HEARTBEAT_INTERVAL_MS, auto_start: false }
    }
}

impl HeartbeatConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interval_ms(mut self, ms: u32) -> Self {
        self.interval_ms = ms;
        self
    }

    pub fn auto_start(mut self, enable: bool) -> Self {
        self.auto_start = enable;
        self
    }
}

struct RemoteHeartbeat {
    address: Address,
    missed_count: u32,
    timer_ms: u32,
}

/// One Control Function's heartbeat sender plus the set of remote sources it
/// is watching.
pub struct HeartbeatProtocol {
    source: Address,
    interval_ms: u32,
    timer_ms: u32,
    sender: HeartbeatSender,
    enabled: bool,
    remotes: Vec<RemoteHeartbeat>,
    pub on_heartbeat_received: Event<(Address, u8)>,
    pub on_heartbeat_missed: Event<(Address, u32)>,
}

impl HeartbeatProtocol {
    pub fn new(source: Address, config: HeartbeatConfig) -> Self {
        HeartbeatProtocol {
            source,
            interval_ms: config.interval_ms,
            timer_ms: 0,
            sender: HeartbeatSender::new(),
            enabled: config.auto_start,
            remotes: Vec::new(),
            on_heartbeat_received: Event::new(),
            on_heartbeat_missed: Event::new(),
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn signal_error(&mut self) {
        self.sender.signal_error();
    }

    pub fn signal_shutdown(&mut self) {
        self.sender.signal_shutdown();
    }

    pub fn reset_sender(&mut self) {
        self.sender.reset();
    }

    pub fn set_interval_ms(&mut self, ms: u32) {
        self.interval_ms = ms;
    }

    pub fn track(&mut self, address: Address) {
        if self.remotes.iter().any(|r| r.address == address) {
            return;
        }
        self.remotes.push(RemoteHeartbeat { address, missed_count: 0, timer_ms: 0 });
    }

    pub fn untrack(&mut self, address: Address) {
        self.remotes.retain(|r| r.address != address);
    }

    /// Advances the send timer and every tracked remote's silence timer,
    /// returning a heartbeat frame to emit when due.
    pub fn update(&mut self, elapsed_ms: u32) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.enabled && self.sender.update(elapsed_ms, self.interval_ms) {
            frames.push(self.make_frame());
        }

        for remote in &mut self.remotes {
            remote.timer_ms += elapsed_ms;
            if remote.timer_ms >= self.interval_ms * 3 {
                remote.missed_count += 1;
                remote.timer_ms = 0;
                self.on_heartbeat_missed.emit((remote.address, remote.missed_count));
            }
        }
        frames
    }

    /// Feeds an inbound message; no-op if it isn't a Heartbeat.
    pub fn process_message(&mut self, message: &Message) {
        if message.pgn != PGN_HEARTBEAT || message.data.is_empty() {
            return;
        }
        let seq = message.data[0];
        self.on_heartbeat_received.emit((message.source, seq));
        if let Some(remote) = self.remotes.iter_mut().find(|r| r.address == message.source) {
            remote.missed_count = 0;
            remote.timer_ms = 0;
        }
    }

    fn make_frame(&mut self) -> Frame {
        let mut data = [0xFFu8; 8];
        data[0] = self.sender.next_sequence();
        Frame::from_message(Priority::DEFAULT, PGN_HEARTBEAT, self.source, BROADCAST_ADDRESS, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_emits_init_then_wraps() {
        let mut sender = HeartbeatSender::new();
        assert_eq!(sender.next_sequence(), 251);
        assert_eq!(sender.next_sequence(), 0);
        assert_eq!(sender.next_sequence(), 1);
    }

    #[test]
    fn sender_special_values_are_one_shot() {
        let mut sender = HeartbeatSender::new();
        sender.next_sequence();
        sender.signal_error();
        assert_eq!(sender.next_sequence(), 254);
        assert_eq!(sender.next_sequence(), 0);
    }

    #[test]
    fn receiver_flags_repeated_sequence() {
        let mut rx = HeartbeatReceiver::new();
        rx.process(5);
        rx.process(5);
        assert_eq!(rx.state(), HbReceiverState::SequenceError);
    }

    #[test]
    fn receiver_flags_large_jump_but_allows_rollover() {
        let mut rx = HeartbeatReceiver::new();
        rx.process(5);
        rx.process(9);
        assert_eq!(rx.state(), HbReceiverState::SequenceError);

        let mut rx2 = HeartbeatReceiver::new();
        rx2.process(250);
        rx2.process(0);
        assert_eq!(rx2.state(), HbReceiverState::Normal);
    }

    #[test]
    fn receiver_recovers_after_eight_good_sequences() {
        let mut rx = HeartbeatReceiver::new();
        rx.process(5);
        rx.process(5); // SequenceError
        let mut seq = 6u8;
        for _ in 0..HEARTBEAT_RECOVERY_COUNT {
            rx.process(seq);
            seq += 1;
        }
        assert_eq!(rx.state(), HbReceiverState::Normal);
    }

    #[test]
    fn receiver_times_out_to_comm_error() {
        let mut rx = HeartbeatReceiver::new();
        rx.process(1);
        rx.update(301);
        assert_eq!(rx.state(), HbReceiverState::CommError);
    }

    #[test]
    fn protocol_emits_frame_on_interval() {
        let mut hb = HeartbeatProtocol::new(0x10, HeartbeatConfig::new().auto_start(true));
        let frames = hb.update(100);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data[0], 251);
    }
}
