//! Shared session bookkeeping for TP and ETP (ISO 11783-3, SAE J1939-21).

use alloc::vec::Vec;

use crate::common::TP_BYTES_PER_FRAME;
use crate::types::{Address, Pgn, Priority, BROADCAST_ADDRESS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportDirection {
    Transmit,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    WaitingForCts,
    SendingData,
    WaitingForData,
    ReceivingData,
    WaitingForEndOfMsgAck,
    Complete,
    Aborted,
}

/// Abort reason codes carried in a TP/ETP `Abort` control frame (ISO 11783-3 §5.10.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportAbortReason {
    AlreadyInSession = 1,
    NoResources = 2,
    Timeout = 3,
    CtsWhileSending = 4,
    MaxRetransmits = 5,
    UnexpectedDataTransfer = 6,
    BadSequence = 7,
    DuplicateSequence = 8,
    TotalSizeTooBig = 9,
}

impl TransportAbortReason {
    pub const fn raw(self) -> u8 {
        self as u8
    }

    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::AlreadyInSession,
            2 => Self::NoResources,
            4 => Self::CtsWhileSending,
            5 => Self::MaxRetransmits,
            6 => Self::UnexpectedDataTransfer,
            7 => Self::BadSequence,
            8 => Self::DuplicateSequence,
            9 => Self::TotalSizeTooBig,
            _ => Self::Timeout,
        }
    }
}

/// One in-flight TP or ETP transfer, in either direction.
///
/// A single struct replaces the original's separate session/timer-session
/// pair: every session already needs a timer, so tracking it apart from the
/// rest of the session's state only invited the two views to drift.
#[derive(Debug, Clone)]
pub struct TransportSession {
    pub direction: TransportDirection,
    pub pgn: Pgn,
    pub data: Vec<u8>,
    pub total_bytes: u32,
    pub source_address: Address,
    pub destination_address: Address,
    pub port: u8,
    pub priority: Priority,
    pub state: SessionState,
    pub timer_ms: u32,
    pub bytes_transferred: u32,
    pub last_sequence: u8,
    pub packets_to_send: u8,
    pub max_packets_per_cts: u8,
    pub cts_window_start: u8,
    pub cts_window_size: u8,
    /// ETP only: byte-packet offset announced by the most recent DPO.
    pub dpo_packet_offset: u32,
    /// True once we have sent a CTS(0) hold and are waiting to resume.
    pub receiver_paused: bool,
    pub keepalive_timer_ms: u32,
}

impl TransportSession {
    pub fn is_broadcast(&self) -> bool {
        self.destination_address == BROADCAST_ADDRESS
    }

    pub fn total_packets(&self) -> u32 {
        (self.total_bytes + TP_BYTES_PER_FRAME as u32 - 1) / TP_BYTES_PER_FRAME as u32
    }
}
