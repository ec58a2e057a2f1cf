use alloc::vec::Vec;

use crate::types::{Address, Pgn, Priority, TimestampUs};

/// A decoded logical message, of arbitrary length, assembled by the
/// transport layer from one or more physical frames (or directly from a
/// single frame when the payload fits in 8 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub pgn: Pgn,
    pub data: Vec<u8>,
    pub source: Address,
    pub destination: Address,
    pub priority: Priority,
    pub timestamp_us: TimestampUs,
}

impl Message {
    pub fn new(pgn: Pgn, data: Vec<u8>, source: Address, destination: Address, priority: Priority) -> Self {
        Message {
            pgn,
            data,
            source,
            destination,
            priority,
            timestamp_us: 0,
        }
    }
}
