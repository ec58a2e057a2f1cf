use crate::frame::identifier::Identifier;
use crate::types::{Address, Pgn, Priority, TimestampUs};

/// A single physical CAN frame: identifier, up to 8 payload bytes, and the
/// DLC actually used before wire padding. `timestamp_us` is stamped by the
/// host on reception; the core never reads a clock itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub id: Identifier,
    pub data: [u8; 8],
    pub length: u8,
    pub timestamp_us: TimestampUs,
}

impl Frame {
    /// Builds a frame from a logical (priority, PGN, source, destination)
    /// tuple and up to 8 payload bytes, padding the remainder with `0xFF` and
    /// forcing the wire DLC to 8 as required by every layer above L1.
    pub fn from_message(priority: Priority, pgn: Pgn, source: Address, destination: Address, payload: &[u8]) -> Self {
        let mut data = [0xFFu8; 8];
        let len = payload.len().min(8);
        data[..len].copy_from_slice(&payload[..len]);
        Frame {
            id: Identifier::encode(priority, pgn, source, destination),
            data,
            length: 8,
            timestamp_us: 0,
        }
    }

    pub fn pgn(&self) -> Pgn {
        self.id.pgn()
    }

    pub fn source(&self) -> Address {
        self.id.source()
    }

    pub fn destination(&self) -> Address {
        self.id.destination()
    }

    pub fn priority(&self) -> Priority {
        self.id.priority()
    }

    pub fn is_broadcast(&self) -> bool {
        self.id.is_broadcast()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_message_always_pads_to_dlc_eight() {
        let frame = Frame::from_message(Priority::DEFAULT, 0x00_EA00, 0x10, 0x20, &[1, 2, 3]);
        assert_eq!(frame.length, 8);
        assert_eq!(frame.data, [1, 2, 3, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(frame.source(), 0x10);
        assert_eq!(frame.destination(), 0x20);
    }
}
