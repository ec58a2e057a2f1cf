//! NMEA2000-style Fast Packet Protocol: 9-223 byte payloads with no flow
//! control, keyed by a 3-bit session counter carried in every frame's first
//! data byte.
//!
//! Sessions are keyed by `(source, pgn, sequence_counter)` only; two distinct
//! senders broadcasting the same PGN with the same counter value within one
//! timeout window are indistinguishable. This is a known, accepted
//! limitation of the wire format itself, not a gap in this implementation.

use alloc::vec::Vec;

use crate::common::{FAST_PACKET_FIRST_FRAME_DATA, FAST_PACKET_MAX_DATA, FAST_PACKET_SUBSEQUENT_FRAME_DATA, FAST_PACKET_TIMEOUT_MS};
use crate::event::Event;
use crate::frame::{Frame, Identifier, Message};
use crate::hal::Error;
use crate::log::{isobus_debug, isobus_warn, LogContext};
use crate::types::{Address, Pgn, Priority, BROADCAST_ADDRESS, NULL_ADDRESS};

fn ctx() -> LogContext {
    LogContext { component: "transport.fast_packet", port: 0 }
}

struct FastPacketSession {
    pgn: Pgn,
    data: Vec<u8>,
    total_bytes: u32,
    bytes_received: u32,
    source_address: Address,
    sequence_counter: u8,
    expected_frame: u8,
    timer_ms: u32,
}

/// Sends and reassembles Fast Packet messages on one CAN port.
#[derive(Default)]
pub struct FastPacketProtocol {
    rx_sessions: Vec<FastPacketSession>,
    tx_sequence_counter: u8,
    pub on_message: Event<Message>,
}

impl FastPacketProtocol {
    pub fn new() -> Self {
        FastPacketProtocol { rx_sessions: Vec::new(), tx_sequence_counter: 0, on_message: Event::new() }
    }

    pub fn send(&mut self, pgn: Pgn, data: &[u8], source: Address) -> Result<Vec<Frame>, Error> {
        if data.len() > FAST_PACKET_MAX_DATA {
            return Err(Error::BufferOverflow);
        }
        if data.len() <= 8 {
            return Err(Error::InvalidState);
        }

        let seq = (self.tx_sequence_counter & 0x07) << 5;
        self.tx_sequence_counter = self.tx_sequence_counter.wrapping_add(1);
        let total_frames = 1 + ((data.len() - FAST_PACKET_FIRST_FRAME_DATA + FAST_PACKET_SUBSEQUENT_FRAME_DATA - 1) / FAST_PACKET_SUBSEQUENT_FRAME_DATA) as u8;

        let mut frames = Vec::with_capacity(total_frames as usize);

        let mut first = [0xFFu8; 8];
        first[0] = seq;
        first[1] = data.len() as u8;
        let first_len = data.len().min(FAST_PACKET_FIRST_FRAME_DATA);
        first[2..2 + first_len].copy_from_slice(&data[..first_len]);
        frames.push(Frame { id: Identifier::encode(Priority::DEFAULT, pgn, source, BROADCAST_ADDRESS), data: first, length: 8, timestamp_us: 0 });

        let mut offset = FAST_PACKET_FIRST_FRAME_DATA;
        for frame_num in 1..total_frames {
            let mut d = [0xFFu8; 8];
            d[0] = seq | frame_num;
            let len = (data.len() - offset).min(FAST_PACKET_SUBSEQUENT_FRAME_DATA);
            d[1..1 + len].copy_from_slice(&data[offset..offset + len]);
            frames.push(Frame { id: Identifier::encode(Priority::DEFAULT, pgn, source, BROADCAST_ADDRESS), data: d, length: 8, timestamp_us: 0 });
            offset += FAST_PACKET_SUBSEQUENT_FRAME_DATA;
        }

        isobus_debug!(ctx(), "fast packet sent: pgn={:#x} bytes={}", pgn, data.len());
        Ok(frames)
    }

    /// Feeds one inbound frame; returns the assembled message once complete.
    pub fn process_frame(&mut self, frame: &Frame) -> Option<Message> {
        let frame_counter = frame.data[0] & 0x1F;
        let seq_counter = (frame.data[0] >> 5) & 0x07;
        let src = frame.source();
        let pgn = frame.pgn();

        if frame_counter == 0 {
            let total_bytes = frame.data[1] as u32;
            let copy_len = (total_bytes as usize).min(FAST_PACKET_FIRST_FRAME_DATA);
            let mut data = alloc::vec![0xFFu8; total_bytes as usize];
            data[..copy_len].copy_from_slice(&frame.data[2..2 + copy_len]);

            let session = FastPacketSession {
                pgn,
                data,
                total_bytes,
                bytes_received: copy_len as u32,
                source_address: src,
                sequence_counter: seq_counter,
                expected_frame: 1,
                timer_ms: 0,
            };

            if session.bytes_received >= session.total_bytes {
                return Some(make_message(&session));
            }

            self.remove_session(src, pgn);
            self.rx_sessions.push(session);
            return None;
        }

        let Some(i) = self.rx_sessions.iter().position(|s| s.source_address == src && s.pgn == pgn && s.sequence_counter == seq_counter) else {
            return None;
        };

        if frame_counter != self.rx_sessions[i].expected_frame {
            isobus_warn!(ctx(), "fast packet bad sequence: expected={} got={}", self.rx_sessions[i].expected_frame, frame_counter);
            self.rx_sessions.remove(i);
            return None;
        }

        let offset = FAST_PACKET_FIRST_FRAME_DATA + (frame_counter as usize - 1) * FAST_PACKET_SUBSEQUENT_FRAME_DATA;
        for j in 0..FAST_PACKET_SUBSEQUENT_FRAME_DATA {
            let idx = offset + j;
            if idx < self.rx_sessions[i].total_bytes as usize {
                self.rx_sessions[i].data[idx] = frame.data[j + 1];
            }
        }
        self.rx_sessions[i].bytes_received = ((offset + FAST_PACKET_SUBSEQUENT_FRAME_DATA) as u32).min(self.rx_sessions[i].total_bytes);
        self.rx_sessions[i].expected_frame += 1;
        self.rx_sessions[i].timer_ms = 0;

        if self.rx_sessions[i].bytes_received >= self.rx_sessions[i].total_bytes {
            let session = self.rx_sessions.remove(i);
            let msg = make_message(&session);
            self.on_message.emit(msg.clone());
            return Some(msg);
        }
        None
    }

    /// Prunes sessions that have gone silent past `FAST_PACKET_TIMEOUT_MS`.
    pub fn update(&mut self, elapsed_ms: u32) {
        self.rx_sessions.retain_mut(|s| {
            s.timer_ms += elapsed_ms;
            let alive = s.timer_ms < FAST_PACKET_TIMEOUT_MS;
            if !alive {
                isobus_warn!(ctx(), "fast packet session timed out: pgn={:#x}", s.pgn);
            }
            alive
        });
    }

    fn remove_session(&mut self, source: Address, pgn: Pgn) {
        if let Some(i) = self.rx_sessions.iter().position(|s| s.source_address == source && s.pgn == pgn) {
            self.rx_sessions.remove(i);
        }
    }
}

fn make_message(session: &FastPacketSession) -> Message {
    Message::new(session.pgn, session.data.clone(), session.source_address, BROADCAST_ADDRESS, Priority::DEFAULT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_multi_frame_payload() {
        let mut fp = FastPacketProtocol::new();
        let data: Vec<u8> = (0u8..30).collect();
        let frames = fp.send(0x01_F010, &data, 0x40).unwrap();
        assert_eq!(frames.len(), 5); // 1 first (6B) + 4 subsequent (7B each) = 6+28=34 >= 30

        let mut received = None;
        for f in &frames {
            if let Some(m) = fp.process_frame(f) {
                received = Some(m);
            }
        }
        let msg = received.expect("message should complete");
        assert_eq!(msg.data, data);
        assert_eq!(msg.source, 0x40);
    }

    #[test]
    fn rejects_payload_over_max() {
        let mut fp = FastPacketProtocol::new();
        let data = alloc::vec![0u8; 300];
        assert_eq!(fp.send(0x01_F010, &data, NULL_ADDRESS).unwrap_err(), Error::BufferOverflow);
    }

    #[test]
    fn bad_sequence_discards_session() {
        let mut fp = FastPacketProtocol::new();
        let data: Vec<u8> = (0u8..20).collect();
        let frames = fp.send(0x01_F010, &data, 0x40).unwrap();
        fp.process_frame(&frames[0]);
        let mut bad = frames[2].clone(); // skip frame 1, feed frame 2 directly
        bad.data[0] = (bad.data[0] & 0xE0) | 2;
        assert!(fp.process_frame(&bad).is_none());
    }
}
