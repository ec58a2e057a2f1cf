//! Extended Transport Protocol: connection-mode transfers above TP's
//! 1785-byte ceiling, up to ~117 MB, using a Data Packet Offset to keep the
//! 1-byte sequence counter from overflowing (ISO 11783-3 §5.11).

use alloc::vec::Vec;

use crate::common::{ETP_MAX_DATA_LENGTH, ETP_TIMEOUT_T1_MS, TP_BYTES_PER_FRAME, TP_MAX_DATA_LENGTH, TP_MAX_PACKETS_PER_CTS};
use crate::event::Event;
use crate::frame::{Frame, Identifier};
use crate::hal::Error;
use crate::log::{isobus_debug, isobus_warn, LogContext};
use crate::pgn::{PGN_ETP_CM, PGN_ETP_DT};
use crate::types::{Address, Pgn, Priority, BROADCAST_ADDRESS};

use super::session::{SessionState, TransportAbortReason, TransportDirection, TransportSession};

fn ctx() -> LogContext {
    LogContext { component: "transport.etp", port: 0 }
}

mod control_byte {
    pub const RTS: u8 = 0x14;
    pub const CTS: u8 = 0x15;
    pub const DPO: u8 = 0x16;
    pub const EOMA: u8 = 0x17;
    pub const ABORT: u8 = 0xFF;
}

pub const MAX_DATA_LENGTH: u32 = ETP_MAX_DATA_LENGTH;

/// Manages every in-flight ETP session on one CAN port. ETP is
/// connection-mode only; there is no broadcast equivalent of BAM.
#[derive(Default)]
pub struct ExtendedTransportProtocol {
    sessions: Vec<TransportSession>,
    pub on_complete: Event<Pgn>,
    pub on_abort: Event<(Pgn, TransportAbortReason)>,
}

impl ExtendedTransportProtocol {
    pub fn new() -> Self {
        ExtendedTransportProtocol { sessions: Vec::new(), on_complete: Event::new(), on_abort: Event::new() }
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn send(
        &mut self,
        pgn: Pgn,
        data: &[u8],
        source: Address,
        destination: Address,
        port: u8,
        priority: Priority,
    ) -> Result<Vec<Frame>, Error> {
        if data.len() as u32 > MAX_DATA_LENGTH {
            return Err(Error::BufferOverflow);
        }
        if data.len() as u32 <= TP_MAX_DATA_LENGTH {
            return Err(Error::InvalidState);
        }
        if destination == BROADCAST_ADDRESS {
            return Err(Error::InvalidAddress);
        }
        if self.find_session(source, destination, pgn, TransportDirection::Transmit, port).is_some() {
            return Err(Error::SessionExists);
        }

        let session = TransportSession {
            direction: TransportDirection::Transmit,
            pgn,
            data: data.to_vec(),
            total_bytes: data.len() as u32,
            source_address: source,
            destination_address: destination,
            port,
            priority,
            state: SessionState::WaitingForCts,
            timer_ms: 0,
            bytes_transferred: 0,
            last_sequence: 0,
            packets_to_send: 0,
            max_packets_per_cts: TP_MAX_PACKETS_PER_CTS,
            cts_window_start: 1,
            cts_window_size: 0,
            dpo_packet_offset: 0,
            receiver_paused: false,
            keepalive_timer_ms: 0,
        };
        isobus_debug!(ctx(), "ETP RTS sent: pgn={:#x} bytes={}", pgn, data.len());
        let frame = make_rts(&session);
        self.sessions.push(session);
        Ok(alloc::vec![frame])
    }

    pub fn process_frame(&mut self, frame: &Frame, port: u8) -> Vec<Frame> {
        match frame.pgn() {
            PGN_ETP_CM => self.handle_cm(frame, port),
            PGN_ETP_DT => self.handle_dt(frame, port),
            _ => Vec::new(),
        }
    }

    pub fn update(&mut self, elapsed_ms: u32) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut i = 0;
        while i < self.sessions.len() {
            self.sessions[i].timer_ms += elapsed_ms;
            let waiting = matches!(
                self.sessions[i].state,
                SessionState::WaitingForCts | SessionState::WaitingForData | SessionState::WaitingForEndOfMsgAck
            );
            if waiting && self.sessions[i].timer_ms >= ETP_TIMEOUT_T1_MS {
                isobus_warn!(ctx(), "ETP timeout: pgn={:#x}", self.sessions[i].pgn);
                let session = self.sessions.remove(i);
                self.on_abort.emit((session.pgn, TransportAbortReason::Timeout));
                frames.push(make_abort(&session, TransportAbortReason::Timeout));
                continue;
            }
            i += 1;
        }
        frames
    }

    /// Emits the DPO then the data-frame window for every session clear to send.
    pub fn pending_data_frames(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        for session in &mut self.sessions {
            if session.state == SessionState::SendingData && session.direction == TransportDirection::Transmit {
                frames.push(make_dpo(session));
                frames.extend(generate_data_frames(session, session.packets_to_send));
                session.timer_ms = 0;
                session.state = if session.bytes_transferred >= session.total_bytes {
                    SessionState::WaitingForEndOfMsgAck
                } else {
                    SessionState::WaitingForCts
                };
            }
        }
        frames
    }

    fn find_session(&self, source: Address, destination: Address, pgn: Pgn, direction: TransportDirection, port: u8) -> Option<usize> {
        self.sessions.iter().position(|s| {
            s.source_address == source && s.destination_address == destination && s.pgn == pgn && s.direction == direction && s.port == port
        })
    }

    fn handle_cm(&mut self, frame: &Frame, port: u8) -> Vec<Frame> {
        let mut responses = Vec::new();
        let control = frame.data[0];
        let src = frame.source();
        let dst = frame.destination();
        let pgn = cm_pgn(frame);

        match control {
            control_byte::RTS => {
                let size = u32::from_le_bytes([frame.data[1], frame.data[2], frame.data[3], frame.data[4]]);
                self.sessions.push(TransportSession {
                    direction: TransportDirection::Receive,
                    pgn,
                    data: alloc::vec![0xFFu8; size as usize],
                    total_bytes: size,
                    source_address: src,
                    destination_address: dst,
                    port,
                    priority: frame.priority(),
                    state: SessionState::WaitingForData,
                    timer_ms: 0,
                    bytes_transferred: 0,
                    last_sequence: 0,
                    packets_to_send: 0,
                    max_packets_per_cts: TP_MAX_PACKETS_PER_CTS,
                    cts_window_start: 1,
                    cts_window_size: TP_MAX_PACKETS_PER_CTS,
                    dpo_packet_offset: 0,
                    receiver_paused: false,
                    keepalive_timer_ms: 0,
                });
                responses.push(make_cts(dst, src, TP_MAX_PACKETS_PER_CTS, 1, pgn));
                isobus_debug!(ctx(), "ETP RTS received: pgn={:#x} bytes={}", pgn, size);
            }
            control_byte::CTS => {
                let num_packets = frame.data[1];
                let next_pkt = u32::from_le_bytes([frame.data[2], frame.data[3], frame.data[4], 0]);
                if let Some(i) = self.find_session(dst, src, pgn, TransportDirection::Transmit, port) {
                    let s = &mut self.sessions[i];
                    if s.state == SessionState::WaitingForCts {
                        if num_packets == 0 {
                            s.timer_ms = 0;
                        } else {
                            s.state = SessionState::SendingData;
                            s.packets_to_send = num_packets;
                            s.bytes_transferred = (next_pkt - 1) * TP_BYTES_PER_FRAME as u32;
                            s.timer_ms = 0;
                        }
                    }
                }
            }
            control_byte::DPO => {
                let num_packets = frame.data[1];
                let packet_offset = u32::from_le_bytes([frame.data[2], frame.data[3], frame.data[4], 0]);
                if let Some(i) = self.sessions.iter().position(|s| {
                    s.direction == TransportDirection::Receive && s.source_address == src && s.destination_address == dst && s.pgn == pgn && s.port == port
                }) {
                    let s = &mut self.sessions[i];
                    s.dpo_packet_offset = packet_offset;
                    s.cts_window_size = num_packets;
                    s.last_sequence = 0;
                    s.timer_ms = 0;
                }
            }
            control_byte::EOMA => {
                if let Some(i) = self.find_session(dst, src, pgn, TransportDirection::Transmit, port) {
                    self.sessions.remove(i);
                    self.on_complete.emit(pgn);
                    isobus_debug!(ctx(), "ETP complete: pgn={:#x}", pgn);
                }
            }
            control_byte::ABORT => {
                let reason = TransportAbortReason::from_raw(frame.data[1]);
                if let Some(i) = self.sessions.iter().position(|s| {
                    s.pgn == pgn && s.port == port && ((s.source_address == dst && s.destination_address == src) || (s.source_address == src && s.destination_address == dst))
                }) {
                    self.sessions.remove(i);
                    self.on_abort.emit((pgn, reason));
                    isobus_warn!(ctx(), "ETP abort received: pgn={:#x}", pgn);
                }
            }
            _ => {}
        }
        responses
    }

    fn handle_dt(&mut self, frame: &Frame, port: u8) -> Vec<Frame> {
        let mut responses = Vec::new();
        let src = frame.source();
        let dst = frame.destination();
        let seq = frame.data[0];

        let Some(i) = self.sessions.iter().position(|s| {
            s.direction == TransportDirection::Receive && s.source_address == src && s.destination_address == dst && s.port == port && s.state == SessionState::WaitingForData
        }) else {
            return responses;
        };

        let expected = self.sessions[i].last_sequence + 1;
        if seq != expected {
            isobus_warn!(ctx(), "ETP bad sequence: got={} expected={}", seq, expected);
            let session = self.sessions.remove(i);
            responses.push(make_abort(&session, TransportAbortReason::BadSequence));
            self.on_abort.emit((session.pgn, TransportAbortReason::BadSequence));
            return responses;
        }

        let byte_offset = (self.sessions[i].dpo_packet_offset + seq as u32 - 1) * TP_BYTES_PER_FRAME as u32;
        for j in 0..TP_BYTES_PER_FRAME {
            let idx = byte_offset as usize + j;
            if idx < self.sessions[i].total_bytes as usize {
                self.sessions[i].data[idx] = frame.data[j + 1];
            }
        }
        self.sessions[i].bytes_transferred = (byte_offset + TP_BYTES_PER_FRAME as u32).min(self.sessions[i].total_bytes);
        self.sessions[i].last_sequence = seq;
        self.sessions[i].timer_ms = 0;

        if self.sessions[i].bytes_transferred >= self.sessions[i].total_bytes {
            let session = self.sessions.remove(i);
            responses.push(make_eoma(session.destination_address, session.source_address, session.total_bytes, session.pgn));
            self.on_complete.emit(session.pgn);
            isobus_debug!(ctx(), "ETP RX complete: pgn={:#x}", session.pgn);
        } else if seq >= self.sessions[i].cts_window_size {
            let next_pkt = self.sessions[i].dpo_packet_offset + seq as u32 + 1;
            let remaining = (self.sessions[i].total_bytes - self.sessions[i].bytes_transferred + TP_BYTES_PER_FRAME as u32 - 1) / TP_BYTES_PER_FRAME as u32;
            let next_count = remaining.min(TP_MAX_PACKETS_PER_CTS as u32) as u8;
            responses.push(make_cts(self.sessions[i].destination_address, self.sessions[i].source_address, next_count, next_pkt, self.sessions[i].pgn));
            self.sessions[i].cts_window_size = next_count;
        }

        responses
    }
}

fn cm_pgn(frame: &Frame) -> Pgn {
    frame.data[5] as Pgn | (frame.data[6] as Pgn) << 8 | (frame.data[7] as Pgn) << 16
}

fn make_rts(s: &TransportSession) -> Frame {
    let mut data = [0xFFu8; 8];
    data[0] = control_byte::RTS;
    data[1..5].copy_from_slice(&s.total_bytes.to_le_bytes());
    data[5..8].copy_from_slice(&s.pgn.to_le_bytes()[..3]);
    Frame { id: Identifier::encode(Priority::LOWEST, PGN_ETP_CM, s.source_address, s.destination_address), data, length: 8, timestamp_us: 0 }
}

fn make_dpo(s: &TransportSession) -> Frame {
    let packet_offset = s.bytes_transferred / TP_BYTES_PER_FRAME as u32;
    let mut data = [0xFFu8; 8];
    data[0] = control_byte::DPO;
    data[1] = s.packets_to_send;
    data[2..5].copy_from_slice(&packet_offset.to_le_bytes()[..3]);
    data[5..8].copy_from_slice(&s.pgn.to_le_bytes()[..3]);
    Frame { id: Identifier::encode(Priority::LOWEST, PGN_ETP_CM, s.source_address, s.destination_address), data, length: 8, timestamp_us: 0 }
}

fn make_cts(source: Address, destination: Address, num_packets: u8, next_packet: u32, pgn: Pgn) -> Frame {
    let mut data = [0xFFu8; 8];
    data[0] = control_byte::CTS;
    data[1] = num_packets;
    data[2..5].copy_from_slice(&next_packet.to_le_bytes()[..3]);
    data[5..8].copy_from_slice(&pgn.to_le_bytes()[..3]);
    Frame { id: Identifier::encode(Priority::LOWEST, PGN_ETP_CM, source, destination), data, length: 8, timestamp_us: 0 }
}

fn make_eoma(source: Address, destination: Address, total_bytes: u32, pgn: Pgn) -> Frame {
    let mut data = [0xFFu8; 8];
    data[0] = control_byte::EOMA;
    data[1..5].copy_from_slice(&total_bytes.to_le_bytes());
    data[5..8].copy_from_slice(&pgn.to_le_bytes()[..3]);
    Frame { id: Identifier::encode(Priority::LOWEST, PGN_ETP_CM, source, destination), data, length: 8, timestamp_us: 0 }
}

fn make_abort(s: &TransportSession, reason: TransportAbortReason) -> Frame {
    let mut data = [0xFFu8; 8];
    data[0] = control_byte::ABORT;
    data[1] = reason.raw();
    data[5..8].copy_from_slice(&s.pgn.to_le_bytes()[..3]);
    Frame { id: Identifier::encode(Priority::LOWEST, PGN_ETP_CM, s.source_address, s.destination_address), data, length: 8, timestamp_us: 0 }
}

fn generate_data_frames(session: &mut TransportSession, count: u8) -> Vec<Frame> {
    let mut frames = Vec::new();
    for i in 0..count {
        if session.bytes_transferred >= session.total_bytes {
            break;
        }
        let mut data = [0xFFu8; 8];
        data[0] = i + 1;
        for j in 0..TP_BYTES_PER_FRAME {
            let idx = session.bytes_transferred as usize + j;
            data[j + 1] = if idx < session.total_bytes as usize { session.data[idx] } else { 0xFF };
        }
        frames.push(Frame {
            id: Identifier::encode(Priority::LOWEST, PGN_ETP_DT, session.source_address, session.destination_address),
            data,
            length: 8,
            timestamp_us: 0,
        });
        session.bytes_transferred = (session.bytes_transferred + TP_BYTES_PER_FRAME as u32).min(session.total_bytes);
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_payload_small_enough_for_tp() {
        let mut etp = ExtendedTransportProtocol::new();
        let data = [0u8; 100];
        assert_eq!(etp.send(0x00_FE00, &data, 0x10, 0x20, 0, Priority::DEFAULT).unwrap_err(), Error::InvalidState);
    }

    #[test]
    fn rejects_broadcast_destination() {
        let mut etp = ExtendedTransportProtocol::new();
        let data = alloc::vec![0u8; 2000];
        assert_eq!(etp.send(0x00_FE00, &data, 0x10, BROADCAST_ADDRESS, 0, Priority::DEFAULT).unwrap_err(), Error::InvalidAddress);
    }

    #[test]
    fn rts_cts_dpo_round_trip_sends_window() {
        let mut etp = ExtendedTransportProtocol::new();
        let data = alloc::vec![3u8; 2000];
        etp.send(0x00_FE00, &data, 0x10, 0x20, 0, Priority::DEFAULT).unwrap();

        let cts = make_cts(0x20, 0x10, 16, 1, 0x00_FE00);
        etp.process_frame(&cts, 0);
        let frames = etp.pending_data_frames();
        assert_eq!(frames[0].data[0], control_byte::DPO);
        assert_eq!(frames.len(), 17); // DPO + 16 data frames
    }
}
