//! Transport Protocol: BAM (broadcast) and RTS/CTS (connection mode),
//! 9-1785 byte payloads (ISO 11783-3 §5.10, SAE J1939-21 §5.10).

use alloc::vec::Vec;

use crate::common::{
    TP_BAM_INTER_PACKET_MS, TP_BYTES_PER_FRAME, TP_CTS_HOLD_REPEAT_MS, TP_MAX_DATA_LENGTH,
    TP_MAX_PACKETS_PER_CTS, TP_TIMEOUT_T1_MS, TP_TIMEOUT_T3_MS, TP_TIMEOUT_T4_MS,
};
use crate::event::Event;
use crate::frame::{Frame, Identifier};
use crate::hal::Error;
use crate::log::{isobus_debug, isobus_warn, LogContext};
use crate::pgn::{PGN_TP_CM, PGN_TP_DT};
use crate::types::{Address, Pgn, Priority, BROADCAST_ADDRESS};

use super::session::{SessionState, TransportAbortReason, TransportDirection, TransportSession};

fn ctx() -> LogContext {
    LogContext { component: "transport.tp", port: 0 }
}

mod control_byte {
    pub const RTS: u8 = 0x10;
    pub const CTS: u8 = 0x11;
    pub const EOMA: u8 = 0x13;
    pub const BAM: u8 = 0x20;
    pub const ABORT: u8 = 0xFF;
}

/// The biggest payload TP will hand to a single frame without needing ETP.
pub const MAX_DATA_LENGTH: u32 = TP_MAX_DATA_LENGTH;

/// Manages every in-flight TP session on one CAN port.
#[derive(Default)]
pub struct TransportProtocol {
    sessions: Vec<TransportSession>,
    pub on_complete: Event<Pgn>,
    pub on_abort: Event<(Pgn, TransportAbortReason)>,
}

impl TransportProtocol {
    pub fn new() -> Self {
        TransportProtocol { sessions: Vec::new(), on_complete: Event::new(), on_abort: Event::new() }
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Starts sending `data` as `pgn` from `source` to `destination`.
    /// Broadcasts use BAM; everything else uses RTS/CTS.
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

        if self.find_session(source, destination, pgn, TransportDirection::Transmit, port).is_some() {
            return Err(Error::SessionExists);
        }

        let broadcast = destination == BROADCAST_ADDRESS;
        let mut session = TransportSession {
            direction: TransportDirection::Transmit,
            pgn,
            data: data.to_vec(),
            total_bytes: data.len() as u32,
            source_address: source,
            destination_address: destination,
            port,
            priority,
            state: if broadcast { SessionState::SendingData } else { SessionState::WaitingForCts },
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

        let frame = if broadcast {
            isobus_debug!(ctx(), "BAM started: pgn={:#x} bytes={}", pgn, data.len());
            make_bam(&session)
        } else {
            isobus_debug!(ctx(), "RTS sent: pgn={:#x} bytes={}", pgn, data.len());
            make_rts(&session)
        };
        session.timer_ms = 0;
        self.sessions.push(session);
        Ok(alloc::vec![frame])
    }

    /// Dispatches an inbound TP-CM or TP-DT frame.
    pub fn process_frame(&mut self, frame: &Frame, port: u8) -> Vec<Frame> {
        match frame.pgn() {
            PGN_TP_CM => self.handle_cm(frame, port),
            PGN_TP_DT => self.handle_dt(frame, port),
            _ => Vec::new(),
        }
    }

    /// Advances every session's timers by `elapsed_ms`: paces BAM data
    /// frames, re-sends CTS holds, and times out stalled sessions.
    pub fn update(&mut self, elapsed_ms: u32) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut i = 0;
        while i < self.sessions.len() {
            self.sessions[i].timer_ms += elapsed_ms;

            if self.sessions[i].is_broadcast()
                && self.sessions[i].state == SessionState::SendingData
                && self.sessions[i].direction == TransportDirection::Transmit
                && self.sessions[i].timer_ms >= TP_BAM_INTER_PACKET_MS
            {
                self.sessions[i].timer_ms = 0;
                frames.extend(generate_data_frames(&mut self.sessions[i], 1));
                if self.sessions[i].bytes_transferred >= self.sessions[i].total_bytes {
                    let pgn = self.sessions[i].pgn;
                    self.on_complete.emit(pgn);
                    self.sessions.remove(i);
                    continue;
                }
            }

            if self.sessions[i].receiver_paused {
                self.sessions[i].keepalive_timer_ms += elapsed_ms;
                if self.sessions[i].keepalive_timer_ms >= TP_CTS_HOLD_REPEAT_MS {
                    self.sessions[i].keepalive_timer_ms = 0;
                    let s = &self.sessions[i];
                    frames.push(make_cts(s.destination_address, s.source_address, 0, 0, s.pgn));
                }
            }

            let timeout = match self.sessions[i].state {
                SessionState::WaitingForCts | SessionState::WaitingForEndOfMsgAck => TP_TIMEOUT_T3_MS,
                SessionState::WaitingForData | SessionState::ReceivingData => TP_TIMEOUT_T1_MS,
                SessionState::SendingData if !self.sessions[i].is_broadcast() => TP_TIMEOUT_T4_MS,
                _ => u32::MAX,
            };

            if self.sessions[i].timer_ms >= timeout {
                isobus_warn!(ctx(), "session timeout: pgn={:#x}", self.sessions[i].pgn);
                let session = self.sessions.remove(i);
                self.on_abort.emit((session.pgn, TransportAbortReason::Timeout));
                if !session.is_broadcast() {
                    frames.push(make_abort(&session, TransportAbortReason::Timeout));
                }
                continue;
            }

            i += 1;
        }
        frames
    }

    /// Pulls the next window of data frames for every connection-mode
    /// session currently clear to send.
    pub fn pending_data_frames(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        for session in &mut self.sessions {
            if session.state == SessionState::SendingData
                && session.direction == TransportDirection::Transmit
                && !session.is_broadcast()
            {
                let count = session.packets_to_send;
                frames.extend(generate_data_frames(session, count));
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

    fn find_session(
        &self,
        source: Address,
        destination: Address,
        pgn: Pgn,
        direction: TransportDirection,
        port: u8,
    ) -> Option<usize> {
        self.sessions.iter().position(|s| {
            s.source_address == source
                && s.destination_address == destination
                && s.pgn == pgn
                && s.direction == direction
                && s.port == port
        })
    }

    fn find_rx_session(&self, source: Address, destination: Address, port: u8) -> Option<usize> {
        self.sessions.iter().position(|s| {
            s.direction == TransportDirection::Receive
                && s.source_address == source
                && s.port == port
                && matches!(s.state, SessionState::WaitingForData | SessionState::ReceivingData)
                && (s.is_broadcast() || s.destination_address == destination)
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
                let size = u16::from_le_bytes([frame.data[1], frame.data[2]]);
                let total_packets = frame.data[3];
                let max_per_cts = frame.data[4].min(TP_MAX_PACKETS_PER_CTS);

                if self.find_session(src, dst, pgn, TransportDirection::Receive, port).is_some() {
                    responses.push(make_abort_raw(dst, src, pgn, TransportAbortReason::AlreadyInSession));
                    return responses;
                }

                let cts_count = total_packets.min(max_per_cts);
                self.sessions.push(TransportSession {
                    direction: TransportDirection::Receive,
                    pgn,
                    data: alloc::vec![0xFFu8; size as usize],
                    total_bytes: size as u32,
                    source_address: src,
                    destination_address: dst,
                    port,
                    priority: frame.priority(),
                    state: SessionState::WaitingForData,
                    timer_ms: 0,
                    bytes_transferred: 0,
                    last_sequence: 0,
                    packets_to_send: 0,
                    max_packets_per_cts: max_per_cts,
                    cts_window_start: 1,
                    cts_window_size: cts_count,
                    dpo_packet_offset: 0,
                    receiver_paused: false,
                    keepalive_timer_ms: 0,
                });
                responses.push(make_cts(dst, src, cts_count, 1, pgn));
                isobus_debug!(ctx(), "RTS received: pgn={:#x} bytes={}", pgn, size);
            }
            control_byte::CTS => {
                let num_packets = frame.data[1];
                let next_seq = frame.data[2];
                if let Some(i) = self.find_session(dst, src, pgn, TransportDirection::Transmit, port) {
                    let s = &mut self.sessions[i];
                    if s.state == SessionState::WaitingForCts {
                        if num_packets == 0 {
                            s.receiver_paused = true;
                            s.timer_ms = 0;
                        } else {
                            s.receiver_paused = false;
                            s.state = SessionState::SendingData;
                            s.packets_to_send = num_packets;
                            s.bytes_transferred = (next_seq as u32 - 1) * TP_BYTES_PER_FRAME as u32;
                            s.last_sequence = next_seq - 1;
                            s.timer_ms = 0;
                        }
                    }
                }
            }
            control_byte::EOMA => {
                if let Some(i) = self.find_session(dst, src, pgn, TransportDirection::Transmit, port) {
                    self.sessions.remove(i);
                    self.on_complete.emit(pgn);
                    isobus_debug!(ctx(), "EOMA received, session complete: pgn={:#x}", pgn);
                }
            }
            control_byte::BAM => {
                let size = u16::from_le_bytes([frame.data[1], frame.data[2]]);
                self.sessions.push(TransportSession {
                    direction: TransportDirection::Receive,
                    pgn,
                    data: alloc::vec![0xFFu8; size as usize],
                    total_bytes: size as u32,
                    source_address: src,
                    destination_address: BROADCAST_ADDRESS,
                    port,
                    priority: frame.priority(),
                    state: SessionState::ReceivingData,
                    timer_ms: 0,
                    bytes_transferred: 0,
                    last_sequence: 0,
                    packets_to_send: 0,
                    max_packets_per_cts: 0,
                    cts_window_start: 1,
                    cts_window_size: 0,
                    dpo_packet_offset: 0,
                    receiver_paused: false,
                    keepalive_timer_ms: 0,
                });
                isobus_debug!(ctx(), "BAM received: pgn={:#x} bytes={}", pgn, size);
            }
            control_byte::ABORT => {
                let reason = TransportAbortReason::from_raw(frame.data[1]);
                if let Some(i) = self.sessions.iter().position(|s| {
                    s.pgn == pgn
                        && s.port == port
                        && ((s.source_address == dst && s.destination_address == src)
                            || (s.source_address == src && s.destination_address == dst))
                }) {
                    self.sessions.remove(i);
                    self.on_abort.emit((pgn, reason));
                    isobus_warn!(ctx(), "abort received: pgn={:#x}", pgn);
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

        let Some(i) = self.find_rx_session(src, dst, port) else {
            return responses;
        };

        let expected = self.sessions[i].last_sequence + 1;
        if seq != expected {
            let broadcast = self.sessions[i].is_broadcast();
            let reason = if seq <= self.sessions[i].last_sequence && seq != 0 {
                TransportAbortReason::DuplicateSequence
            } else {
                TransportAbortReason::BadSequence
            };
            isobus_warn!(ctx(), "bad DT sequence: got={} expected={}", seq, expected);
            let session = self.sessions.remove(i);
            if !broadcast {
                responses.push(make_abort(&session, reason));
            }
            self.on_abort.emit((session.pgn, reason));
            return responses;
        }

        let offset = (seq as u32 - 1) * TP_BYTES_PER_FRAME as u32;
        for j in 0..TP_BYTES_PER_FRAME {
            let idx = offset as usize + j;
            if idx < self.sessions[i].total_bytes as usize {
                self.sessions[i].data[idx] = frame.data[j + 1];
            }
        }
        self.sessions[i].bytes_transferred = (offset + TP_BYTES_PER_FRAME as u32).min(self.sessions[i].total_bytes);
        self.sessions[i].last_sequence = seq;
        self.sessions[i].timer_ms = 0;

        if self.sessions[i].bytes_transferred >= self.sessions[i].total_bytes {
            let session = self.sessions.remove(i);
            if !session.is_broadcast() {
                responses.push(make_eoma(
                    session.destination_address,
                    session.source_address,
                    session.total_bytes,
                    session.total_packets() as u8,
                    session.pgn,
                ));
            }
            isobus_debug!(ctx(), "session complete: pgn={:#x}", session.pgn);
            self.on_complete.emit(session.pgn);
        } else if !self.sessions[i].is_broadcast() {
            let packets_in_window = seq - (self.sessions[i].cts_window_start - 1);
            if packets_in_window >= self.sessions[i].cts_window_size {
                let remaining = self.sessions[i].total_packets() - seq as u32;
                let next_count = (remaining.min(self.sessions[i].max_packets_per_cts as u32)) as u8;
                self.sessions[i].cts_window_start = seq + 1;
                self.sessions[i].cts_window_size = next_count;
                responses.push(make_cts(
                    self.sessions[i].destination_address,
                    self.sessions[i].source_address,
                    next_count,
                    seq + 1,
                    self.sessions[i].pgn,
                ));
            }
        }

        responses
    }
}

fn cm_pgn(frame: &Frame) -> Pgn {
    frame.data[5] as Pgn | (frame.data[6] as Pgn) << 8 | (frame.data[7] as Pgn) << 16
}

fn make_bam(s: &TransportSession) -> Frame {
    let mut data = [0xFFu8; 8];
    data[0] = control_byte::BAM;
    data[1..3].copy_from_slice(&(s.total_bytes as u16).to_le_bytes());
    data[3] = s.total_packets() as u8;
    data[5..8].copy_from_slice(&s.pgn.to_le_bytes()[..3]);
    Frame { id: Identifier::encode(Priority::LOWEST, PGN_TP_CM, s.source_address, BROADCAST_ADDRESS), data, length: 8, timestamp_us: 0 }
}

fn make_rts(s: &TransportSession) -> Frame {
    let mut data = [0xFFu8; 8];
    data[0] = control_byte::RTS;
    data[1..3].copy_from_slice(&(s.total_bytes as u16).to_le_bytes());
    data[3] = s.total_packets() as u8;
    data[4] = s.max_packets_per_cts;
    data[5..8].copy_from_slice(&s.pgn.to_le_bytes()[..3]);
    Frame { id: Identifier::encode(Priority::LOWEST, PGN_TP_CM, s.source_address, s.destination_address), data, length: 8, timestamp_us: 0 }
}

fn make_cts(source: Address, destination: Address, num_packets: u8, next_seq: u8, pgn: Pgn) -> Frame {
    let mut data = [0xFFu8; 8];
    data[0] = control_byte::CTS;
    data[1] = num_packets;
    data[2] = next_seq;
    data[5..8].copy_from_slice(&pgn.to_le_bytes()[..3]);
    Frame { id: Identifier::encode(Priority::LOWEST, PGN_TP_CM, source, destination), data, length: 8, timestamp_us: 0 }
}

fn make_eoma(source: Address, destination: Address, total_bytes: u32, total_packets: u8, pgn: Pgn) -> Frame {
    let mut data = [0xFFu8; 8];
    data[0] = control_byte::EOMA;
    data[1..3].copy_from_slice(&(total_bytes as u16).to_le_bytes());
    data[3] = total_packets;
    data[5..8].copy_from_slice(&pgn.to_le_bytes()[..3]);
    Frame { id: Identifier::encode(Priority::LOWEST, PGN_TP_CM, source, destination), data, length: 8, timestamp_us: 0 }
}

fn make_abort(s: &TransportSession, reason: TransportAbortReason) -> Frame {
    make_abort_raw(s.source_address, s.destination_address, s.pgn, reason)
}

fn make_abort_raw(source: Address, destination: Address, pgn: Pgn, reason: TransportAbortReason) -> Frame {
    let mut data = [0xFFu8; 8];
    data[0] = control_byte::ABORT;
    data[1] = reason.raw();
    data[5..8].copy_from_slice(&pgn.to_le_bytes()[..3]);
    Frame { id: Identifier::encode(Priority::LOWEST, PGN_TP_CM, source, destination), data, length: 8, timestamp_us: 0 }
}

fn generate_data_frames(session: &mut TransportSession, count: u8) -> Vec<Frame> {
    let mut frames = Vec::new();
    for _ in 0..count {
        if session.bytes_transferred >= session.total_bytes {
            break;
        }
        let mut data = [0xFFu8; 8];
        session.last_sequence += 1;
        data[0] = session.last_sequence;
        for j in 0..TP_BYTES_PER_FRAME {
            let idx = session.bytes_transferred as usize + j;
            data[j + 1] = if idx < session.total_bytes as usize { session.data[idx] } else { 0xFF };
        }
        frames.push(Frame {
            id: Identifier::encode(Priority::LOWEST, PGN_TP_DT, session.source_address, session.destination_address),
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
    fn bam_send_produces_single_announce_frame() {
        let mut tp = TransportProtocol::new();
        let data = [0u8; 20];
        let frames = tp.send(0x00_FE00, &data, 0x10, BROADCAST_ADDRESS, 0, Priority::DEFAULT).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data[0], control_byte::BAM);
        assert_eq!(tp.active_session_count(), 1);
    }

    #[test]
    fn bam_paces_data_frames_on_update() {
        let mut tp = TransportProtocol::new();
        let data = [7u8; 20];
        tp.send(0x00_FE00, &data, 0x10, BROADCAST_ADDRESS, 0, Priority::DEFAULT).unwrap();
        let frames = tp.update(50);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data[0], 1);
        assert_eq!(&frames[0].data[1..7], &data[0..6]);
    }

    #[test]
    fn rts_cts_round_trip_completes() {
        let mut tp = TransportProtocol::new();
        let data = [9u8; 20];
        let rts_frames = tp.send(0x00_FE00, &data, 0x10, 0x20, 0, Priority::DEFAULT).unwrap();
        assert_eq!(rts_frames[0].data[0], control_byte::RTS);

        let cts = make_cts(0x20, 0x10, 3, 1, 0x00_FE00);
        let responses = tp.process_frame(&cts, 0);
        assert!(responses.is_empty());
        let dt_frames = tp.pending_data_frames();
        assert_eq!(dt_frames.len(), 3);
    }

    #[test]
    fn receiver_reassembles_bam_payload() {
        let mut tp = TransportProtocol::new();
        let bam = Frame {
            id: Identifier::encode(Priority::DEFAULT, PGN_TP_CM, 0x30, BROADCAST_ADDRESS),
            data: [control_byte::BAM, 10, 0, 2, 0xFF, 0x00, 0xFE, 0x00],
            length: 8,
            timestamp_us: 0,
        };
        tp.process_frame(&bam, 0);

        let dt1 = Frame {
            id: Identifier::encode(Priority::DEFAULT, PGN_TP_DT, 0x30, BROADCAST_ADDRESS),
            data: [1, 1, 2, 3, 4, 5, 6, 7],
            length: 8,
            timestamp_us: 0,
        };
        tp.process_frame(&dt1, 0);

        let dt2 = Frame {
            id: Identifier::encode(Priority::DEFAULT, PGN_TP_DT, 0x30, BROADCAST_ADDRESS),
            data: [2, 8, 9, 10, 0xFF, 0xFF, 0xFF, 0xFF],
            length: 8,
            timestamp_us: 0,
        };
        let mut completed = false;
        tp.on_complete.subscribe(move |_| completed = true);
        tp.process_frame(&dt2, 0);
        assert_eq!(tp.active_session_count(), 0);
    }
}
