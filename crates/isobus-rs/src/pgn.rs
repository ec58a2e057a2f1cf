//! Wire PGN constants used by the core (ISO 11783-3/-5/-6/-7/-9, SAE J1939-21).
//!
//! These values are part of the wire protocol and must stay exact; any
//! deviation breaks interoperability with real VT/TC servers and other ECUs.

use crate::types::Pgn;

/// Request for a specific PGN (used to request Address Claimed on startup).
pub const PGN_REQUEST: Pgn = 0x00_EA00;
/// Address Claimed.
pub const PGN_ADDRESS_CLAIMED: Pgn = 0x00_EE00;
/// Acknowledgment (ACK/NACK).
pub const PGN_ACKNOWLEDGMENT: Pgn = 0x00_E800;

/// Transport Protocol data transfer.
pub const PGN_TP_DT: Pgn = 0x00_EB00;
/// Transport Protocol connection management (RTS/CTS/EOMA/BAM/Abort).
pub const PGN_TP_CM: Pgn = 0x00_EC00;
/// Extended Transport Protocol data transfer.
pub const PGN_ETP_DT: Pgn = 0x00_C700;
/// Extended Transport Protocol connection management (RTS/CTS/DPO/EOMA/Abort).
pub const PGN_ETP_CM: Pgn = 0x00_C800;

/// Virtual Terminal to ECU.
pub const PGN_VT_TO_ECU: Pgn = 0x00_E700;
/// ECU to Virtual Terminal.
pub const PGN_ECU_TO_VT: Pgn = 0x00_E600;

/// Task Controller to ECU (also used by the ECU-to-client direction in the
/// ISO 11783-10 process data PGN).
pub const PGN_TC_TO_ECU: Pgn = 0x00_CB00;
/// ECU to Task Controller.
pub const PGN_ECU_TO_TC: Pgn = 0x00_CA00;

/// Maintain Power request / key-switch broadcast (ISO 11783-9 §4.6).
pub const PGN_MAINTAIN_POWER: Pgn = 0x00_FE0C;

/// File Server to client.
pub const PGN_FS_TO_CLIENT: Pgn = 0x00_AB00;
/// Client to File Server.
pub const PGN_CLIENT_TO_FS: Pgn = 0x00_AA00;

/// Diagnostic message 1 (active DTCs).
pub const PGN_DM1: Pgn = 0x00_FECA;

/// Heartbeat (ISO 11783-7 §8).
pub const PGN_HEARTBEAT: Pgn = 0x00_FE0E;

/// Working Set Master maintenance message, sent once by a working set's
/// master Control Function at the start of a VT/TC handshake (ISO 11783-6
/// Annex B.7 / ISO 11783-10).
pub const PGN_WORKING_SET_MASTER: Pgn = 0x00_FE0D;
