//! Protocol-wide timing and size constants (ISO 11783-5, -7, -9, SAE J1939-21).

/// Address-claim guard window, before the RTxD jitter is added.
pub const ADDRESS_CLAIM_TIMEOUT_MS: u32 = 250;
/// Upper bound of the RTxD jitter added to the address-claim guard window.
pub const ADDRESS_CLAIM_RTXD_MAX_MS: u32 = 153;

/// TP: time to wait for the next data frame while receiving.
pub const TP_TIMEOUT_T1_MS: u32 = 750;
/// TP: time to wait for CTS after requesting more data.
pub const TP_TIMEOUT_T2_MS: u32 = 1250;
/// TP: time to wait for CTS or EOMA while sending.
pub const TP_TIMEOUT_T3_MS: u32 = 1250;
/// TP: time to wait between CTS and the first resulting data frame.
pub const TP_TIMEOUT_T4_MS: u32 = 1050;
/// Minimum spacing between two BAM data frames.
pub const TP_BAM_INTER_PACKET_MS: u32 = 50;
/// Number of payload bytes carried by each TP/ETP data frame.
pub const TP_BYTES_PER_FRAME: usize = 7;
/// Largest payload TP can carry; above this ETP is required.
pub const TP_MAX_DATA_LENGTH: u32 = 1785;
/// Largest window a single CTS may open.
pub const TP_MAX_PACKETS_PER_CTS: u8 = 16;
/// Receiver re-send period for a CTS hold (num_packets = 0).
pub const TP_CTS_HOLD_REPEAT_MS: u32 = 500;

/// ETP: single timeout threshold covering every waiting state.
pub const ETP_TIMEOUT_T1_MS: u32 = 750;
/// Largest payload ETP can carry.
pub const ETP_MAX_DATA_LENGTH: u32 = 117_440_505;

/// Fast Packet: session idle timeout before a stalled session is pruned.
pub const FAST_PACKET_TIMEOUT_MS: u32 = 750;
/// Fast Packet: maximum payload across all frames of one session.
pub const FAST_PACKET_MAX_DATA: usize = 223;
/// Fast Packet: payload bytes carried by the first frame of a session.
pub const FAST_PACKET_FIRST_FRAME_DATA: usize = 6;
/// Fast Packet: payload bytes carried by each subsequent frame.
pub const FAST_PACKET_SUBSEQUENT_FRAME_DATA: usize = 7;

/// Heartbeat emission interval.
pub const HEARTBEAT_INTERVAL_MS: u32 = 100;
/// Heartbeat receiver: silence after which the source is considered lost.
pub const HEARTBEAT_COMM_ERROR_TIMEOUT_MS: u32 = 300;
/// Heartbeat receiver: consecutive correct sequences required to leave SequenceError.
pub const HEARTBEAT_RECOVERY_COUNT: u32 = 8;
/// Heartbeat receiver: forward jump beyond which a sequence is considered an error.
pub const HEARTBEAT_MAX_JUMP: u8 = 3;

/// Power manager: minimum key-off hold before a maintain decision is made.
pub const POWER_SHUTDOWN_MIN_MS: u32 = 2_000;
/// Power manager: period at which a CF re-asserts its maintain-power request.
pub const POWER_MAINTAIN_REPEAT_MS: u32 = 1_000;
/// Power manager: absolute ceiling on how long power may be maintained.
pub const POWER_MAX_EXTENSION_MS: u32 = 180_000;

/// Default wait for a VT or TC handshake step before falling back to Disconnected.
pub const CLIENT_HANDSHAKE_TIMEOUT_MS: u32 = 6_000;
