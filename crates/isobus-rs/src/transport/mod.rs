//! Layer 3: multi-frame message transport (TP, ETP, Fast Packet).

pub mod etp;
pub mod fast_packet;
pub mod session;
pub mod tp;

pub use etp::ExtendedTransportProtocol;
pub use fast_packet::FastPacketProtocol;
pub use session::{SessionState, TransportAbortReason, TransportDirection, TransportSession};
pub use tp::TransportProtocol;
