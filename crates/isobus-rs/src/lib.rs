#![cfg_attr(not(feature = "std"), no_std)]


// 'alloc' is used for dynamic allocation (e.g., Vec<u8> in frames)
extern crate alloc;

// --- Foundation Modules ---
pub mod types;
pub mod hal;
pub mod common;
pub mod log;
pub mod event;
pub mod state_machine;

// --- Data Link Layer (L1) ---
pub mod frame;
pub mod pgn;
pub mod name;

// --- Address Claim (L2) ---
pub mod claim;

// --- Multi-frame Transport (L3) ---
pub mod transport;

// --- Control Functions and Network Management (L4) ---
pub mod network;

// --- Application protocols (L5) ---
pub mod heartbeat;
pub mod power;
pub mod safety;

// --- Virtual Terminal and Task Controller clients (L7) ---
pub mod tc;
pub mod vt;

// --- Top-level Exports ---
pub use claim::{AddressClaimer, ClaimState};
pub use frame::{Codec, Frame, Identifier, Message};
pub use hal::{Error, Link};
pub use heartbeat::{HbReceiverState, HeartbeatConfig, HeartbeatProtocol, HeartbeatReceiver, HeartbeatSender};
pub use name::Name;
pub use network::{CFState, InternalCf, NameFilter, NetworkConfig, NetworkManager, PartnerCf};
pub use power::{MaintainPowerData, PowerManager, PowerState};
pub use safety::{DegradedAction, SafeState, SafetyConfig, SafetyPolicy};
pub use tc::{Ddop, TcClient, TcClientConfig, TcState};
pub use transport::{ExtendedTransportProtocol, FastPacketProtocol, TransportProtocol};
pub use types::{Address, Pgn, Priority, TimestampUs};
pub use vt::{ObjectPool, VtClient, VtClientConfig, VtState};
