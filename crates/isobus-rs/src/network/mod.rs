//! Layer 4: Control Function bookkeeping, PGN dispatch, and the
//! `NetworkManager` that ties address claim and transport together.

pub mod callback;
pub mod cf;
pub mod manager;

pub use callback::CallbackRegistry;
pub use cf::{CFState, InternalCf, NameFilter, PartnerCf};
pub use manager::{NetworkConfig, NetworkManager};
