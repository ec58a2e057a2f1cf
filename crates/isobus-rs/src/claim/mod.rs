//! Layer 2: NAME-based address-claim contention (ISO 11783-5 §4.4.2).

mod claimer;
mod state;

pub use claimer::AddressClaimer;
pub use state::ClaimState;
