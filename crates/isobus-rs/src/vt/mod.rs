//! Virtual Terminal client (ISO 11783-6): object pool model, the handshake
//! and runtime command client, a passive state tracker, and a dedup/batch
//! convenience layer on top of both.

pub mod client;
pub mod pool;
pub mod tracker;
pub mod update_helper;

pub use client::{ActivationCode, VtClient, VtClientConfig, VtMacro, VtState, VtVersion};
pub use pool::{ObjectId, ObjectPool, ObjectType, VtObject};
pub use tracker::VtStateTracker;
pub use update_helper::VtUpdateHelper;
