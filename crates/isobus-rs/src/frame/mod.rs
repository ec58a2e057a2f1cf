//! Layer 1: the 29-bit identifier codec, the physical `Frame`, and the
//! decoded logical `Message` that the transport layer assembles frames into.

pub mod codec;
pub mod identifier;
pub mod message;

mod frame;

pub use codec::Codec;
pub use frame::Frame;
pub use identifier::Identifier;
pub use message::Message;
