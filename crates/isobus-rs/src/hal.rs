// crates/isobus-rs/src/hal.rs
use crate::frame::Frame;
use core::fmt;

/// The closed error taxonomy for every fallible operation in the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A wait (address claim guard, handshake step, session) expired.
    Timeout,
    /// This Control Function could not claim any address.
    AddressClaimFailed,
    /// Another Control Function is occupying our claimed address.
    AddressConflict,
    /// A transport session was aborted, locally or by the peer.
    TransportAborted,
    /// A transport session timed out waiting for its next frame.
    TransportTimeout,
    /// A PGN value is out of range or not recognized for the operation.
    InvalidPgn,
    /// An address value is out of range for the operation (e.g. broadcast
    /// where a unicast destination was required).
    InvalidAddress,
    /// A received frame's payload could not be parsed.
    InvalidData,
    /// A payload exceeds the protocol's maximum size.
    BufferOverflow,
    /// The operation requires a claimed address and none is held.
    NotConnected,
    /// The operation is not valid in the component's current state.
    InvalidState,
    /// An object pool or DDOP byte stream could not be parsed.
    PoolError,
    /// An object pool or DDOP failed its structural invariants.
    PoolValidation,
    /// A session already exists for the given (source, destination, PGN, port).
    SessionExists,
    /// No free session slot or buffer was available.
    NoResources,
    /// The underlying Link reported a driver-level failure.
    DriverError,
    /// The underlying Link reported a socket-level failure.
    SocketError,
    /// The underlying network interface is administratively or physically down.
    InterfaceDown,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "operation timed out"),
            Self::AddressClaimFailed => write!(f, "address claim failed"),
            Self::AddressConflict => write!(f, "address conflict with another control function"),
            Self::TransportAborted => write!(f, "transport session aborted"),
            Self::TransportTimeout => write!(f, "transport session timed out"),
            Self::InvalidPgn => write!(f, "invalid PGN"),
            Self::InvalidAddress => write!(f, "invalid address"),
            Self::InvalidData => write!(f, "invalid data"),
            Self::BufferOverflow => write!(f, "buffer overflow"),
            Self::NotConnected => write!(f, "not connected (no claimed address)"),
            Self::InvalidState => write!(f, "invalid state for this operation"),
            Self::PoolError => write!(f, "object pool parse error"),
            Self::PoolValidation => write!(f, "object pool failed validation"),
            Self::SessionExists => write!(f, "a session already exists for this key"),
            Self::NoResources => write!(f, "no resources available"),
            Self::DriverError => write!(f, "driver error"),
            Self::SocketError => write!(f, "socket error"),
            Self::InterfaceDown => write!(f, "interface down"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl From<core::array::TryFromSliceError> for Error {
    fn from(_: core::array::TryFromSliceError) -> Self {
        Error::InvalidData
    }
}

/// Hardware/driver abstraction for a single physical CAN port.
///
/// This trait is the boundary named "the Link" in the design: the core never
/// touches a socket, a kernel driver, or a hardware peripheral directly.
pub trait Link {
    /// Attempts to transmit `frame`. Must not block.
    fn send(&mut self, frame: &Frame) -> Result<(), Error>;

    /// Attempts to receive the next pending frame. Must not block; returns
    /// `Err(Error::Timeout)` when nothing is currently available.
    fn recv(&mut self) -> Result<Frame, Error>;

    /// Whether a call to `send` is currently expected to succeed.
    fn can_send(&self) -> bool;

    /// Whether a call to `recv` is currently expected to return a frame.
    fn can_recv(&self) -> bool;

    /// A human-readable identifier for logs and diagnostics (e.g. `"can0"`).
    fn name(&self) -> &str;
}
