use crate::hal::Error;

/// A trait for values that can be serialized into and parsed from a raw byte
/// buffer — used throughout the transport and client layers for
/// control-frame payloads (RTS/CTS/EOMA/DPO/Abort, VT/TC handshake frames).
pub trait Codec: Sized {
    /// Serializes `self` into `buffer`, returning the number of bytes
    /// written. `buffer` is always at least 8 bytes for wire frame payloads.
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, Error>;

    /// Parses an instance of `Self` from `buffer`.
    fn deserialize(buffer: &[u8]) -> Result<Self, Error>;
}
