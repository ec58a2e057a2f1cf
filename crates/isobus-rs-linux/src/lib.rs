// crates/isobus-rs-linux/src/lib.rs
#![cfg(target_os = "linux")]

use std::time::Duration;

use isobus_rs::frame::{Frame, Identifier};
use isobus_rs::hal::{Error, Link};
use isobus_rs::types::TimestampUs;
use log::{debug, warn};
use socketcan::{CanFrame, EmbeddedFrame, ExtendedId, Id, Socket, SocketOptions};

/// A `Link` implementation backed by a Linux SocketCAN interface.
///
/// Opens a raw CAN socket on the named interface (e.g. `"can0"`) and maps
/// `isobus_rs::frame::Frame`'s 29-bit extended identifier directly onto
/// `socketcan`'s `ExtendedId`.
pub struct SocketCanLink {
    socket: socketcan::CanSocket,
    name: String,
}

impl SocketCanLink {
    pub fn open(interface_name: &str) -> Result<Self, Error> {
        let socket = socketcan::CanSocket::open(interface_name).map_err(|e| {
            warn!("failed to open CAN interface '{}': {}", interface_name, e);
            Error::InterfaceDown
        })?;
        socket.set_nonblocking(true).map_err(|_| Error::DriverError)?;
        Ok(SocketCanLink { socket, name: interface_name.to_string() })
    }

    /// Opens the interface with a blocking read timeout instead of
    /// non-blocking mode, for hosts that want `recv` to park the thread.
    pub fn open_with_timeout(interface_name: &str, timeout: Duration) -> Result<Self, Error> {
        let socket = socketcan::CanSocket::open(interface_name).map_err(|_| Error::InterfaceDown)?;
        socket.set_read_timeout(timeout).map_err(|_| Error::DriverError)?;
        Ok(SocketCanLink { socket, name: interface_name.to_string() })
    }
}

impl Link for SocketCanLink {
    fn send(&mut self, frame: &Frame) -> Result<(), Error> {
        let can_id = ExtendedId::new(frame.id.raw()).ok_or(Error::InvalidData)?;
        let can_frame = CanFrame::new(Id::Extended(can_id), &frame.data[..frame.length as usize]).ok_or(Error::BufferOverflow)?;
        self.socket.write_frame(&can_frame).map_err(|e| {
            debug!("socketcan write failed on {}: {}", self.name, e);
            Error::DriverError
        })?;
        Ok(())
    }

    fn recv(&mut self) -> Result<Frame, Error> {
        match self.socket.read_frame() {
            Ok(CanFrame::Data(data_frame)) => {
                let raw_id = match data_frame.id() {
                    Id::Extended(id) => id.as_raw(),
                    Id::Standard(id) => id.as_raw() as u32,
                };
                let mut data = [0u8; 8];
                let payload = data_frame.data();
                data[..payload.len()].copy_from_slice(payload);
                Ok(Frame {
                    id: Identifier::from_raw(raw_id),
                    data,
                    length: payload.len() as u8,
                    timestamp_us: 0 as TimestampUs,
                })
            }
            Ok(_) => Err(Error::Timeout),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(Error::Timeout),
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Err(Error::Timeout),
            Err(e) => {
                debug!("socketcan read failed on {}: {}", self.name, e);
                Err(Error::SocketError)
            }
        }
    }

    fn can_send(&self) -> bool {
        true
    }

    fn can_recv(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        &self.name
    }
}
