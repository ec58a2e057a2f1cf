//! Task Controller client (ISO 11783-10): the Device Descriptor Object Pool
//! model and the handshake/runtime client built on top of it.

pub mod client;
pub mod ddop;

pub use client::{CommandCallback, ElementNumber, TcClient, TcClientConfig, TcServerVersion, TcState, ValueCallback};
pub use ddop::{device, device_element, device_process_data, device_property, Ddi, Ddop, DdopObject, DdopObjectType, DeviceElementType, DpdProperties, ObjectId as DdopObjectId};
