//! Device Descriptor Object Pool model (ISO 11783-10 §D / ISO 11783-11).
//!
//! No DDOP serializer exists in the grounding source this module is built
//! against; the wire layout here follows the same length-driven pattern
//! `vt::pool` uses for VT objects, specialized to the five DDOP element
//! types ISO 11783-11 defines.

use alloc::string::String;
use alloc::vec::Vec;

use crate::hal::Error;

pub type ObjectId = u16;
pub type Ddi = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DdopObjectType {
    Device = 0,
    DeviceElement = 1,
    DeviceProcessData = 2,
    DeviceProperty = 3,
    DeviceValuePresentation = 4,
}

impl DdopObjectType {
    fn from_raw(raw: u8) -> Result<Self, Error> {
        match raw {
            0 => Ok(DdopObjectType::Device),
            1 => Ok(DdopObjectType::DeviceElement),
            2 => Ok(DdopObjectType::DeviceProcessData),
            3 => Ok(DdopObjectType::DeviceProperty),
            4 => Ok(DdopObjectType::DeviceValuePresentation),
            _ => Err(Error::PoolError),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceElementType {
    Device = 1,
    Function = 2,
    Bin = 3,
    Section = 4,
    Unit = 5,
    Connector = 6,
    NavigationReference = 7,
}

impl DeviceElementType {
    fn from_raw(raw: u8) -> Result<Self, Error> {
        match raw {
            1 => Ok(DeviceElementType::Device),
            2 => Ok(DeviceElementType::Function),
            3 => Ok(DeviceElementType::Bin),
            4 => Ok(DeviceElementType::Section),
            5 => Ok(DeviceElementType::Unit),
            6 => Ok(DeviceElementType::Connector),
            7 => Ok(DeviceElementType::NavigationReference),
            _ => Err(Error::PoolError),
        }
    }
}

bitflags::bitflags! {
    /// DPD properties bitmask (ISO 11783-11 Annex A): settable and
    /// control-source flags client implementations actually check.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DpdProperties: u8 {
        const SETTABLE = 0x01;
        const CONTROL_SOURCE = 0x02;
    }
}

/// One node in a Device Descriptor Object Pool.
///
/// Wire layout: `id(LE16) | object_type(1) | body_len(LE16) | body`. Unlike
/// `vt::pool::VtObject`, DDOP parent/child relationships for elements are
/// encoded in the `DeviceElement` body itself (ISO 11783-11 §B.4), not as a
/// trailing child list.
#[derive(Debug, Clone)]
pub struct DdopObject {
    pub id: ObjectId,
    pub object_type: DdopObjectType,
    pub body: Vec<u8>,
}

impl DdopObject {
    fn serialize(&self, out: &mut Vec<u8>) {
        out.push((self.id & 0xFF) as u8);
        out.push(((self.id >> 8) & 0xFF) as u8);
        out.push(self.object_type as u8);
        let len = self.body.len() as u16;
        out.push((len & 0xFF) as u8);
        out.push(((len >> 8) & 0xFF) as u8);
        out.extend_from_slice(&self.body);
    }
}

/// Builds the `Device` designator object: a unique structure label and a
/// localization label, per ISO 11783-11 §B.1.
pub fn device(id: ObjectId, designator: &str, software_version: &str) -> DdopObject {
    let mut body = Vec::new();
    push_string(&mut body, designator);
    push_string(&mut body, software_version);
    body.extend_from_slice(&[0u8; 7]);
    DdopObject { id, object_type: DdopObjectType::Device, body }
}

/// Builds a `DeviceElement`: a functional part of the implement (a boom, a
/// section, a unit...) with a parent reference for the tree ISO 11783-11
/// §B.2 describes.
pub fn device_element(id: ObjectId, element_type: DeviceElementType, designator: &str, parent_id: ObjectId, element_number: u16) -> DdopObject {
    let mut body = Vec::new();
    body.push(element_type as u8);
    push_string(&mut body, designator);
    body.push((parent_id & 0xFF) as u8);
    body.push(((parent_id >> 8) & 0xFF) as u8);
    body.push((element_number & 0xFF) as u8);
    body.push(((element_number >> 8) & 0xFF) as u8);
    DdopObject { id, object_type: DdopObjectType::DeviceElement, body }
}

/// Builds a `DeviceProcessData`: one controllable or readable value
/// identified by a DDI, with properties/trigger methods (ISO 11783-11 §B.3).
pub fn device_process_data(id: ObjectId, ddi: Ddi, designator: &str, properties: DpdProperties, trigger_methods: u8) -> DdopObject {
    let mut body = Vec::new();
    body.push((ddi & 0xFF) as u8);
    body.push(((ddi >> 8) & 0xFF) as u8);
    push_string(&mut body, designator);
    body.push(properties.bits());
    body.push(trigger_methods);
    DdopObject { id, object_type: DdopObjectType::DeviceProcessData, body }
}

/// Builds a `DeviceProperty`: a fixed value that does not change at runtime
/// (e.g. a configured working width), per ISO 11783-11 §B.4.
pub fn device_property(id: ObjectId, ddi: Ddi, value: i32, designator: &str) -> DdopObject {
    let mut body = Vec::new();
    body.push((ddi & 0xFF) as u8);
    body.push(((ddi >> 8) & 0xFF) as u8);
    body.extend_from_slice(&value.to_le_bytes());
    push_string(&mut body, designator);
    DdopObject { id, object_type: DdopObjectType::DeviceProperty, body }
}

fn push_string(body: &mut Vec<u8>, s: &str) {
    let len = s.len() as u8;
    body.push(len);
    body.extend_from_slice(s.as_bytes());
}

/// A complete Device Descriptor Object Pool destined for one Task Controller.
#[derive(Debug, Clone, Default)]
pub struct Ddop {
    objects: Vec<DdopObject>,
}

impl Ddop {
    pub fn new() -> Self {
        Ddop { objects: Vec::new() }
    }

    pub fn add(&mut self, obj: DdopObject) -> Result<(), Error> {
        if self.objects.iter().any(|o| o.id == obj.id) {
            return Err(Error::InvalidState);
        }
        self.objects.push(obj);
        Ok(())
    }

    pub fn find(&self, id: ObjectId) -> Option<&DdopObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn objects(&self) -> &[DdopObject] {
        &self.objects
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for obj in &self.objects {
            obj.serialize(&mut out);
        }
        out
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, Error> {
        let mut ddop = Ddop::new();
        let mut offset = 0usize;
        while offset + 5 <= data.len() {
            let id = data[offset] as u16 | (data[offset + 1] as u16) << 8;
            let object_type = DdopObjectType::from_raw(data[offset + 2])?;
            let body_len = data[offset + 3] as usize | (data[offset + 4] as usize) << 8;
            offset += 5;
            if offset + body_len > data.len() {
                return Err(Error::PoolError);
            }
            let body = data[offset..offset + body_len].to_vec();
            offset += body_len;
            ddop.add(DdopObject { id, object_type, body }).map_err(|_| Error::PoolError)?;
        }
        Ok(ddop)
    }

    /// Validates the structural invariants a Task Controller expects before
    /// accepting a pool: exactly one top-level `Device`, every
    /// `DeviceElement` resolves its declared parent, and every DDI on a
    /// `DeviceProcessData`/`DeviceProperty` object is unique.
    pub fn validate(&self) -> Result<(), Error> {
        let device_count = self.objects.iter().filter(|o| o.object_type == DdopObjectType::Device).count();
        if device_count != 1 {
            return Err(Error::PoolValidation);
        }

        for obj in &self.objects {
            if obj.object_type == DdopObjectType::DeviceElement && obj.body.len() >= 2 + obj.body.get(1).copied().unwrap_or(0) as usize + 2 {
                let designator_len = obj.body.get(1).copied().unwrap_or(0) as usize;
                let parent_offset = 2 + designator_len;
                if parent_offset + 2 > obj.body.len() {
                    return Err(Error::PoolValidation);
                }
                let parent_id = obj.body[parent_offset] as u16 | (obj.body[parent_offset + 1] as u16) << 8;
                let is_root = parent_id == obj.id;
                if !is_root && self.find(parent_id).is_none() {
                    return Err(Error::PoolValidation);
                }
            }
        }

        let mut seen_ddis: Vec<Ddi> = Vec::new();
        for obj in &self.objects {
            if obj.object_type == DdopObjectType::DeviceProcessData || obj.object_type == DdopObjectType::DeviceProperty {
                if obj.body.len() < 2 {
                    return Err(Error::PoolValidation);
                }
                let ddi = obj.body[0] as u16 | (obj.body[1] as u16) << 8;
                if seen_ddis.contains(&ddi) {
                    return Err(Error::PoolValidation);
                }
                seen_ddis.push(ddi);
            }
        }

        Ok(())
    }

    pub fn designator(&self) -> Option<String> {
        let device_obj = self.objects.iter().find(|o| o.object_type == DdopObjectType::Device)?;
        let len = *device_obj.body.first()? as usize;
        let designator = device_obj.body.get(1..1 + len)?;
        Some(String::from_utf8_lossy(designator).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ddop() -> Ddop {
        let mut ddop = Ddop::new();
        ddop.add(device(0, "Sprayer", "1.0.0")).unwrap();
        ddop.add(device_element(1, DeviceElementType::Device, "Main", 1, 0)).unwrap();
        ddop.add(device_element(2, DeviceElementType::Section, "Section 1", 1, 1)).unwrap();
        ddop.add(device_process_data(3, 0x0001, "Actual Rate", DpdProperties::SETTABLE, 4)).unwrap();
        ddop
    }

    #[test]
    fn round_trips_through_serialize_and_deserialize() {
        let ddop = sample_ddop();
        let bytes = ddop.serialize();
        let parsed = Ddop::deserialize(&bytes).unwrap();
        assert_eq!(parsed.len(), 4);
        assert_eq!(parsed.designator().unwrap(), "Sprayer");
    }

    #[test]
    fn validate_requires_exactly_one_device() {
        let mut ddop = Ddop::new();
        ddop.add(device_element(1, DeviceElementType::Device, "Main", 1, 0)).unwrap();
        assert_eq!(ddop.validate().unwrap_err(), Error::PoolValidation);
    }

    #[test]
    fn validate_rejects_duplicate_ddi() {
        let mut ddop = sample_ddop();
        ddop.add(device_process_data(4, 0x0001, "Duplicate", DpdProperties::empty(), 0)).unwrap();
        assert_eq!(ddop.validate().unwrap_err(), Error::PoolValidation);
    }

    #[test]
    fn validate_passes_for_well_formed_ddop() {
        assert!(sample_ddop().validate().is_ok());
    }

    #[test]
    fn rejects_duplicate_object_id() {
        let mut ddop = Ddop::new();
        ddop.add(device(0, "A", "1.0")).unwrap();
        assert!(ddop.add(device(0, "B", "1.0")).is_err());
    }
}
