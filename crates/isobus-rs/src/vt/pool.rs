//! The VT object pool model: a flat list of objects, each with a type, an
//! opaque body, and a list of child object references (ISO 11783-6 §4,
//! Annex F).

use alloc::vec::Vec;

use crate::hal::Error;

pub type ObjectId = u16;

/// VT object type codes (ISO 11783-6 Table A.1), only as far as this client
/// needs to reason about pool structure (masks vs. everything else).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectType {
    WorkingSet = 0,
    DataMask = 1,
    AlarmMask = 2,
    Container = 3,
    SoftKeyMask = 4,
    Key = 5,
    Button = 6,
    InputBoolean = 7,
    InputString = 8,
    InputNumber = 9,
    InputList = 10,
    OutputString = 11,
    OutputNumber = 12,
    Line = 13,
    Rectangle = 14,
    Ellipse = 15,
    Polygon = 16,
    Meter = 17,
    LinearBarGraph = 18,
    ArchedBarGraph = 19,
    PictureGraphic = 20,
    NumberVariable = 21,
    StringVariable = 22,
    FontAttributes = 23,
    LineAttributes = 24,
    FillAttributes = 25,
    InputAttributes = 26,
    ObjectPointer = 27,
    Macro = 28,
    Other = 255,
}

impl ObjectType {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => ObjectType::WorkingSet,
            1 => ObjectType::DataMask,
            2 => ObjectType::AlarmMask,
            3 => ObjectType::Container,
            4 => ObjectType::SoftKeyMask,
            5 => ObjectType::Key,
            6 => ObjectType::Button,
            7 => ObjectType::InputBoolean,
            8 => ObjectType::InputString,
            9 => ObjectType::InputNumber,
            10 => ObjectType::InputList,
            11 => ObjectType::OutputString,
            12 => ObjectType::OutputNumber,
            13 => ObjectType::Line,
            14 => ObjectType::Rectangle,
            15 => ObjectType::Ellipse,
            16 => ObjectType::Polygon,
            17 => ObjectType::Meter,
            18 => ObjectType::LinearBarGraph,
            19 => ObjectType::ArchedBarGraph,
            20 => ObjectType::PictureGraphic,
            21 => ObjectType::NumberVariable,
            22 => ObjectType::StringVariable,
            23 => ObjectType::FontAttributes,
            24 => ObjectType::LineAttributes,
            25 => ObjectType::FillAttributes,
            26 => ObjectType::InputAttributes,
            27 => ObjectType::ObjectPointer,
            28 => ObjectType::Macro,
            _ => ObjectType::Other,
        }
    }
}

/// One object in a pool.
///
/// Wire layout (length-driven, ISO 11783-6 Annex F):
/// `id(LE16) | type(1) | body_len(LE16) | body | [children_count(LE16) |
/// children(LE16 each)]` when the object has children, body otherwise.
#[derive(Debug, Clone)]
pub struct VtObject {
    pub id: ObjectId,
    pub object_type: ObjectType,
    pub body: Vec<u8>,
    pub children: Vec<ObjectId>,
}

impl VtObject {
    pub fn new(id: ObjectId, object_type: ObjectType) -> Self {
        VtObject { id, object_type, body: Vec::new(), children: Vec::new() }
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_children(mut self, children: Vec<ObjectId>) -> Self {
        self.children = children;
        self
    }

    pub fn add_child(mut self, child: ObjectId) -> Self {
        self.children.push(child);
        self
    }

    fn serialize(&self, out: &mut Vec<u8>) {
        out.push((self.id & 0xFF) as u8);
        out.push(((self.id >> 8) & 0xFF) as u8);
        out.push(self.object_type as u8);

        let children_size = if self.children.is_empty() { 0 } else { 2 + self.children.len() * 2 };
        let body_len = (self.body.len() + children_size) as u16;
        out.push((body_len & 0xFF) as u8);
        out.push(((body_len >> 8) & 0xFF) as u8);

        out.extend_from_slice(&self.body);
        if !self.children.is_empty() {
            let count = self.children.len() as u16;
            out.push((count & 0xFF) as u8);
            out.push(((count >> 8) & 0xFF) as u8);
            for child in &self.children {
                out.push((child & 0xFF) as u8);
                out.push(((child >> 8) & 0xFF) as u8);
            }
        }
    }
}

/// A complete object pool destined for one VT working set.
#[derive(Debug, Clone, Default)]
pub struct ObjectPool {
    objects: Vec<VtObject>,
}

impl ObjectPool {
    pub fn new() -> Self {
        ObjectPool { objects: Vec::new() }
    }

    /// Adds `obj`. Returns `Err(Error::InvalidState)` if an object with the
    /// same id is already present.
    pub fn add(&mut self, obj: VtObject) -> Result<(), Error> {
        if self.objects.iter().any(|o| o.id == obj.id) {
            return Err(Error::InvalidState);
        }
        self.objects.push(obj);
        Ok(())
    }

    pub fn find(&self, id: ObjectId) -> Option<&VtObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn objects(&self) -> &[VtObject] {
        &self.objects
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for obj in &self.objects {
            obj.serialize(&mut out);
        }
        out
    }

    /// Parses a pool back from its wire form. Used by tests and by hosts
    /// that want to round-trip a pool loaded from storage.
    pub fn deserialize(data: &[u8]) -> Result<Self, Error> {
        let mut pool = ObjectPool::new();
        let mut offset = 0usize;
        while offset + 5 <= data.len() {
            let id = data[offset] as u16 | (data[offset + 1] as u16) << 8;
            let object_type = ObjectType::from_raw(data[offset + 2]);
            let body_len = data[offset + 3] as usize | (data[offset + 4] as usize) << 8;
            offset += 5;
            if offset + body_len > data.len() {
                return Err(Error::PoolError);
            }
            let body = data[offset..offset + body_len].to_vec();
            offset += body_len;
            pool.add(VtObject { id, object_type, body, children: Vec::new() }).map_err(|_| Error::PoolError)?;
        }
        Ok(pool)
    }

    /// Validates the structural invariants ISO 11783-6 §4.6.8 requires
    /// before a pool may be uploaded: exactly one Working Set object, every
    /// child reference resolves, and the Working Set references at least
    /// one Data Mask or Alarm Mask.
    pub fn validate(&self) -> Result<(), Error> {
        let ws_count = self.objects.iter().filter(|o| o.object_type == ObjectType::WorkingSet).count();
        if ws_count != 1 {
            return Err(Error::PoolValidation);
        }

        for obj in &self.objects {
            for child in &obj.children {
                if self.find(*child).is_none() {
                    return Err(Error::PoolValidation);
                }
            }
        }

        let working_set = self.objects.iter().find(|o| o.object_type == ObjectType::WorkingSet).unwrap();
        let has_mask = working_set.children.iter().any(|child_id| {
            self.find(*child_id).map(|c| c.object_type == ObjectType::DataMask || c.object_type == ObjectType::AlarmMask).unwrap_or(false)
        });
        if !has_mask {
            return Err(Error::PoolValidation);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pool() -> ObjectPool {
        let mut pool = ObjectPool::new();
        pool.add(VtObject::new(1, ObjectType::WorkingSet).add_child(2)).unwrap();
        pool.add(VtObject::new(2, ObjectType::DataMask)).unwrap();
        pool
    }

    #[test]
    fn round_trips_through_serialize_and_deserialize() {
        let pool = sample_pool();
        let bytes = pool.serialize();
        let parsed = ObjectPool::deserialize(&bytes).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.find(1).unwrap().object_type, ObjectType::WorkingSet);
    }

    #[test]
    fn rejects_duplicate_object_id() {
        let mut pool = ObjectPool::new();
        pool.add(VtObject::new(1, ObjectType::WorkingSet)).unwrap();
        assert!(pool.add(VtObject::new(1, ObjectType::DataMask)).is_err());
    }

    #[test]
    fn validate_requires_exactly_one_working_set() {
        let mut pool = ObjectPool::new();
        pool.add(VtObject::new(2, ObjectType::DataMask)).unwrap();
        assert_eq!(pool.validate().unwrap_err(), Error::PoolValidation);
    }

    #[test]
    fn validate_requires_working_set_to_reference_a_mask() {
        let mut pool = ObjectPool::new();
        pool.add(VtObject::new(1, ObjectType::WorkingSet)).unwrap();
        assert_eq!(pool.validate().unwrap_err(), Error::PoolValidation);
    }

    #[test]
    fn validate_rejects_orphan_child_reference() {
        let mut pool = ObjectPool::new();
        pool.add(VtObject::new(1, ObjectType::WorkingSet).add_child(99)).unwrap();
        assert_eq!(pool.validate().unwrap_err(), Error::PoolValidation);
    }

    #[test]
    fn validate_passes_for_well_formed_pool() {
        assert!(sample_pool().validate().is_ok());
    }
}
