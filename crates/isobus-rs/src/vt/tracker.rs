//! A passive mirror of VT state, built by observing VT-to-ECU traffic
//! without participating in the handshake itself (ISO 11783-6 §4).

use alloc::collections::BTreeMap;
use alloc::string::String;

use crate::event::Event;
use crate::frame::Message;
use crate::pgn::PGN_VT_TO_ECU;
use crate::types::{Address, NULL_ADDRESS};

use super::pool::ObjectId;

mod cmd {
    pub const VT_STATUS: u8 = 0xFE;
    pub const NUMERIC_VALUE_CHANGE: u8 = 0x03;
    pub const STRING_VALUE_CHANGE: u8 = 0x04;
    pub const HIDE_SHOW: u8 = 0xA0;
    pub const ENABLE_DISABLE: u8 = 0xA1;
    pub const CHANGE_ACTIVE_MASK: u8 = 0xAD;
}

const NO_MASK: ObjectId = 0xFFFF;

/// Maintains a local mirror of the active masks, tracked numeric/string
/// values, and visibility/enable state, by watching every VT-to-ECU message
/// rather than only the ones a given `VtClient` instance issued.
pub struct VtStateTracker {
    active_data_mask: ObjectId,
    active_soft_key_mask: ObjectId,
    numeric_values: BTreeMap<ObjectId, u32>,
    string_values: BTreeMap<ObjectId, String>,
    visibility: BTreeMap<ObjectId, bool>,
    enable_state: BTreeMap<ObjectId, bool>,
    vt_busy_code: u8,
    vt_address: Address,

    pub on_active_mask_changed: Event<ObjectId>,
    pub on_numeric_value_changed: Event<(ObjectId, u32)>,
    pub on_visibility_changed: Event<(ObjectId, bool)>,
    pub on_enable_state_changed: Event<(ObjectId, bool)>,
}

impl Default for VtStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl VtStateTracker {
    pub fn new() -> Self {
        VtStateTracker {
            active_data_mask: NO_MASK,
            active_soft_key_mask: NO_MASK,
            numeric_values: BTreeMap::new(),
            string_values: BTreeMap::new(),
            visibility: BTreeMap::new(),
            enable_state: BTreeMap::new(),
            vt_busy_code: 0,
            vt_address: NULL_ADDRESS,
            on_active_mask_changed: Event::new(),
            on_numeric_value_changed: Event::new(),
            on_visibility_changed: Event::new(),
            on_enable_state_changed: Event::new(),
        }
    }

    pub fn active_data_mask(&self) -> ObjectId {
        self.active_data_mask
    }

    pub fn active_soft_key_mask(&self) -> ObjectId {
        self.active_soft_key_mask
    }

    pub fn vt_address(&self) -> Address {
        self.vt_address
    }

    pub fn vt_busy_code(&self) -> u8 {
        self.vt_busy_code
    }

    pub fn numeric_value(&self, id: ObjectId) -> Option<u32> {
        self.numeric_values.get(&id).copied()
    }

    pub fn string_value(&self, id: ObjectId) -> Option<&str> {
        self.string_values.get(&id).map(|s| s.as_str())
    }

    pub fn is_visible(&self, id: ObjectId) -> Option<bool> {
        self.visibility.get(&id).copied()
    }

    pub fn is_enabled(&self, id: ObjectId) -> Option<bool> {
        self.enable_state.get(&id).copied()
    }

    pub fn set_numeric_value(&mut self, id: ObjectId, value: u32) {
        self.numeric_values.insert(id, value);
    }

    pub fn set_string_value(&mut self, id: ObjectId, value: String) {
        self.string_values.insert(id, value);
    }

    pub fn set_visibility(&mut self, id: ObjectId, visible: bool) {
        self.visibility.insert(id, visible);
    }

    pub fn set_enable_state(&mut self, id: ObjectId, enabled: bool) {
        self.enable_state.insert(id, enabled);
    }

    pub fn reset(&mut self) {
        self.active_data_mask = NO_MASK;
        self.active_soft_key_mask = NO_MASK;
        self.numeric_values.clear();
        self.string_values.clear();
        self.visibility.clear();
        self.enable_state.clear();
        self.vt_busy_code = 0;
        self.vt_address = NULL_ADDRESS;
    }

    /// Feeds one inbound message; a no-op for anything but VT-to-ECU
    /// traffic.
    pub fn process_message(&mut self, msg: &Message) {
        if msg.pgn != PGN_VT_TO_ECU || msg.data.is_empty() {
            return;
        }
        self.vt_address = msg.source;
        match msg.data[0] {
            cmd::VT_STATUS => self.handle_vt_status(msg),
            cmd::NUMERIC_VALUE_CHANGE => self.handle_numeric_change(msg),
            cmd::STRING_VALUE_CHANGE => self.handle_string_change(msg),
            cmd::HIDE_SHOW => self.handle_hide_show(msg),
            cmd::ENABLE_DISABLE => self.handle_enable_disable(msg),
            cmd::CHANGE_ACTIVE_MASK => self.handle_change_active_mask(msg),
            _ => {}
        }
    }

    fn handle_vt_status(&mut self, msg: &Message) {
        if msg.data.len() < 8 {
            return;
        }
        let new_data_mask = msg.data[2] as u16 | (msg.data[3] as u16) << 8;
        let new_sk_mask = msg.data[4] as u16 | (msg.data[5] as u16) << 8;
        self.vt_busy_code = msg.data[6];

        if new_data_mask != self.active_data_mask {
            self.active_data_mask = new_data_mask;
            self.on_active_mask_changed.emit(self.active_data_mask);
        }
        self.active_soft_key_mask = new_sk_mask;
    }

    fn handle_numeric_change(&mut self, msg: &Message) {
        if msg.data.len() < 8 {
            return;
        }
        let id = msg.data[1] as u16 | (msg.data[2] as u16) << 8;
        let value = u32::from_le_bytes([msg.data[4], msg.data[5], msg.data[6], msg.data[7]]);
        self.numeric_values.insert(id, value);
        self.on_numeric_value_changed.emit((id, value));
    }

    fn handle_string_change(&mut self, msg: &Message) {
        if msg.data.len() < 5 {
            return;
        }
        let id = msg.data[1] as u16 | (msg.data[2] as u16) << 8;
        let len = (msg.data[3] as u16 | (msg.data[4] as u16) << 8) as usize;
        let end = (5 + len).min(msg.data.len());
        let value = String::from_utf8_lossy(&msg.data[5..end]).into_owned();
        self.string_values.insert(id, value);
    }

    fn handle_hide_show(&mut self, msg: &Message) {
        if msg.data.len() < 4 {
            return;
        }
        let id = msg.data[1] as u16 | (msg.data[2] as u16) << 8;
        let visible = msg.data[3] != 0;
        self.visibility.insert(id, visible);
        self.on_visibility_changed.emit((id, visible));
    }

    fn handle_enable_disable(&mut self, msg: &Message) {
        if msg.data.len() < 4 {
            return;
        }
        let id = msg.data[1] as u16 | (msg.data[2] as u16) << 8;
        let enabled = msg.data[3] != 0;
        self.enable_state.insert(id, enabled);
        self.on_enable_state_changed.emit((id, enabled));
    }

    fn handle_change_active_mask(&mut self, msg: &Message) {
        if msg.data.len() < 5 {
            return;
        }
        let new_mask = msg.data[3] as u16 | (msg.data[4] as u16) << 8;
        if new_mask != self.active_data_mask {
            self.active_data_mask = new_mask;
            self.on_active_mask_changed.emit(self.active_data_mask);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Priority, BROADCAST_ADDRESS};

    #[test]
    fn vt_status_updates_active_mask_once() {
        let mut tracker = VtStateTracker::new();
        let mut changes = 0u32;
        tracker.on_active_mask_changed.subscribe(move |_| changes += 1);
        let msg = Message::new(PGN_VT_TO_ECU, alloc::vec![cmd::VT_STATUS, 0xFF, 5, 0, 0, 0, 0, 0xFF], 0x26, BROADCAST_ADDRESS, Priority::DEFAULT);
        tracker.process_message(&msg);
        assert_eq!(tracker.active_data_mask(), 5);
        tracker.process_message(&msg);
        assert_eq!(tracker.active_data_mask(), 5);
    }

    #[test]
    fn numeric_change_is_tracked() {
        let mut tracker = VtStateTracker::new();
        let msg = Message::new(PGN_VT_TO_ECU, alloc::vec![cmd::NUMERIC_VALUE_CHANGE, 10, 0, 0xFF, 42, 0, 0, 0], 0x26, BROADCAST_ADDRESS, Priority::DEFAULT);
        tracker.process_message(&msg);
        assert_eq!(tracker.numeric_value(10), Some(42));
    }
}
