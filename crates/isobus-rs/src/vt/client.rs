//! The VT Client: drives the Virtual Terminal connection handshake and the
//! runtime command surface used once connected (ISO 11783-6).

use alloc::string::String;
use alloc::vec::Vec;

use crate::event::Event;
use crate::frame::Message;
use crate::hal::{Error, Link};
use crate::log::{isobus_debug, isobus_error, isobus_info, isobus_warn, LogContext};
use crate::network::NetworkManager;
use crate::pgn::{PGN_ECU_TO_VT, PGN_VT_TO_ECU, PGN_WORKING_SET_MASTER};
use crate::state_machine::StateMachine;
use crate::types::{Address, Priority, NULL_ADDRESS};

use super::pool::{ObjectId, ObjectPool, ObjectType};

fn ctx() -> LogContext {
    LogContext { component: "vt.client", port: 0 }
}

mod cmd {
    pub const SOFT_KEY_ACTIVATION: u8 = 0x00;
    pub const BUTTON_ACTIVATION: u8 = 0x01;
    pub const NUMERIC_VALUE_CHANGE: u8 = 0x03;
    pub const STRING_VALUE_CHANGE: u8 = 0x04;
    pub const VT_ESC: u8 = 0x09;
    pub const VT_STATUS: u8 = 0xFE;

    pub const HIDE_SHOW: u8 = 0xA0;
    pub const ENABLE_DISABLE: u8 = 0xA1;
    pub const CONTROL_AUDIO_SIGNAL: u8 = 0xA3;
    pub const CHANGE_SIZE: u8 = 0xA4;
    pub const CHANGE_BACKGROUND_COLOUR: u8 = 0xA5;
    pub const CHANGE_CHILD_LOCATION: u8 = 0xA6;
    pub const CHANGE_NUMERIC_VALUE: u8 = 0xA8;
    pub const CHANGE_ACTIVE_MASK: u8 = 0xAD;
    pub const CHANGE_SOFT_KEY_MASK: u8 = 0xAE;
    pub const CHANGE_ATTRIBUTE: u8 = 0xAF;
    pub const CHANGE_LIST_ITEM: u8 = 0xB0;
    pub const CHANGE_STRING_VALUE: u8 = 0xB3;
    pub const LOCK_UNLOCK_MASK: u8 = 0xBD;
    pub const EXECUTE_MACRO: u8 = 0xBE;

    pub const GET_MEMORY: u8 = 0xC0;
    pub const GET_MEMORY_RESPONSE: u8 = 0xC0;
    pub const STORE_VERSION: u8 = 0xC1;
    pub const LOAD_VERSION: u8 = 0xC2;
    pub const END_OF_POOL: u8 = 0xC3;
    pub const DELETE_VERSION: u8 = 0xC5;
    pub const GET_VERSIONS: u8 = 0xC7;
    pub const GET_VERSIONS_RESPONSE: u8 = 0xC8;
    pub const OBJECT_POOL_TRANSFER: u8 = 0x11;

    pub const EXTENDED_GET_VERSIONS: u8 = 0xC0;
    pub const EXTENDED_STORE_VERSION: u8 = 0xC1;
    pub const EXTENDED_LOAD_VERSION: u8 = 0xC2;
    pub const EXTENDED_DELETE_VERSION: u8 = 0xC3;
    pub const EXTENDED_GET_VERSIONS_RESPONSE: u8 = 0xC4;
    pub const EXTENDED_VERSION_SUBFUNCTION: u8 = 0xFE;
    pub const EXTENDED_VERSION_LABEL_SIZE: usize = 32;
    pub const CLASSIC_VERSION_LABEL_SIZE: usize = 7;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VtState {
    Disconnected,
    WaitForVtStatus,
    SendWorkingSetMaster,
    SendGetMemory,
    WaitForMemory,
    UploadPool,
    WaitForPoolActivate,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VtVersion {
    Version3 = 3,
    Version4 = 4,
    Version5 = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationCode {
    Released = 0,
    Pressed = 1,
    Held = 2,
    Aborted = 3,
}

impl ActivationCode {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => ActivationCode::Pressed,
            2 => ActivationCode::Held,
            3 => ActivationCode::Aborted,
            _ => ActivationCode::Released,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VtClientConfig {
    pub timeout_ms: u32,
    pub preferred_version: VtVersion,
}

impl Default for VtClientConfig {
    fn default() -> Self {
        VtClientConfig { timeout_ms: crate::common::CLIENT_HANDSHAKE_TIMEOUT_MS, preferred_version: VtVersion::Version4 }
    }
}

impl VtClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout_ms(mut self, ms: u32) -> Self {
        self.timeout_ms = ms;
        self
    }

    pub fn preferred_version(mut self, version: VtVersion) -> Self {
        self.preferred_version = version;
        self
    }
}

/// A named macro: an ordered sequence of raw VT command byte strings run by
/// the VT when `execute_macro` is sent or a mask triggers it.
#[derive(Debug, Clone)]
pub struct VtMacro {
    pub macro_id: ObjectId,
    pub commands: Vec<Vec<u8>>,
}

/// Drives one Virtual Terminal connection: handshake, object pool upload,
/// and the runtime command/notification surface.
///
/// Does not own a `NetworkManager` - every method that needs to send or has
/// just received a frame takes one by `&mut` reference for the duration of
/// the call, so it composes with whatever owns the manager (typically the
/// host's main loop) without a long-lived borrow.
pub struct VtClient {
    cf_handle: usize,
    config: VtClientConfig,
    state: StateMachine<VtState>,
    pool: ObjectPool,
    timer_ms: u32,
    vt_address: Address,
    vt_version: u8,
    extended_version_label: String,
    vt_supports_extended_versions: bool,
    is_active_ws: bool,
    macros: Vec<VtMacro>,

    pub on_soft_key: Event<(ObjectId, ActivationCode)>,
    pub on_button: Event<(ObjectId, ActivationCode)>,
    pub on_numeric_value_change: Event<(ObjectId, u32)>,
    pub on_string_value_change: Event<(ObjectId, String)>,
    pub on_state_change: Event<VtState>,
    pub on_macro_executed: Event<ObjectId>,
    pub on_pool_error: Event<u8>,
    pub on_versions_received: Event<Vec<String>>,
    pub on_store_version_response: Event<(bool, u8)>,
    pub on_load_version_response: Event<(bool, u8)>,
    pub on_active_ws_status: Event<bool>,
}

impl VtClient {
    pub fn new(cf_handle: usize, config: VtClientConfig) -> Self {
        VtClient {
            cf_handle,
            config,
            state: StateMachine::new(VtState::Disconnected),
            pool: ObjectPool::new(),
            timer_ms: 0,
            vt_address: NULL_ADDRESS,
            vt_version: 0,
            extended_version_label: String::new(),
            vt_supports_extended_versions: false,
            is_active_ws: false,
            macros: Vec::new(),
            on_soft_key: Event::new(),
            on_button: Event::new(),
            on_numeric_value_change: Event::new(),
            on_string_value_change: Event::new(),
            on_state_change: Event::new(),
            on_macro_executed: Event::new(),
            on_pool_error: Event::new(),
            on_versions_received: Event::new(),
            on_store_version_response: Event::new(),
            on_load_version_response: Event::new(),
            on_active_ws_status: Event::new(),
        }
    }

    pub fn set_object_pool(&mut self, pool: ObjectPool) {
        self.pool = pool;
    }

    pub fn state(&self) -> VtState {
        self.state.state()
    }

    pub fn is_active_ws(&self) -> bool {
        self.is_active_ws
    }

    pub fn vt_supports_extended_versions(&self) -> bool {
        self.vt_supports_extended_versions
    }

    pub fn extended_version_label(&self) -> &str {
        &self.extended_version_label
    }

    pub fn register_macro(&mut self, macro_def: VtMacro) {
        if let Some(existing) = self.macros.iter_mut().find(|m| m.macro_id == macro_def.macro_id) {
            *existing = macro_def;
        } else {
            self.macros.push(macro_def);
        }
    }

    pub fn get_macro(&self, id: ObjectId) -> Option<&VtMacro> {
        self.macros.iter().find(|m| m.macro_id == id)
    }

    pub fn connect(&mut self) -> Result<(), Error> {
        if self.pool.is_empty() {
            return Err(Error::InvalidState);
        }
        self.pool.validate()?;
        self.state.transition(VtState::WaitForVtStatus);
        self.timer_ms = 0;
        isobus_info!(ctx(), "VT client connecting...");
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.state.transition(VtState::Disconnected);
        isobus_info!(ctx(), "VT client disconnected");
    }

    fn send<L: Link>(&self, net: &mut NetworkManager<L>, data: &[u8]) -> Result<(), Error> {
        net.send(self.cf_handle, PGN_ECU_TO_VT, data, self.vt_address, Priority::DEFAULT)
    }

    fn require_connected(&self) -> Result<(), Error> {
        if self.state.state() != VtState::Connected {
            Err(Error::NotConnected)
        } else {
            Ok(())
        }
    }

    fn warn_if_not_active_ws(&self) {
        if !self.is_active_ws && self.state.state() == VtState::Connected {
            isobus_warn!(ctx(), "sending a command while not the active working set");
        }
    }

    // ─── Runtime commands ──────────────────────────────────────────────

    pub fn hide_show<L: Link>(&mut self, net: &mut NetworkManager<L>, id: ObjectId, visible: bool) -> Result<(), Error> {
        self.require_connected()?;
        self.warn_if_not_active_ws();
        let mut data = [0xFFu8; 8];
        data[0] = cmd::HIDE_SHOW;
        data[1] = (id & 0xFF) as u8;
        data[2] = ((id >> 8) & 0xFF) as u8;
        data[3] = visible as u8;
        self.send(net, &data)
    }

    pub fn enable_disable<L: Link>(&mut self, net: &mut NetworkManager<L>, id: ObjectId, enabled: bool) -> Result<(), Error> {
        self.require_connected()?;
        let mut data = [0xFFu8; 8];
        data[0] = cmd::ENABLE_DISABLE;
        data[1] = (id & 0xFF) as u8;
        data[2] = ((id >> 8) & 0xFF) as u8;
        data[3] = enabled as u8;
        self.send(net, &data)
    }

    pub fn change_numeric_value<L: Link>(&mut self, net: &mut NetworkManager<L>, id: ObjectId, value: u32) -> Result<(), Error> {
        self.require_connected()?;
        let mut data = [0xFFu8; 8];
        data[0] = cmd::CHANGE_NUMERIC_VALUE;
        data[1] = (id & 0xFF) as u8;
        data[2] = ((id >> 8) & 0xFF) as u8;
        data[4..8].copy_from_slice(&value.to_le_bytes());
        self.send(net, &data)
    }

    pub fn change_string_value<L: Link>(&mut self, net: &mut NetworkManager<L>, id: ObjectId, value: &str) -> Result<(), Error> {
        self.require_connected()?;
        let mut data = alloc::vec![cmd::CHANGE_STRING_VALUE, (id & 0xFF) as u8, ((id >> 8) & 0xFF) as u8];
        let len = value.len() as u16;
        data.push((len & 0xFF) as u8);
        data.push(((len >> 8) & 0xFF) as u8);
        data.extend_from_slice(value.as_bytes());
        while data.len() < 8 {
            data.push(0xFF);
        }
        self.send(net, &data)
    }

    pub fn change_active_mask<L: Link>(&mut self, net: &mut NetworkManager<L>, working_set_id: ObjectId, mask_id: ObjectId) -> Result<(), Error> {
        self.require_connected()?;
        let mut data = [0xFFu8; 8];
        data[0] = cmd::CHANGE_ACTIVE_MASK;
        data[1] = (working_set_id & 0xFF) as u8;
        data[2] = ((working_set_id >> 8) & 0xFF) as u8;
        data[3] = (mask_id & 0xFF) as u8;
        data[4] = ((mask_id >> 8) & 0xFF) as u8;
        self.send(net, &data)
    }

    pub fn change_soft_key_mask<L: Link>(&mut self, net: &mut NetworkManager<L>, data_mask_id: ObjectId, sk_mask_id: ObjectId) -> Result<(), Error> {
        self.require_connected()?;
        let mut data = [0xFFu8; 8];
        data[0] = cmd::CHANGE_SOFT_KEY_MASK;
        data[1] = 0;
        data[2] = (data_mask_id & 0xFF) as u8;
        data[3] = ((data_mask_id >> 8) & 0xFF) as u8;
        data[4] = (sk_mask_id & 0xFF) as u8;
        data[5] = ((sk_mask_id >> 8) & 0xFF) as u8;
        self.send(net, &data)
    }

    pub fn change_attribute<L: Link>(&mut self, net: &mut NetworkManager<L>, id: ObjectId, attribute_id: u8, value: u32) -> Result<(), Error> {
        self.require_connected()?;
        let mut data = [0xFFu8; 8];
        data[0] = cmd::CHANGE_ATTRIBUTE;
        data[1] = (id & 0xFF) as u8;
        data[2] = ((id >> 8) & 0xFF) as u8;
        data[3] = attribute_id;
        data[4..8].copy_from_slice(&value.to_le_bytes());
        self.send(net, &data)
    }

    pub fn change_size<L: Link>(&mut self, net: &mut NetworkManager<L>, id: ObjectId, width: u16, height: u16) -> Result<(), Error> {
        self.require_connected()?;
        let mut data = [0xFFu8; 8];
        data[0] = cmd::CHANGE_SIZE;
        data[1] = (id & 0xFF) as u8;
        data[2] = ((id >> 8) & 0xFF) as u8;
        data[3..5].copy_from_slice(&width.to_le_bytes());
        data[5..7].copy_from_slice(&height.to_le_bytes());
        self.send(net, &data)
    }

    pub fn change_child_location<L: Link>(&mut self, net: &mut NetworkManager<L>, parent_id: ObjectId, child_id: ObjectId, dx: i8, dy: i8) -> Result<(), Error> {
        self.require_connected()?;
        let mut data = [0xFFu8; 8];
        data[0] = cmd::CHANGE_CHILD_LOCATION;
        data[1] = (parent_id & 0xFF) as u8;
        data[2] = ((parent_id >> 8) & 0xFF) as u8;
        data[3] = (child_id & 0xFF) as u8;
        data[4] = ((child_id >> 8) & 0xFF) as u8;
        data[5] = dx as u8;
        data[6] = dy as u8;
        self.send(net, &data)
    }

    pub fn change_background_colour<L: Link>(&mut self, net: &mut NetworkManager<L>, id: ObjectId, colour: u8) -> Result<(), Error> {
        self.require_connected()?;
        let mut data = [0xFFu8; 8];
        data[0] = cmd::CHANGE_BACKGROUND_COLOUR;
        data[1] = (id & 0xFF) as u8;
        data[2] = ((id >> 8) & 0xFF) as u8;
        data[3] = colour;
        self.send(net, &data)
    }

    pub fn change_list_item<L: Link>(&mut self, net: &mut NetworkManager<L>, list_id: ObjectId, index: u8, new_item_id: ObjectId) -> Result<(), Error> {
        self.require_connected()?;
        let mut data = [0xFFu8; 8];
        data[0] = cmd::CHANGE_LIST_ITEM;
        data[1] = (list_id & 0xFF) as u8;
        data[2] = ((list_id >> 8) & 0xFF) as u8;
        data[3] = index;
        data[4] = (new_item_id & 0xFF) as u8;
        data[5] = ((new_item_id >> 8) & 0xFF) as u8;
        self.send(net, &data)
    }

    pub fn lock_unlock_mask<L: Link>(&mut self, net: &mut NetworkManager<L>, mask_id: ObjectId, lock: bool, timeout_ms: u16) -> Result<(), Error> {
        self.require_connected()?;
        let mut data = [0xFFu8; 8];
        data[0] = cmd::LOCK_UNLOCK_MASK;
        data[1] = if lock { 0x00 } else { 0x01 };
        data[2] = (mask_id & 0xFF) as u8;
        data[3] = ((mask_id >> 8) & 0xFF) as u8;
        data[4..6].copy_from_slice(&timeout_ms.to_le_bytes());
        self.send(net, &data)
    }

    pub fn control_audio_signal<L: Link>(&mut self, net: &mut NetworkManager<L>, activations: u8, frequency_hz: u16, duration_ms: u16, off_time_ms: u16) -> Result<(), Error> {
        self.require_connected()?;
        let mut data = [0xFFu8; 8];
        data[0] = cmd::CONTROL_AUDIO_SIGNAL;
        data[1] = activations;
        data[2..4].copy_from_slice(&frequency_hz.to_le_bytes());
        data[4..6].copy_from_slice(&duration_ms.to_le_bytes());
        data[6..8].copy_from_slice(&off_time_ms.to_le_bytes());
        self.send(net, &data)
    }

    pub fn execute_macro<L: Link>(&mut self, net: &mut NetworkManager<L>, macro_id: ObjectId) -> Result<(), Error> {
        self.require_connected()?;
        let mut data = [0xFFu8; 8];
        data[0] = cmd::EXECUTE_MACRO;
        data[1] = (macro_id & 0xFF) as u8;
        data[2] = ((macro_id >> 8) & 0xFF) as u8;
        self.on_macro_executed.emit(macro_id);
        self.send(net, &data)
    }

    // ─── Object pool version management (ISO 11783-6 Annex F) ────────

    fn label_command<L: Link>(&mut self, net: &mut NetworkManager<L>, cmd_byte: u8, label: &str) -> Result<(), Error> {
        let mut data = [0xFFu8; 8];
        data[0] = cmd_byte;
        for i in 0..cmd::CLASSIC_VERSION_LABEL_SIZE {
            data[1 + i] = label.as_bytes().get(i).copied().unwrap_or(b' ');
        }
        self.send(net, &data)
    }

    pub fn store_version<L: Link>(&mut self, net: &mut NetworkManager<L>, version_label: &str) -> Result<(), Error> {
        self.require_connected()?;
        self.label_command(net, cmd::STORE_VERSION, version_label)
    }

    pub fn load_version<L: Link>(&mut self, net: &mut NetworkManager<L>, version_label: &str) -> Result<(), Error> {
        let result = self.label_command(net, cmd::LOAD_VERSION, version_label);
        if result.is_ok() {
            self.state.transition(VtState::WaitForPoolActivate);
            self.timer_ms = 0;
            isobus_info!(ctx(), "loading pool version: {}", version_label);
        }
        result
    }

    pub fn delete_version<L: Link>(&mut self, net: &mut NetworkManager<L>, version_label: &str) -> Result<(), Error> {
        self.require_connected()?;
        self.label_command(net, cmd::DELETE_VERSION, version_label)
    }

    pub fn get_versions<L: Link>(&mut self, net: &mut NetworkManager<L>) -> Result<(), Error> {
        let data = [cmd::GET_VERSIONS, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        self.send(net, &data)
    }

    // ─── VT v5 extended (32-byte) version labels ──────────────────────

    fn extended_label_command<L: Link>(&mut self, net: &mut NetworkManager<L>, cmd_byte: u8, label: &str) -> Result<(), Error> {
        let mut data = Vec::with_capacity(2 + cmd::EXTENDED_VERSION_LABEL_SIZE);
        data.push(cmd_byte);
        data.push(cmd::EXTENDED_VERSION_SUBFUNCTION);
        for i in 0..cmd::EXTENDED_VERSION_LABEL_SIZE {
            data.push(label.as_bytes().get(i).copied().unwrap_or(b' '));
        }
        self.send(net, &data)
    }

    pub fn request_extended_version_label<L: Link>(&mut self, net: &mut NetworkManager<L>) -> Result<(), Error> {
        let data = [cmd::EXTENDED_GET_VERSIONS, cmd::EXTENDED_VERSION_SUBFUNCTION, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        self.send(net, &data)
    }

    pub fn send_extended_store_version<L: Link>(&mut self, net: &mut NetworkManager<L>, label: &str) -> Result<(), Error> {
        self.require_connected()?;
        self.extended_version_label = String::from(label);
        self.extended_label_command(net, cmd::EXTENDED_STORE_VERSION, label)
    }

    pub fn send_extended_load_version<L: Link>(&mut self, net: &mut NetworkManager<L>, label: &str) -> Result<(), Error> {
        let result = self.extended_label_command(net, cmd::EXTENDED_LOAD_VERSION, label);
        if result.is_ok() {
            self.state.transition(VtState::WaitForPoolActivate);
            self.timer_ms = 0;
        }
        result
    }

    /// Tries the v5 extended label first when the VT reported v5+; otherwise
    /// falls back to the classic 7-byte label.
    pub fn negotiate_version_label<L: Link>(&mut self, net: &mut NetworkManager<L>, label: &str) -> Result<(), Error> {
        if self.vt_version >= VtVersion::Version5 as u8 {
            self.send_extended_load_version(net, label)
        } else {
            let truncated = &label[..label.len().min(cmd::CLASSIC_VERSION_LABEL_SIZE)];
            self.load_version(net, truncated)
        }
    }

    // ─── Handshake driver ──────────────────────────────────────────────

    pub fn update<L: Link>(&mut self, net: &mut NetworkManager<L>, elapsed_ms: u32) {
        self.timer_ms += elapsed_ms;

        match self.state.state() {
            VtState::WaitForVtStatus => {
                if self.timer_ms >= self.config.timeout_ms {
                    isobus_warn!(ctx(), "VT not found");
                    self.state.transition(VtState::Disconnected);
                }
            }
            VtState::SendWorkingSetMaster => {
                let mut data = [0xFFu8; 8];
                data[0] = 1;
                let _ = net.send(self.cf_handle, PGN_WORKING_SET_MASTER, &data, self.vt_address, Priority::DEFAULT);
                self.state.transition(VtState::SendGetMemory);
                self.timer_ms = 0;
            }
            VtState::SendGetMemory => {
                let pool_size = self.pool.serialize().len() as u32;
                let mut data = [0xFFu8; 8];
                data[0] = cmd::GET_MEMORY;
                data[1..5].copy_from_slice(&pool_size.to_le_bytes());
                let _ = self.send(net, &data);
                self.state.transition(VtState::WaitForMemory);
                self.timer_ms = 0;
                isobus_debug!(ctx(), "get memory: need {} bytes", pool_size);
            }
            VtState::WaitForMemory | VtState::WaitForPoolActivate => {
                if self.timer_ms >= self.config.timeout_ms {
                    isobus_warn!(ctx(), "VT response timeout");
                    self.state.transition(VtState::Disconnected);
                }
            }
            _ => {}
        }
    }

    fn upload_pool<L: Link>(&mut self, net: &mut NetworkManager<L>) {
        let pool_data = self.pool.serialize();
        if pool_data.is_empty() {
            isobus_error!(ctx(), "failed to serialize object pool");
            self.state.transition(VtState::Disconnected);
            return;
        }

        let mut transfer_data = Vec::with_capacity(1 + pool_data.len());
        transfer_data.push(cmd::OBJECT_POOL_TRANSFER);
        transfer_data.extend_from_slice(&pool_data);

        if self.send(net, &transfer_data).is_err() {
            isobus_error!(ctx(), "pool upload failed: transport error");
            self.state.transition(VtState::Disconnected);
            return;
        }
        isobus_info!(ctx(), "pool uploaded: {} bytes", pool_data.len());

        let end_of_pool = [cmd::END_OF_POOL, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let _ = self.send(net, &end_of_pool);
        self.state.transition(VtState::WaitForPoolActivate);
        self.timer_ms = 0;
    }

    /// Feeds one inbound VT-to-ECU message into the client. The host is
    /// responsible for routing messages with `pgn == PGN_VT_TO_ECU` here,
    /// e.g. by draining `NetworkManager::on_message` after each `update`.
    pub fn process_message<L: Link>(&mut self, net: &mut NetworkManager<L>, message: &Message) {
        if message.pgn != PGN_VT_TO_ECU || message.data.is_empty() {
            return;
        }
        let func = message.data[0];
        match func {
            cmd::VT_STATUS => self.handle_vt_status(net, message),
            cmd::GET_MEMORY_RESPONSE => self.handle_get_memory_response(net, message),
            cmd::END_OF_POOL => self.handle_end_of_pool_response(message),
            cmd::SOFT_KEY_ACTIVATION => self.handle_soft_key(message),
            cmd::BUTTON_ACTIVATION => self.handle_button(message),
            cmd::NUMERIC_VALUE_CHANGE => self.handle_numeric_change(message),
            cmd::STRING_VALUE_CHANGE => self.handle_string_change(message),
            cmd::STORE_VERSION => self.handle_store_version_response(message),
            cmd::LOAD_VERSION => self.handle_load_version_response(message),
            cmd::GET_VERSIONS_RESPONSE => self.handle_get_versions_response(message),
            cmd::VT_ESC => self.handle_vt_esc(message),
            cmd::EXTENDED_GET_VERSIONS_RESPONSE => self.handle_extended_version_response(message),
            _ => {}
        }
    }

    fn handle_vt_status<L: Link>(&mut self, net: &mut NetworkManager<L>, msg: &Message) {
        self.vt_address = msg.source;
        if msg.data.len() >= 7 && msg.data[6] > 0 {
            self.vt_version = msg.data[6];
        }
        if msg.data.len() >= 2 {
            if let Some(cf) = net.internal_cf(self.cf_handle) {
                let was_active = self.is_active_ws;
                self.is_active_ws = msg.data[1] == cf.address() && cf.address_valid();
                if was_active != self.is_active_ws {
                    self.on_active_ws_status.emit(self.is_active_ws);
                }
            }
        }
        if self.state.state() == VtState::WaitForVtStatus {
            isobus_info!(ctx(), "VT found at addr={} version={}", self.vt_address, self.vt_version);
            self.state.transition(VtState::SendWorkingSetMaster);
            self.timer_ms = 0;
        }
    }

    fn handle_get_memory_response<L: Link>(&mut self, net: &mut NetworkManager<L>, msg: &Message) {
        if msg.data.len() < 2 {
            return;
        }
        if msg.data[1] == 0 {
            self.state.transition(VtState::UploadPool);
            isobus_info!(ctx(), "VT has enough memory, uploading pool");
            self.upload_pool(net);
        } else {
            isobus_error!(ctx(), "VT: insufficient memory");
            self.state.transition(VtState::Disconnected);
        }
    }

    fn handle_end_of_pool_response(&mut self, msg: &Message) {
        if self.state.state() != VtState::WaitForPoolActivate || msg.data.len() < 2 {
            return;
        }
        if msg.data[1] == 0 {
            self.state.transition(VtState::Connected);
            isobus_info!(ctx(), "pool activated successfully");
            self.on_state_change.emit(VtState::Connected);
        } else {
            let error_code = msg.data.get(2).copied().unwrap_or(0xFF);
            isobus_error!(ctx(), "pool upload rejected: {}", error_code);
            self.on_pool_error.emit(error_code);
            self.state.transition(VtState::Disconnected);
        }
    }

    fn handle_soft_key(&mut self, msg: &Message) {
        if msg.data.len() < 4 {
            return;
        }
        let id = msg.data[1] as u16 | (msg.data[2] as u16) << 8;
        self.on_soft_key.emit((id, ActivationCode::from_raw(msg.data[3])));
    }

    fn handle_button(&mut self, msg: &Message) {
        if msg.data.len() < 4 {
            return;
        }
        let id = msg.data[1] as u16 | (msg.data[2] as u16) << 8;
        self.on_button.emit((id, ActivationCode::from_raw(msg.data[3])));
    }

    fn handle_numeric_change(&mut self, msg: &Message) {
        if msg.data.len() < 7 {
            return;
        }
        let id = msg.data[1] as u16 | (msg.data[2] as u16) << 8;
        let value = u32::from_le_bytes([msg.data[3], msg.data[4], msg.data[5], msg.data[6]]);
        self.on_numeric_value_change.emit((id, value));
    }

    fn handle_string_change(&mut self, msg: &Message) {
        if msg.data.len() < 5 {
            return;
        }
        let id = msg.data[1] as u16 | (msg.data[2] as u16) << 8;
        let len = (msg.data[3] as u16 | (msg.data[4] as u16) << 8) as usize;
        let end = (5 + len).min(msg.data.len());
        let value = String::from_utf8_lossy(&msg.data[5..end]).into_owned();
        self.on_string_value_change.emit((id, value));
    }

    fn handle_store_version_response(&mut self, msg: &Message) {
        if msg.data.len() < 2 {
            return;
        }
        let success = msg.data[1] == 0;
        let error_code = msg.data.get(2).copied().unwrap_or(0);
        self.on_store_version_response.emit((success, error_code));
    }

    fn handle_load_version_response(&mut self, msg: &Message) {
        if msg.data.len() < 2 {
            return;
        }
        let success = msg.data[1] == 0;
        let error_code = msg.data.get(2).copied().unwrap_or(0);
        self.on_load_version_response.emit((success, error_code));
        if success {
            self.state.transition(VtState::Connected);
            self.on_state_change.emit(VtState::Connected);
        } else {
            self.state.transition(VtState::Disconnected);
        }
    }

    fn handle_get_versions_response(&mut self, msg: &Message) {
        if msg.data.len() < 2 {
            return;
        }
        let num_versions = msg.data[1];
        let mut labels = Vec::new();
        let mut offset = 2usize;
        for _ in 0..num_versions {
            if offset + 7 > msg.data.len() {
                break;
            }
            let label: String = msg.data[offset..offset + 7].iter().map(|&b| b as char).filter(|&c| c != ' ' && c != '\0').collect();
            labels.push(label);
            offset += 7;
        }
        self.on_versions_received.emit(labels);
    }

    fn handle_vt_esc(&mut self, msg: &Message) {
        if msg.data.len() < 4 {
            return;
        }
        self.on_pool_error.emit(msg.data[3]);
    }

    fn handle_extended_version_response(&mut self, msg: &Message) {
        if msg.data.len() < 2 {
            return;
        }
        if msg.data[1] == cmd::EXTENDED_VERSION_SUBFUNCTION {
            self.vt_supports_extended_versions = true;
            let num_versions = msg.data.get(2).copied().unwrap_or(0);
            let mut labels = Vec::new();
            let mut offset = 3usize;
            for _ in 0..num_versions {
                if offset + cmd::EXTENDED_VERSION_LABEL_SIZE > msg.data.len() {
                    break;
                }
                let label: String = msg.data[offset..offset + cmd::EXTENDED_VERSION_LABEL_SIZE]
                    .iter()
                    .map(|&b| b as char)
                    .filter(|&c| c != ' ' && c != '\0')
                    .collect();
                labels.push(label);
                offset += cmd::EXTENDED_VERSION_LABEL_SIZE;
            }
            self.on_versions_received.emit(labels);
        } else {
            let success = msg.data[1] == 0;
            let error_code = msg.data.get(2).copied().unwrap_or(0);
            if self.state.state() == VtState::WaitForPoolActivate {
                if success {
                    self.state.transition(VtState::Connected);
                    self.on_state_change.emit(VtState::Connected);
                } else {
                    isobus_warn!(ctx(), "extended load failed, falling back to classic");
                    self.state.transition(VtState::Disconnected);
                }
                self.on_load_version_response.emit((success, error_code));
            } else {
                self.on_store_version_response.emit((success, error_code));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkConfig;
    use crate::types::{Priority as P, BROADCAST_ADDRESS};
    use crate::Name;
    use alloc::collections::VecDeque;

    struct MockLink {
        outbox: VecDeque<crate::frame::Frame>,
    }

    impl Link for MockLink {
        fn send(&mut self, frame: &crate::frame::Frame) -> Result<(), Error> {
            self.outbox.push_back(*frame);
            Ok(())
        }
        fn recv(&mut self) -> Result<crate::frame::Frame, Error> {
            Err(Error::Timeout)
        }
        fn can_send(&self) -> bool {
            true
        }
        fn can_recv(&self) -> bool {
            false
        }
        fn name(&self) -> &str {
            "can0"
        }
    }

    fn claimed_manager() -> (NetworkManager<MockLink>, usize) {
        let mut net: NetworkManager<MockLink> = NetworkManager::new(NetworkConfig::new());
        net.add_port(0, MockLink { outbox: VecDeque::new() });
        let handle = net.create_internal(Name::from_raw(10), 0, 0x80);
        net.start_address_claiming().unwrap();
        net.update(260);
        (net, handle)
    }

    fn sample_pool() -> ObjectPool {
        let mut pool = ObjectPool::new();
        pool.add(super::super::pool::VtObject::new(1, ObjectType::WorkingSet).add_child(2)).unwrap();
        pool.add(super::super::pool::VtObject::new(2, ObjectType::DataMask)).unwrap();
        pool
    }

    #[test]
    fn connect_fails_without_a_pool() {
        let mut client = VtClient::new(0, VtClientConfig::new());
        assert_eq!(client.connect().unwrap_err(), Error::InvalidState);
    }

    #[test]
    fn full_handshake_reaches_connected() {
        let (mut net, handle) = claimed_manager();
        let mut client = VtClient::new(handle, VtClientConfig::new());
        client.set_object_pool(sample_pool());
        client.connect().unwrap();

        let vt_status = Message::new(PGN_VT_TO_ECU, alloc::vec![cmd::VT_STATUS, 0xFF, 0, 0, 0, 0, 4, 0], 0x26, BROADCAST_ADDRESS, P::DEFAULT);
        client.process_message(&mut net, &vt_status);
        assert_eq!(client.state(), VtState::SendWorkingSetMaster);

        client.update(&mut net, 10);
        assert_eq!(client.state(), VtState::SendGetMemory);
        client.update(&mut net, 10);
        assert_eq!(client.state(), VtState::WaitForMemory);

        let memory_ok = Message::new(PGN_VT_TO_ECU, alloc::vec![cmd::GET_MEMORY_RESPONSE, 0], 0x26, BROADCAST_ADDRESS, P::DEFAULT);
        client.process_message(&mut net, &memory_ok);
        assert_eq!(client.state(), VtState::WaitForPoolActivate);

        let activate_ok = Message::new(PGN_VT_TO_ECU, alloc::vec![cmd::END_OF_POOL, 0], 0x26, BROADCAST_ADDRESS, P::DEFAULT);
        client.process_message(&mut net, &activate_ok);
        assert_eq!(client.state(), VtState::Connected);
    }

    #[test]
    fn commands_require_connected_state() {
        let (mut net, handle) = claimed_manager();
        let mut client = VtClient::new(handle, VtClientConfig::new());
        assert_eq!(client.hide_show(&mut net, 5, true).unwrap_err(), Error::NotConnected);
    }
}
