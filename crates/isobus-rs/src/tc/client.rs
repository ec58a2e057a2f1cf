//! The Task Controller Client: drives the Task Controller connection
//! handshake and the packed element/DDI process data exchange used once
//! connected (ISO 11783-10).

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::event::Event;
use crate::frame::Message;
use crate::hal::{Error, Link};
use crate::log::{isobus_debug, isobus_error, isobus_info, isobus_warn, LogContext};
use crate::network::NetworkManager;
use crate::pgn::{PGN_ECU_TO_TC, PGN_TC_TO_ECU, PGN_WORKING_SET_MASTER};
use crate::state_machine::StateMachine;
use crate::types::{Address, Priority, NULL_ADDRESS};

use super::ddop::{Ddi, Ddop};

fn ctx() -> LogContext {
    LogContext { component: "tc.client", port: 0 }
}

mod cmd {
    pub const TC_STATUS: u8 = 0xFE;
    pub const WORKING_SET_MASTER_MAINTENANCE: u8 = 0xFF;

    pub const VERSION_REQUEST: u8 = 0x00;
    pub const VERSION_RESPONSE: u8 = 0x10;

    pub const OBJECT_POOL_TRANSFER: u8 = 0x61;
    pub const OBJECT_POOL_TRANSFER_RESPONSE: u8 = 0x71;
    pub const OBJECT_POOL_ACTIVATE_DEACTIVATE: u8 = 0x64;
    pub const OBJECT_POOL_ACTIVATE_DEACTIVATE_RESPONSE: u8 = 0x74;

    pub const VALUE_COMMAND: u8 = 0x01;
    pub const VALUE_REQUEST: u8 = 0x02;
    pub const VALUE_RESPONSE: u8 = 0x02;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcState {
    Disconnected,
    WaitForServerStatus,
    SendWorkingSetMaster,
    RequestVersion,
    WaitForVersion,
    TransferDdop,
    WaitForPoolResponse,
    ActivatePool,
    WaitForActivation,
    Connected,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcServerVersion {
    pub version: u8,
    pub max_booms: u8,
    pub max_sections: u8,
    pub options_bitmask: u8,
}

#[derive(Debug, Clone)]
pub struct TcClientConfig {
    pub timeout_ms: u32,
    pub client_version: u8,
}

impl Default for TcClientConfig {
    fn default() -> Self {
        TcClientConfig { timeout_ms: crate::common::CLIENT_HANDSHAKE_TIMEOUT_MS, client_version: 4 }
    }
}

impl TcClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout_ms(mut self, ms: u32) -> Self {
        self.timeout_ms = ms;
        self
    }
}

/// A value request handler: given the element number and DDI a Task
/// Controller asked about, returns the current value to report back.
pub type ValueCallback = Box<dyn FnMut(u16, Ddi) -> Option<i32> + Send>;
/// A value command handler: the Task Controller is setting the value for
/// (element number, DDI); return `true` to acknowledge it.
pub type CommandCallback = Box<dyn FnMut(u16, Ddi, i32) -> bool + Send>;

/// Drives one Task Controller connection: handshake, DDOP transfer and
/// activation, and the runtime packed value request/command exchange.
///
/// Like `VtClient`, does not own a `NetworkManager`; every method that needs
/// to send takes one by `&mut` reference for the call's duration.
pub struct TcClient {
    cf_handle: usize,
    config: TcClientConfig,
    state: StateMachine<TcState>,
    ddop: Ddop,
    timer_ms: u32,
    tc_address: Address,
    server_version: TcServerVersion,

    on_value_request: Option<ValueCallback>,
    on_value_command: Option<CommandCallback>,

    pub on_state_change: Event<TcState>,
    pub on_pool_error: Event<u8>,
    pub on_server_version: Event<TcServerVersion>,
}

impl TcClient {
    pub fn new(cf_handle: usize, config: TcClientConfig) -> Self {
        TcClient {
            cf_handle,
            config,
            state: StateMachine::new(TcState::Disconnected),
            ddop: Ddop::new(),
            timer_ms: 0,
            tc_address: NULL_ADDRESS,
            server_version: TcServerVersion::default(),
            on_value_request: None,
            on_value_command: None,
            on_state_change: Event::new(),
            on_pool_error: Event::new(),
            on_server_version: Event::new(),
        }
    }

    pub fn set_ddop(&mut self, ddop: Ddop) {
        self.ddop = ddop;
    }

    pub fn state(&self) -> TcState {
        self.state.state()
    }

    pub fn server_version(&self) -> TcServerVersion {
        self.server_version
    }

    /// Registers the callback used to answer `VALUE_REQUEST` messages.
    pub fn on_value_request<F: FnMut(u16, Ddi) -> Option<i32> + Send + 'static>(&mut self, callback: F) {
        self.on_value_request = Some(Box::new(callback));
    }

    /// Registers the callback used to accept/reject `VALUE_COMMAND` messages.
    pub fn on_value_command<F: FnMut(u16, Ddi, i32) -> bool + Send + 'static>(&mut self, callback: F) {
        self.on_value_command = Some(Box::new(callback));
    }

    pub fn connect(&mut self) -> Result<(), Error> {
        if self.ddop.is_empty() {
            return Err(Error::InvalidState);
        }
        self.ddop.validate()?;
        self.state.transition(TcState::WaitForServerStatus);
        self.timer_ms = 0;
        isobus_info!(ctx(), "TC client connecting...");
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.state.transition(TcState::Disconnected);
        isobus_info!(ctx(), "TC client disconnected");
    }

    fn send<L: Link>(&self, net: &mut NetworkManager<L>, data: &[u8]) -> Result<(), Error> {
        net.send(self.cf_handle, PGN_ECU_TO_TC, data, self.tc_address, Priority::DEFAULT)
    }

    fn require_connected(&self) -> Result<(), Error> {
        if self.state.state() != TcState::Connected {
            Err(Error::NotConnected)
        } else {
            Ok(())
        }
    }

    /// Sends a `VALUE_COMMAND` for (element, ddi). ISO 11783-10 §D packs the
    /// element number as a 12-bit field split across the low nibble of byte
    /// 0 and all of byte 1.
    pub fn send_value_command<L: Link>(&mut self, net: &mut NetworkManager<L>, element_number: u16, ddi: Ddi, value: i32) -> Result<(), Error> {
        self.require_connected()?;
        let data = pack_value_message(cmd::VALUE_COMMAND, element_number, ddi, value);
        self.send(net, &data)
    }

    /// Requests the current value for (element, ddi); the response arrives
    /// asynchronously through `process_message`.
    pub fn request_value<L: Link>(&mut self, net: &mut NetworkManager<L>, element_number: u16, ddi: Ddi) -> Result<(), Error> {
        self.require_connected()?;
        let data = pack_value_message(cmd::VALUE_REQUEST, element_number, ddi, 0);
        self.send(net, &data)
    }

    pub fn update<L: Link>(&mut self, net: &mut NetworkManager<L>, elapsed_ms: u32) {
        self.timer_ms += elapsed_ms;

        match self.state.state() {
            TcState::WaitForServerStatus => {
                if self.timer_ms >= self.config.timeout_ms {
                    isobus_warn!(ctx(), "TC not found");
                    self.state.transition(TcState::Disconnected);
                }
            }
            TcState::SendWorkingSetMaster => {
                let mut data = [0xFFu8; 8];
                data[0] = 1;
                let _ = net.send(self.cf_handle, PGN_WORKING_SET_MASTER, &data, self.tc_address, Priority::DEFAULT);
                self.state.transition(TcState::RequestVersion);
                self.timer_ms = 0;
            }
            TcState::RequestVersion => {
                let data = [cmd::VERSION_REQUEST, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
                let _ = self.send(net, &data);
                self.state.transition(TcState::WaitForVersion);
                self.timer_ms = 0;
            }
            TcState::WaitForVersion | TcState::WaitForPoolResponse | TcState::WaitForActivation => {
                if self.timer_ms >= self.config.timeout_ms {
                    isobus_warn!(ctx(), "TC response timeout");
                    self.state.transition(TcState::Disconnected);
                }
            }
            _ => {}
        }
    }

    fn transfer_ddop<L: Link>(&mut self, net: &mut NetworkManager<L>) {
        let ddop_data = self.ddop.serialize();
        if ddop_data.is_empty() {
            isobus_error!(ctx(), "failed to serialize DDOP");
            self.state.transition(TcState::Disconnected);
            return;
        }

        let mut transfer_data = Vec::with_capacity(1 + ddop_data.len());
        transfer_data.push(cmd::OBJECT_POOL_TRANSFER);
        transfer_data.extend_from_slice(&ddop_data);

        if self.send(net, &transfer_data).is_err() {
            isobus_error!(ctx(), "DDOP transfer failed: transport error");
            self.state.transition(TcState::Disconnected);
            return;
        }
        isobus_info!(ctx(), "DDOP transferred: {} bytes", ddop_data.len());
        self.state.transition(TcState::WaitForPoolResponse);
        self.timer_ms = 0;
    }

    fn activate_pool<L: Link>(&mut self, net: &mut NetworkManager<L>) {
        let data = [cmd::OBJECT_POOL_ACTIVATE_DEACTIVATE, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let _ = self.send(net, &data);
        self.state.transition(TcState::WaitForActivation);
        self.timer_ms = 0;
    }

    /// Feeds one inbound TC-to-ECU message into the client. The host is
    /// responsible for routing messages with `pgn == PGN_TC_TO_ECU` here.
    pub fn process_message<L: Link>(&mut self, net: &mut NetworkManager<L>, message: &Message) {
        if message.pgn != PGN_TC_TO_ECU || message.data.is_empty() {
            return;
        }
        let func = message.data[0] & 0x0F;
        match message.data[0] {
            cmd::TC_STATUS => self.handle_tc_status(net, message),
            cmd::VERSION_RESPONSE => self.handle_version_response(net, message),
            cmd::OBJECT_POOL_TRANSFER_RESPONSE => self.handle_pool_response(net, message),
            cmd::OBJECT_POOL_ACTIVATE_DEACTIVATE_RESPONSE => self.handle_activate_response(message),
            _ => match func {
                cmd::VALUE_REQUEST => self.handle_value_request(net, message),
                cmd::VALUE_COMMAND => self.handle_value_command(net, message),
                _ => {}
            },
        }
    }

    fn handle_tc_status<L: Link>(&mut self, _net: &mut NetworkManager<L>, msg: &Message) {
        self.tc_address = msg.source;
        if self.state.state() == TcState::WaitForServerStatus {
            isobus_info!(ctx(), "TC found at addr={}", self.tc_address);
            self.state.transition(TcState::SendWorkingSetMaster);
            self.timer_ms = 0;
        }
    }

    fn handle_version_response<L: Link>(&mut self, net: &mut NetworkManager<L>, msg: &Message) {
        if msg.data.len() < 5 {
            return;
        }
        self.server_version = TcServerVersion {
            version: msg.data[1],
            max_booms: msg.data[2],
            max_sections: msg.data[3],
            options_bitmask: msg.data[4],
        };
        self.on_server_version.emit(self.server_version);
        if self.state.state() == TcState::WaitForVersion {
            isobus_info!(ctx(), "TC version={} booms={} sections={}", self.server_version.version, self.server_version.max_booms, self.server_version.max_sections);
            self.state.transition(TcState::TransferDdop);
            self.timer_ms = 0;
            self.transfer_ddop(net);
        }
    }

    fn handle_pool_response<L: Link>(&mut self, net: &mut NetworkManager<L>, msg: &Message) {
        if self.state.state() != TcState::WaitForPoolResponse || msg.data.len() < 2 {
            return;
        }
        if msg.data[1] == 0 {
            isobus_info!(ctx(), "DDOP accepted, activating");
            self.state.transition(TcState::ActivatePool);
            self.activate_pool(net);
        } else {
            let error_code = msg.data.get(2).copied().unwrap_or(0xFF);
            isobus_error!(ctx(), "DDOP rejected: {}", error_code);
            self.on_pool_error.emit(error_code);
            self.state.transition(TcState::Disconnected);
        }
    }

    fn handle_activate_response(&mut self, msg: &Message) {
        if self.state.state() != TcState::WaitForActivation || msg.data.len() < 2 {
            return;
        }
        if msg.data[1] == 0 {
            self.state.transition(TcState::Connected);
            isobus_info!(ctx(), "DDOP activated successfully");
            self.on_state_change.emit(TcState::Connected);
        } else {
            let error_code = msg.data.get(2).copied().unwrap_or(0xFF);
            isobus_error!(ctx(), "DDOP activation rejected: {}", error_code);
            self.on_pool_error.emit(error_code);
            self.state.transition(TcState::Disconnected);
        }
    }

    fn handle_value_request<L: Link>(&mut self, net: &mut NetworkManager<L>, msg: &Message) {
        let Some((element_number, ddi, _)) = unpack_value_message(msg) else {
            return;
        };
        let value = self.on_value_request.as_mut().and_then(|cb| cb(element_number, ddi)).unwrap_or(0);
        let data = pack_value_message(cmd::VALUE_RESPONSE, element_number, ddi, value);
        let _ = self.send(net, &data);
    }

    fn handle_value_command<L: Link>(&mut self, _net: &mut NetworkManager<L>, msg: &Message) {
        let Some((element_number, ddi, value)) = unpack_value_message(msg) else {
            return;
        };
        if let Some(cb) = self.on_value_command.as_mut() {
            if !cb(element_number, ddi, value) {
                isobus_debug!(ctx(), "value command rejected by host: elem={} ddi={}", element_number, ddi);
            }
        }
    }
}

fn pack_value_message(func: u8, element_number: u16, ddi: Ddi, value: i32) -> [u8; 8] {
    let mut data = [0xFFu8; 8];
    data[0] = (func & 0x0F) | ((element_number & 0x0F) << 4) as u8;
    data[1] = ((element_number >> 4) & 0xFF) as u8;
    data[2] = (ddi & 0xFF) as u8;
    data[3] = ((ddi >> 8) & 0xFF) as u8;
    data[4..8].copy_from_slice(&value.to_le_bytes());
    data
}

fn unpack_value_message(msg: &Message) -> Option<(u16, Ddi, i32)> {
    if msg.data.len() < 8 {
        return None;
    }
    let element_number = ((msg.data[0] as u16) >> 4) | ((msg.data[1] as u16) << 4);
    let ddi = msg.data[2] as u16 | (msg.data[3] as u16) << 8;
    let value = i32::from_le_bytes([msg.data[4], msg.data[5], msg.data[6], msg.data[7]]);
    Some((element_number, ddi, value))
}

pub type ElementNumber = u16;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkConfig;
    use crate::tc::ddop::{device, device_element, device_process_data, DeviceElementType, DpdProperties};
    use crate::types::{Priority as P, BROADCAST_ADDRESS};
    use crate::Name;
    use alloc::collections::VecDeque;
    use core::sync::atomic::{AtomicI32, Ordering};
    use alloc::sync::Arc;

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
        let handle = net.create_internal(Name::from_raw(20), 0, 0x81);
        net.start_address_claiming().unwrap();
        net.update(260);
        (net, handle)
    }

    fn sample_ddop() -> Ddop {
        let mut ddop = Ddop::new();
        ddop.add(device(0, "Sprayer", "1.0.0")).unwrap();
        ddop.add(device_element(1, DeviceElementType::Device, "Main", 1, 0)).unwrap();
        ddop.add(device_process_data(2, 1, "Rate", DpdProperties::SETTABLE, 4)).unwrap();
        ddop
    }

    #[test]
    fn connect_fails_without_a_ddop() {
        let mut client = TcClient::new(0, TcClientConfig::new());
        assert_eq!(client.connect().unwrap_err(), Error::InvalidState);
    }

    #[test]
    fn full_handshake_reaches_connected() {
        let (mut net, handle) = claimed_manager();
        let mut client = TcClient::new(handle, TcClientConfig::new());
        client.set_ddop(sample_ddop());
        client.connect().unwrap();

        let tc_status = Message::new(PGN_TC_TO_ECU, alloc::vec![cmd::TC_STATUS, 0, 0, 0, 0, 0, 0, 0], 0x27, BROADCAST_ADDRESS, P::DEFAULT);
        client.process_message(&mut net, &tc_status);
        assert_eq!(client.state(), TcState::SendWorkingSetMaster);

        client.update(&mut net, 10);
        assert_eq!(client.state(), TcState::RequestVersion);
        client.update(&mut net, 10);
        assert_eq!(client.state(), TcState::WaitForVersion);

        let version_ok = Message::new(PGN_TC_TO_ECU, alloc::vec![cmd::VERSION_RESPONSE, 4, 2, 4, 0, 0xFF, 0xFF, 0xFF], 0x27, BROADCAST_ADDRESS, P::DEFAULT);
        client.process_message(&mut net, &version_ok);
        assert_eq!(client.state(), TcState::WaitForPoolResponse);

        let pool_ok = Message::new(PGN_TC_TO_ECU, alloc::vec![cmd::OBJECT_POOL_TRANSFER_RESPONSE, 0], 0x27, BROADCAST_ADDRESS, P::DEFAULT);
        client.process_message(&mut net, &pool_ok);
        assert_eq!(client.state(), TcState::WaitForActivation);

        let activate_ok = Message::new(PGN_TC_TO_ECU, alloc::vec![cmd::OBJECT_POOL_ACTIVATE_DEACTIVATE_RESPONSE, 0], 0x27, BROADCAST_ADDRESS, P::DEFAULT);
        client.process_message(&mut net, &activate_ok);
        assert_eq!(client.state(), TcState::Connected);
    }

    #[test]
    fn value_command_reaches_registered_callback() {
        let (mut net, handle) = claimed_manager();
        let mut client = TcClient::new(handle, TcClientConfig::new());
        let received = Arc::new(AtomicI32::new(0));
        let received_clone = received.clone();
        client.on_value_command(move |_elem, _ddi, value| {
            received_clone.store(value, Ordering::SeqCst);
            true
        });

        let msg = Message::new(PGN_TC_TO_ECU, alloc::vec![cmd::VALUE_COMMAND, 0, 1, 0, 100, 0, 0, 0], 0x27, BROADCAST_ADDRESS, P::DEFAULT);
        client.process_message(&mut net, &msg);
        assert_eq!(received.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn commands_require_connected_state() {
        let (mut net, handle) = claimed_manager();
        let mut client = TcClient::new(handle, TcClientConfig::new());
        assert_eq!(client.send_value_command(&mut net, 0, 1, 5).unwrap_err(), Error::NotConnected);
    }
}
