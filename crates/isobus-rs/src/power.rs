//! Key-off power management (ISO 11783-9 §4.6): a TECU holds power open for
//! a bounded extension window while any Control Function keeps asserting
//! that it still needs it.

use alloc::vec::Vec;

use crate::common::{POWER_MAINTAIN_REPEAT_MS, POWER_MAX_EXTENSION_MS, POWER_SHUTDOWN_MIN_MS};
use crate::event::Event;
use crate::frame::{Frame, Message};
use crate::pgn::PGN_MAINTAIN_POWER;
use crate::types::{Address, Priority, BROADCAST_ADDRESS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySwitchState {
    Off = 0,
    NotOff = 1,
    Error = 2,
    NotAvailable = 3,
}

impl KeySwitchState {
    fn from_raw(raw: u8) -> Self {
        match raw & 0x03 {
            0 => KeySwitchState::Off,
            1 => KeySwitchState::NotOff,
            2 => KeySwitchState::Error,
            _ => KeySwitchState::NotAvailable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintainPowerRequest {
    NoRequest = 0,
    EcuRequest = 1,
    Error = 2,
    NotAvailable = 3,
}

impl MaintainPowerRequest {
    fn from_raw(raw: u8) -> Self {
        match raw & 0x03 {
            0 => MaintainPowerRequest::NoRequest,
            1 => MaintainPowerRequest::EcuRequest,
            2 => MaintainPowerRequest::Error,
            _ => MaintainPowerRequest::NotAvailable,
        }
    }
}

/// The Maintain Power message payload (ISO 11783-9 §4.6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintainPowerData {
    pub key_switch: KeySwitchState,
    pub maintain_request: MaintainPowerRequest,
    /// Minutes of tractor power remaining; 0xFF means not available.
    pub max_time_min: u8,
}

impl Default for MaintainPowerData {
    fn default() -> Self {
        MaintainPowerData { key_switch: KeySwitchState::NotAvailable, maintain_request: MaintainPowerRequest::NotAvailable, max_time_min: 0xFF }
    }
}

impl MaintainPowerData {
    pub fn encode(&self) -> [u8; 8] {
        let mut data = [0xFFu8; 8];
        data[0] = (self.key_switch as u8 & 0x03) | ((self.maintain_request as u8 & 0x03) << 2);
        data[1] = self.max_time_min;
        data
    }

    pub fn decode(data: &[u8]) -> Self {
        if data.len() < 2 {
            return Self::default();
        }
        MaintainPowerData { key_switch: KeySwitchState::from_raw(data[0]), maintain_request: MaintainPowerRequest::from_raw(data[0] >> 2), max_time_min: data[1] }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Running,
    ShutdownPending,
    Maintaining,
    PowerOff,
}

/// Drives the key-off sequence for one Control Function, either as the TECU
/// (the power source, tracking requests from everyone else) or as an
/// ordinary CF (requesting extension and following the TECU's key state).
pub struct PowerManager {
    source: Address,
    is_tecu: bool,
    state: PowerState,
    shutdown_timer_ms: u32,
    maintain_timer_ms: u32,
    broadcast_timer_ms: u32,
    request_timer_ms: u32,
    requesting_power: bool,
    pub on_state_change: Event<PowerState>,
    pub on_power_off: Event<()>,
}

impl PowerManager {
    pub fn new(source: Address, is_tecu: bool) -> Self {
        PowerManager {
            source,
            is_tecu,
            state: PowerState::Running,
            shutdown_timer_ms: 0,
            maintain_timer_ms: 0,
            broadcast_timer_ms: 0,
            request_timer_ms: 0,
            requesting_power: false,
            on_state_change: Event::new(),
            on_power_off: Event::new(),
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    /// TECU only: signal that the key has turned off.
    pub fn key_off(&mut self) {
        if self.state == PowerState::Running {
            self.state = PowerState::ShutdownPending;
            self.shutdown_timer_ms = 0;
            // Stale until an EcuRequest resets it; otherwise the first
            // decision tick would read "a request just arrived".
            self.maintain_timer_ms = POWER_MAINTAIN_REPEAT_MS * 2 + 1;
            self.on_state_change.emit(self.state);
        }
    }

    /// TECU only: signal that the key has turned back on, aborting shutdown.
    pub fn key_on(&mut self) {
        if self.state != PowerState::Running {
            self.state = PowerState::Running;
            self.shutdown_timer_ms = 0;
            self.on_state_change.emit(self.state);
        }
    }

    /// CF only: start or stop asserting a need for power extension.
    pub fn request_power(&mut self, need_power: bool) {
        self.requesting_power = need_power;
        if need_power {
            self.request_timer_ms = POWER_MAINTAIN_REPEAT_MS;
        }
    }

    pub fn update(&mut self, elapsed_ms: u32) -> Vec<Frame> {
        if self.is_tecu {
            self.update_tecu(elapsed_ms)
        } else {
            self.update_cf(elapsed_ms)
        }
    }

    pub fn process_message(&mut self, message: &Message) {
        if message.pgn != PGN_MAINTAIN_POWER || message.data.len() < 2 {
            return;
        }
        let data = MaintainPowerData::decode(&message.data);

        if self.is_tecu {
            if data.maintain_request == MaintainPowerRequest::EcuRequest {
                self.maintain_timer_ms = 0;
            }
        } else if data.key_switch == KeySwitchState::Off && self.state == PowerState::Running {
            self.state = PowerState::ShutdownPending;
            self.on_state_change.emit(self.state);
        } else if data.key_switch == KeySwitchState::NotOff && self.state != PowerState::Running {
            self.state = PowerState::Running;
            self.on_state_change.emit(self.state);
        }
    }

    fn update_tecu(&mut self, elapsed_ms: u32) -> Vec<Frame> {
        let mut frames = Vec::new();
        self.broadcast_timer_ms += elapsed_ms;
        if self.broadcast_timer_ms >= crate::common::HEARTBEAT_INTERVAL_MS {
            self.broadcast_timer_ms = 0;
            let mut data = MaintainPowerData {
                key_switch: if self.state == PowerState::Running { KeySwitchState::NotOff } else { KeySwitchState::Off },
                maintain_request: MaintainPowerRequest::NoRequest,
                max_time_min: 0xFF,
            };
            if self.state != PowerState::Running && self.state != PowerState::PowerOff {
                let remaining_ms = POWER_MAX_EXTENSION_MS.saturating_sub(self.shutdown_timer_ms);
                data.max_time_min = (remaining_ms / 60_000) as u8;
            }
            frames.push(self.make_frame(&data));
        }

        match self.state {
            PowerState::ShutdownPending => {
                self.shutdown_timer_ms += elapsed_ms;
                self.maintain_timer_ms += elapsed_ms;
                if self.shutdown_timer_ms >= POWER_SHUTDOWN_MIN_MS {
                    if self.maintain_timer_ms > POWER_MAINTAIN_REPEAT_MS * 2 {
                        self.state = PowerState::PowerOff;
                        self.on_state_change.emit(self.state);
                        self.on_power_off.emit(());
                    } else {
                        self.state = PowerState::Maintaining;
                        self.on_state_change.emit(self.state);
                    }
                }
            }
            PowerState::Maintaining => {
                self.shutdown_timer_ms += elapsed_ms;
                self.maintain_timer_ms += elapsed_ms;
                if self.shutdown_timer_ms >= POWER_MAX_EXTENSION_MS {
                    self.state = PowerState::PowerOff;
                    self.on_state_change.emit(self.state);
                    self.on_power_off.emit(());
                } else if self.maintain_timer_ms > POWER_MAINTAIN_REPEAT_MS * 2 {
                    self.state = PowerState::PowerOff;
                    self.on_state_change.emit(self.state);
                    self.on_power_off.emit(());
                }
            }
            PowerState::Running | PowerState::PowerOff => {}
        }

        frames
    }

    fn update_cf(&mut self, elapsed_ms: u32) -> Vec<Frame> {
        let mut frames = Vec::new();
        if !self.requesting_power {
            return frames;
        }
        self.request_timer_ms += elapsed_ms;
        if self.request_timer_ms >= POWER_MAINTAIN_REPEAT_MS {
            self.request_timer_ms = 0;
            let data = MaintainPowerData { key_switch: KeySwitchState::NotAvailable, maintain_request: MaintainPowerRequest::EcuRequest, max_time_min: 0xFF };
            frames.push(self.make_frame(&data));
        }
        frames
    }

    fn make_frame(&self, data: &MaintainPowerData) -> Frame {
        Frame::from_message(Priority::DEFAULT, PGN_MAINTAIN_POWER, self.source, BROADCAST_ADDRESS, &data.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tecu_goes_to_power_off_without_maintain_requests() {
        let mut pm = PowerManager::new(0x10, true);
        pm.key_off();
        assert_eq!(pm.state(), PowerState::ShutdownPending);
        pm.update(POWER_SHUTDOWN_MIN_MS);
        assert_eq!(pm.state(), PowerState::PowerOff);
    }

    #[test]
    fn tecu_maintains_power_when_requests_keep_arriving() {
        let mut pm = PowerManager::new(0x10, true);
        pm.key_off();
        let msg = Message::new(
            PGN_MAINTAIN_POWER,
            MaintainPowerData { key_switch: KeySwitchState::NotAvailable, maintain_request: MaintainPowerRequest::EcuRequest, max_time_min: 0xFF }.encode().to_vec(),
            0x20,
            BROADCAST_ADDRESS,
            Priority::DEFAULT,
        );
        pm.process_message(&msg);
        pm.update(POWER_SHUTDOWN_MIN_MS);
        assert_eq!(pm.state(), PowerState::Maintaining);
    }

    #[test]
    fn cf_requests_power_on_interval() {
        let mut pm = PowerManager::new(0x20, false);
        pm.request_power(true);
        let frames = pm.update(POWER_MAINTAIN_REPEAT_MS);
        assert_eq!(frames.len(), 1);
    }
}
