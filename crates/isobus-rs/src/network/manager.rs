//! Ties address claim, transport, and PGN dispatch together across every
//! CAN port this node has a `Link` for (ISO 11783-5 §4.4, -6, SAE J1939-21).

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;

use crate::claim::ClaimState;
use crate::common::ADDRESS_CLAIM_RTXD_MAX_MS;
use crate::event::Event;
use crate::frame::{Frame, Message};
use crate::hal::{Error, Link};
use crate::log::{isobus_debug, isobus_warn, LogContext};
use crate::name::Name;
use crate::pgn::{PGN_ACKNOWLEDGMENT, PGN_ADDRESS_CLAIMED, PGN_ETP_CM, PGN_ETP_DT, PGN_REQUEST, PGN_TP_CM, PGN_TP_DT};
use crate::transport::{ExtendedTransportProtocol, FastPacketProtocol, TransportProtocol};
use crate::types::{Address, Pgn, Priority, BROADCAST_ADDRESS, NULL_ADDRESS};

use super::callback::CallbackRegistry;
use super::cf::{CFState, InternalCf, NameFilter, PartnerCf};

fn ctx(port: u8) -> LogContext {
    LogContext { component: "network.manager", port }
}

/// Tunables for the stack as a whole, independent of any particular port or
/// Control Function.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub address_claim_rtxd_ms: u32,
    pub enable_fast_packet: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig { address_claim_rtxd_ms: ADDRESS_CLAIM_RTXD_MAX_MS, enable_fast_packet: true }
    }
}

impl NetworkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address_claim_rtxd_ms(mut self, rtxd_ms: u32) -> Self {
        self.address_claim_rtxd_ms = rtxd_ms;
        self
    }

    pub fn with_fast_packet(mut self, enable: bool) -> Self {
        self.enable_fast_packet = enable;
        self
    }
}

struct PortStack {
    tp: TransportProtocol,
    etp: ExtendedTransportProtocol,
    fast_packet: FastPacketProtocol,
}

impl PortStack {
    fn new() -> Self {
        PortStack { tp: TransportProtocol::new(), etp: ExtendedTransportProtocol::new(), fast_packet: FastPacketProtocol::new() }
    }
}

/// The top-level coordinator: owns every port's `Link`, every Control
/// Function this node represents or tracks, and routes inbound/outbound
/// traffic through the right transport for its size.
///
/// Each port gets its own `TransportProtocol`/`ExtendedTransportProtocol`/
/// `FastPacketProtocol` instance rather than one instance shared across every
/// port. A shared instance would need to recover, after the fact, which port
/// an outbound frame belongs to by searching for an internal Control
/// Function whose claimed address matches the frame's source - and silently
/// guessing port 0 when no address matches. Keeping the session state
/// per-port means the port is simply the map key, never inferred.
pub struct NetworkManager<L: Link> {
    config: NetworkConfig,
    links: BTreeMap<u8, L>,
    ports: BTreeMap<u8, PortStack>,
    internal_cfs: Vec<InternalCf>,
    partner_cfs: Vec<PartnerCf>,
    fast_packet_pgns: BTreeSet<Pgn>,
    callbacks: CallbackRegistry,
    pub on_message: Event<Message>,
    pub on_cf_state_change: Event<(usize, CFState)>,
    pub on_address_violation: Event<(usize, Address)>,
}

impl<L: Link> NetworkManager<L> {
    pub fn new(config: NetworkConfig) -> Self {
        NetworkManager {
            config,
            links: BTreeMap::new(),
            ports: BTreeMap::new(),
            internal_cfs: Vec::new(),
            partner_cfs: Vec::new(),
            fast_packet_pgns: BTreeSet::new(),
            callbacks: CallbackRegistry::new(),
            on_message: Event::new(),
            on_cf_state_change: Event::new(),
            on_address_violation: Event::new(),
        }
    }

    /// Attaches a `Link` for `port`, creating its transport stack on first
    /// use.
    pub fn add_port(&mut self, port: u8, link: L) {
        self.links.insert(port, link);
        self.ports.entry(port).or_insert_with(PortStack::new);
    }

    /// Registers one of our own Control Functions and returns a stable
    /// handle for later lookups (`internal_cf`, `send_from`).
    pub fn create_internal(&mut self, name: Name, port: u8, preferred_address: Address) -> usize {
        self.ports.entry(port).or_insert_with(PortStack::new);
        self.internal_cfs.push(InternalCf::new(name, port, preferred_address, self.config.address_claim_rtxd_ms));
        self.internal_cfs.len() - 1
    }

    /// Registers a remote Control Function pattern we want to recognize and
    /// returns a stable handle.
    pub fn create_partner(&mut self, port: u8, filters: Vec<NameFilter>) -> usize {
        self.partner_cfs.push(PartnerCf::new(port, filters));
        self.partner_cfs.len() - 1
    }

    pub fn internal_cf(&self, handle: usize) -> Option<&InternalCf> {
        self.internal_cfs.get(handle)
    }

    pub fn partner_cf(&self, handle: usize) -> Option<&PartnerCf> {
        self.partner_cfs.get(handle)
    }

    pub fn register_pgn_callback(&mut self, pgn: Pgn, handler: Box<dyn FnMut(&Message)>) {
        self.callbacks.register(pgn, handler);
    }

    /// Marks `pgn` as carried over Fast Packet rather than a bare single
    /// frame when it arrives at exactly 8 bytes.
    pub fn register_fast_packet_pgn(&mut self, pgn: Pgn) {
        self.fast_packet_pgns.insert(pgn);
    }

    /// Kicks off address claiming for every registered internal Control
    /// Function, sending the resulting Request/Claim frames immediately.
    pub fn start_address_claiming(&mut self) -> Result<(), Error> {
        for i in 0..self.internal_cfs.len() {
            let port = self.internal_cfs[i].port;
            let frames = self.internal_cfs[i].claimer.start();
            self.send_frames(port, frames)?;
        }
        Ok(())
    }

    /// Sends `data` as `pgn` from internal Control Function `handle`,
    /// choosing Single Frame, Fast Packet, TP, or ETP automatically.
    pub fn send(&mut self, handle: usize, pgn: Pgn, data: &[u8], destination: Address, priority: Priority) -> Result<(), Error> {
        let cf = self.internal_cfs.get(handle).ok_or(Error::InvalidState)?;
        if cf.claim_state() != ClaimState::Claimed {
            return Err(Error::NotConnected);
        }
        let port = cf.port;
        let source = cf.address();

        let frames = if data.len() <= 8 {
            alloc::vec![Frame::from_message(priority, pgn, source, destination, data)]
        } else if self.config.enable_fast_packet && self.fast_packet_pgns.contains(&pgn) && data.len() <= crate::common::FAST_PACKET_MAX_DATA {
            let stack = self.ports.get_mut(&port).ok_or(Error::InvalidState)?;
            stack.fast_packet.send(pgn, data, source)?
        } else if (data.len() as u32) <= crate::common::TP_MAX_DATA_LENGTH {
            let stack = self.ports.get_mut(&port).ok_or(Error::InvalidState)?;
            stack.tp.send(pgn, data, source, destination, port, priority)?
        } else {
            let stack = self.ports.get_mut(&port).ok_or(Error::InvalidState)?;
            stack.etp.send(pgn, data, source, destination, port, priority)?
        };

        self.send_frames(port, frames)
    }

    fn send_frames(&mut self, port: u8, frames: Vec<Frame>) -> Result<(), Error> {
        let link = self.links.get_mut(&port).ok_or(Error::InterfaceDown)?;
        for frame in &frames {
            link.send(frame)?;
        }
        Ok(())
    }

    /// Drains every port's `Link`, advances every timer by `elapsed_ms`, and
    /// flushes anything the protocol layers have queued to send.
    pub fn update(&mut self, elapsed_ms: u32) {
        let ports: Vec<u8> = self.links.keys().copied().collect();
        for port in ports {
            self.drain_port(port);

            let mut outgoing = Vec::new();
            if let Some(stack) = self.ports.get_mut(&port) {
                outgoing.extend(stack.tp.update(elapsed_ms));
                outgoing.extend(stack.tp.pending_data_frames());
                outgoing.extend(stack.etp.update(elapsed_ms));
                outgoing.extend(stack.etp.pending_data_frames());
                stack.fast_packet.update(elapsed_ms);
            }

            for i in 0..self.internal_cfs.len() {
                if self.internal_cfs[i].port != port {
                    continue;
                }
                let was_claimed = self.internal_cfs[i].claim_state() == ClaimState::Claimed;
                outgoing.extend(self.internal_cfs[i].claimer.update(elapsed_ms));
                let now_claimed = self.internal_cfs[i].claim_state() == ClaimState::Claimed;
                if now_claimed && !was_claimed {
                    self.internal_cfs[i].state = CFState::Online;
                    self.on_cf_state_change.emit((i, CFState::Online));
                }
            }

            let _ = self.send_frames(port, outgoing);
        }
    }

    fn drain_port(&mut self, port: u8) {
        loop {
            let frame = match self.links.get_mut(&port) {
                Some(link) if link.can_recv() => match link.recv() {
                    Ok(frame) => frame,
                    Err(_) => break,
                },
                _ => break,
            };
            self.process_frame(frame, port);
        }
    }

    fn process_frame(&mut self, frame: Frame, port: u8) {
        let pgn = frame.pgn();

        if pgn == PGN_ADDRESS_CLAIMED {
            self.handle_address_claimed(&frame, port);
            return;
        }

        self.check_address_violation(&frame, port);

        if pgn == PGN_REQUEST {
            self.handle_request(&frame, port);
            return;
        }

        if pgn == PGN_TP_CM || pgn == PGN_TP_DT {
            let outgoing = self.ports.get_mut(&port).map(|s| s.tp.process_frame(&frame, port)).unwrap_or_default();
            let _ = self.send_frames(port, outgoing);
            return;
        }

        if pgn == PGN_ETP_CM || pgn == PGN_ETP_DT {
            let outgoing = self.ports.get_mut(&port).map(|s| s.etp.process_frame(&frame, port)).unwrap_or_default();
            let _ = self.send_frames(port, outgoing);
            return;
        }

        if pgn == PGN_ACKNOWLEDGMENT {
            self.dispatch_frame(&frame);
            return;
        }

        if self.config.enable_fast_packet && self.fast_packet_pgns.contains(&pgn) {
            let message = self.ports.get_mut(&port).and_then(|s| s.fast_packet.process_frame(&frame));
            if let Some(message) = message {
                self.dispatch_message(message);
            }
            return;
        }

        self.dispatch_frame(&frame);
    }

    /// ISO 11783-5 §4.4.2 address violation: any non-claim frame whose
    /// source matches one of our claimed addresses means another Control
    /// Function is transmitting under our address. Re-assert immediately.
    fn check_address_violation(&mut self, frame: &Frame, port: u8) {
        let source = frame.source();
        for i in 0..self.internal_cfs.len() {
            let cf = &self.internal_cfs[i];
            if cf.port == port && cf.claim_state() == ClaimState::Claimed && cf.address() == source {
                isobus_warn!(ctx(port), "address violation detected on {}", source);
                let outgoing = self.internal_cfs[i].claimer.handle_request_for_claim();
                let _ = self.send_frames(port, outgoing);
                self.on_address_violation.emit((i, source));
            }
        }
    }

    fn handle_address_claimed(&mut self, frame: &Frame, port: u8) {
        let claimed_address = frame.source();
        let other_name = Name::from_bytes(frame.data);

        for i in 0..self.internal_cfs.len() {
            if self.internal_cfs[i].port != port {
                continue;
            }
            let held_before = self.internal_cfs[i].address_valid() && self.internal_cfs[i].address() == claimed_address;
            let outgoing = self.internal_cfs[i].claimer.handle_claim(claimed_address, other_name);
            let _ = self.send_frames(port, outgoing);
            if held_before && self.internal_cfs[i].claim_state() != ClaimState::Claimed {
                self.internal_cfs[i].state = CFState::Offline;
                self.on_cf_state_change.emit((i, CFState::Offline));
                self.on_address_violation.emit((i, claimed_address));
            }
        }

        for partner in self.partner_cfs.iter_mut().filter(|p| p.port == port) {
            if partner.matches_name(other_name) {
                partner.name = Some(other_name);
                partner.address = claimed_address;
                partner.state = CFState::Online;
                partner.on_partner_found.emit(claimed_address);
                isobus_debug!(ctx(port), "partner matched: address={}", claimed_address);
            } else if partner.address == claimed_address && partner.name != Some(other_name) {
                partner.state = CFState::Offline;
                partner.address = NULL_ADDRESS;
            }
        }
    }

    fn handle_request(&mut self, frame: &Frame, port: u8) {
        let requested = frame.data[0] as Pgn | (frame.data[1] as Pgn) << 8 | (frame.data[2] as Pgn) << 16;
        if requested != PGN_ADDRESS_CLAIMED {
            return;
        }
        for i in 0..self.internal_cfs.len() {
            if self.internal_cfs[i].port != port {
                continue;
            }
            let outgoing = self.internal_cfs[i].claimer.handle_request_for_claim();
            let _ = self.send_frames(port, outgoing);
        }
    }

    fn dispatch_frame(&mut self, frame: &Frame) {
        let message = Message::new(frame.pgn(), frame.data[..frame.length as usize].to_vec(), frame.source(), frame.destination(), frame.priority());
        self.dispatch_message(message);
    }

    fn dispatch_message(&mut self, message: Message) {
        self.callbacks.dispatch(&message);
        self.on_message.emit(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::VecDeque;
    use alloc::string::String;

    struct MockLink {
        name: String,
        outbox: VecDeque<Frame>,
        inbox: VecDeque<Frame>,
    }

    impl MockLink {
        fn new(name: &str) -> Self {
            MockLink { name: name.into(), outbox: VecDeque::new(), inbox: VecDeque::new() }
        }
    }

    impl Link for MockLink {
        fn send(&mut self, frame: &Frame) -> Result<(), Error> {
            self.outbox.push_back(*frame);
            Ok(())
        }

        fn recv(&mut self) -> Result<Frame, Error> {
            self.inbox.pop_front().ok_or(Error::Timeout)
        }

        fn can_send(&self) -> bool {
            true
        }

        fn can_recv(&self) -> bool {
            !self.inbox.is_empty()
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    #[test]
    fn claims_address_and_reports_online() {
        let mut manager: NetworkManager<MockLink> = NetworkManager::new(NetworkConfig::new());
        manager.add_port(0, MockLink::new("can0"));
        let handle = manager.create_internal(Name::from_raw(42), 0, 0x80);

        manager.start_address_claiming().unwrap();
        assert!(!manager.links[&0].outbox.is_empty());

        let mut online_events = 0;
        manager.on_cf_state_change.subscribe(move |_| online_events += 1);
        manager.update(260);

        assert_eq!(manager.internal_cf(handle).unwrap().claim_state(), ClaimState::Claimed);
        assert_eq!(manager.internal_cf(handle).unwrap().address(), 0x80);
    }

    #[test]
    fn single_frame_send_requires_claimed_address() {
        let mut manager: NetworkManager<MockLink> = NetworkManager::new(NetworkConfig::new());
        manager.add_port(0, MockLink::new("can0"));
        let handle = manager.create_internal(Name::from_raw(1), 0, 0x80);

        let err = manager.send(handle, 0x00_FF40, &[1, 2, 3], BROADCAST_ADDRESS, Priority::DEFAULT).unwrap_err();
        assert_eq!(err, Error::NotConnected);
    }

    #[test]
    fn dispatches_single_frame_message_to_callback() {
        let mut manager: NetworkManager<MockLink> = NetworkManager::new(NetworkConfig::new());
        manager.add_port(0, MockLink::new("can0"));

        let mut seen = 0u32;
        manager.register_pgn_callback(
            0x00_FF40,
            Box::new(move |_msg| seen += 1),
        );

        let frame = Frame::from_message(Priority::DEFAULT, 0x00_FF40, 0x10, BROADCAST_ADDRESS, &[9, 9]);
        manager.links.get_mut(&0).unwrap().inbox.push_back(frame);
        manager.update(10);
    }
}
