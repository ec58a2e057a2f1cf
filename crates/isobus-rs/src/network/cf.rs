//! Control Function bookkeeping: our own ECUs (`InternalCf`) and the remote
//! ECUs we track by NAME pattern (`PartnerCf`), per ISO 11783-5 §4.4.

use alloc::vec::Vec;

use crate::claim::{AddressClaimer, ClaimState};
use crate::event::Event;
use crate::name::Name;
use crate::types::{Address, MAX_ADDRESS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CFState {
    Offline,
    Online,
}

/// One criterion a `PartnerCf` must match against an observed NAME. A
/// partner with several filters matches only when every filter matches
/// (logical AND), mirroring how a TC or VT implementation narrows in on a
/// specific class of ECU rather than any one with a matching function code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameFilter {
    Function(u8),
    ManufacturerCode(u16),
    IndustryGroup(u8),
    VehicleSystem(u8),
    IdentityNumber(u32),
}

impl NameFilter {
    pub fn matches(self, name: Name) -> bool {
        match self {
            NameFilter::Function(f) => name.function() == f,
            NameFilter::ManufacturerCode(m) => name.manufacturer_code() == m,
            NameFilter::IndustryGroup(g) => name.industry_group() == g,
            NameFilter::VehicleSystem(v) => name.vehicle_system() == v,
            NameFilter::IdentityNumber(id) => name.identity_number() == id,
        }
    }
}

/// One of our own Control Functions: owns the address-claim state machine
/// for a single NAME on a single CAN port.
pub struct InternalCf {
    pub claimer: AddressClaimer,
    pub port: u8,
    pub state: CFState,
}

impl InternalCf {
    pub fn new(name: Name, port: u8, preferred_address: Address, rtxd_ms: u32) -> Self {
        InternalCf { claimer: AddressClaimer::new(name, preferred_address, rtxd_ms), port, state: CFState::Offline }
    }

    pub fn name(&self) -> Name {
        self.claimer.name()
    }

    pub fn address(&self) -> Address {
        self.claimer.address()
    }

    pub fn claim_state(&self) -> ClaimState {
        self.claimer.claim_state()
    }

    pub fn address_valid(&self) -> bool {
        self.claimer.claim_state() == ClaimState::Claimed && self.claimer.address() <= MAX_ADDRESS
    }
}

/// A remote Control Function we want to recognize by NAME pattern, e.g. "the
/// Virtual Terminal" or "the Task Controller on this port".
pub struct PartnerCf {
    pub port: u8,
    pub filters: Vec<NameFilter>,
    pub name: Option<Name>,
    pub address: Address,
    pub state: CFState,
    pub on_partner_found: Event<Address>,
}

impl PartnerCf {
    pub fn new(port: u8, filters: Vec<NameFilter>) -> Self {
        PartnerCf {
            port,
            filters,
            name: None,
            address: crate::types::NULL_ADDRESS,
            state: CFState::Offline,
            on_partner_found: Event::new(),
        }
    }

    pub fn matches_name(&self, name: Name) -> bool {
        self.filters.iter().all(|f| f.matches(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matches_function_and_manufacturer() {
        let name = Name::new(1, 999, 0, 0, 129, 0, 0, 2, true); // function=129 (VT)
        let filters = alloc::vec![NameFilter::Function(129), NameFilter::ManufacturerCode(999)];
        let partner = PartnerCf::new(0, filters);
        assert!(partner.matches_name(name));
    }

    #[test]
    fn filter_rejects_mismatched_function() {
        let name = Name::new(1, 999, 0, 0, 130, 0, 0, 2, true);
        let partner = PartnerCf::new(0, alloc::vec![NameFilter::Function(129)]);
        assert!(!partner.matches_name(name));
    }
}
