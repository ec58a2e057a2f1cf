//! The 64-bit NAME identity used for address-claim contention and partner
//! matching (ISO 11783-5 §4.4, SAE J1939-81).

/// A Control Function's 64-bit NAME.
///
/// Ordering is derived directly from the raw value: `Name` with a numerically
/// smaller raw value wins address-claim contention (§4.2). The identity
/// number must never change after the first claim attempt; this type does
/// not enforce that itself, it is a plain value type, the invariant lives in
/// `AddressClaimer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name(u64);

impl Name {
    /// Builds a NAME from its component fields. Fields wider than their bit
    /// width are silently truncated (matching the wire's fixed-width
    /// packing), mirroring how the rest of the stack treats out-of-range
    /// sub-byte fields.
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        identity_number: u32,
        manufacturer_code: u16,
        ecu_instance: u8,
        function_instance: u8,
        function: u8,
        vehicle_system: u8,
        vehicle_system_instance: u8,
        industry_group: u8,
        self_configurable: bool,
    ) -> Self {
        let mut raw: u64 = 0;
        raw |= (identity_number as u64 & 0x1F_FFFF) << 0;
        raw |= (manufacturer_code as u64 & 0x7FF) << 21;
        raw |= (ecu_instance as u64 & 0x7) << 32;
        raw |= (function_instance as u64 & 0x1F) << 35;
        raw |= (function as u64) << 40;
        // bit 48 is reserved and always zero.
        raw |= (vehicle_system as u64 & 0x7F) << 49;
        raw |= (vehicle_system_instance as u64 & 0xF) << 56;
        raw |= (industry_group as u64 & 0x7) << 60;
        if self_configurable {
            raw |= 1 << 63;
        }
        Name(raw)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Name(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn identity_number(self) -> u32 {
        (self.0 & 0x1F_FFFF) as u32
    }

    pub const fn manufacturer_code(self) -> u16 {
        ((self.0 >> 21) & 0x7FF) as u16
    }

    pub const fn ecu_instance(self) -> u8 {
        ((self.0 >> 32) & 0x7) as u8
    }

    pub const fn function_instance(self) -> u8 {
        ((self.0 >> 35) & 0x1F) as u8
    }

    pub const fn function(self) -> u8 {
        ((self.0 >> 40) & 0xFF) as u8
    }

    pub const fn vehicle_system(self) -> u8 {
        ((self.0 >> 49) & 0x7F) as u8
    }

    pub const fn vehicle_system_instance(self) -> u8 {
        ((self.0 >> 56) & 0xF) as u8
    }

    pub const fn industry_group(self) -> u8 {
        ((self.0 >> 60) & 0x7) as u8
    }

    /// Whether this CF may pick an alternate address when it loses
    /// contention (the "Arbitrary Address Capable" bit).
    pub const fn self_configurable(self) -> bool {
        (self.0 >> 63) & 1 == 1
    }

    /// Little-endian wire encoding, as carried in an Address Claimed frame.
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Name(u64::from_le_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_fields() {
        let name = Name::new(0x1_2345, 0x654, 5, 17, 200, 100, 9, 2, true);
        assert_eq!(name.identity_number(), 0x1_2345);
        assert_eq!(name.manufacturer_code(), 0x654);
        assert_eq!(name.ecu_instance(), 5);
        assert_eq!(name.function_instance(), 17);
        assert_eq!(name.function(), 200);
        assert_eq!(name.vehicle_system(), 100);
        assert_eq!(name.vehicle_system_instance(), 9);
        assert_eq!(name.industry_group(), 2);
        assert!(name.self_configurable());
    }

    #[test]
    fn round_trips_through_bytes() {
        let name = Name::new(1, 2, 3, 4, 5, 6, 7, 1, false);
        assert_eq!(Name::from_bytes(name.to_bytes()), name);
    }

    #[test]
    fn smaller_raw_value_wins_contention() {
        let low = Name::from_raw(1);
        let high = Name::from_raw(2);
        assert!(low < high);
    }
}
