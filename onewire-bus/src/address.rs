use crate::OneWireCrc;
use core::fmt;

/// 64-bit ROM address of a 1-Wire device.
///
/// | Byte | Description |
/// |------|-------------|
/// | 0    | Family code (e.g., 0x28 for DS18B20) |
/// | 1-6  | Serial number, least significant byte first |
/// | 7    | CRC-8 of bytes 0-6 |
///
/// Bytes are stored in the order they travel on the bus. The [`Display`](fmt::Display)
/// form prints the CRC byte first, the conventional way addresses are written down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DeviceAddress([u8; 8]);

impl DeviceAddress {
    /// Wrap raw ROM bytes. No validation is performed.
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Build a valid address from a family code and a serial number, computing the CRC.
    pub fn from_parts(family: u8, serial: [u8; 6]) -> Self {
        let mut bytes = [family, 0, 0, 0, 0, 0, 0, 0];
        bytes[1..7].copy_from_slice(&serial);
        bytes[7] = OneWireCrc::compute(&bytes[..7]);
        Self(bytes)
    }

    /// Family code.
    pub fn family(&self) -> u8 {
        self.0[0]
    }

    /// Serial number bytes, least significant first.
    pub fn serial(&self) -> [u8; 6] {
        let mut serial = [0; 6];
        serial.copy_from_slice(&self.0[1..7]);
        serial
    }

    /// Stored CRC byte.
    pub fn crc(&self) -> u8 {
        self.0[7]
    }

    /// Whether the stored CRC matches the first seven bytes.
    pub fn is_valid(&self) -> bool {
        OneWireCrc::validate(&self.0)
    }

    /// ROM bytes in bus order.
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// ROM code as a `u64`, family code in the least significant byte.
    pub fn to_u64(&self) -> u64 {
        u64::from_le_bytes(self.0)
    }
}

impl From<[u8; 8]> for DeviceAddress {
    fn from(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }
}

impl From<DeviceAddress> for [u8; 8] {
    fn from(addr: DeviceAddress) -> Self {
        addr.0
    }
}

impl From<u64> for DeviceAddress {
    fn from(rom: u64) -> Self {
        Self(rom.to_le_bytes())
    }
}

impl From<DeviceAddress> for u64 {
    fn from(addr: DeviceAddress) -> Self {
        addr.to_u64()
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().rev().try_for_each(|b| write!(f, "{b:02X}"))
    }
}

/// A set of family codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FamilySet([u64; 4]);

impl FamilySet {
    /// An empty set.
    pub const fn new() -> Self {
        Self([0; 4])
    }

    /// A set holding exactly the given families.
    pub fn from_slice(families: &[u8]) -> Self {
        let mut set = Self::new();
        families.iter().for_each(|&f| set.insert(f));
        set
    }

    /// Add a family code.
    pub fn insert(&mut self, family: u8) {
        self.0[(family >> 6) as usize] |= 1u64 << (family & 0x3f);
    }

    /// Remove a family code.
    pub fn remove(&mut self, family: u8) {
        self.0[(family >> 6) as usize] &= !(1u64 << (family & 0x3f));
    }

    /// Whether `family` is in the set.
    pub fn contains(&self, family: u8) -> bool {
        self.0[(family >> 6) as usize] & (1u64 << (family & 0x3f)) != 0
    }

    /// Remove every family code.
    pub fn clear(&mut self) {
        self.0 = [0; 4];
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&w| w == 0)
    }

    /// Number of family codes in the set.
    pub fn len(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// The only member, if the set holds exactly one family.
    pub fn single(&self) -> Option<u8> {
        if self.len() == 1 { self.iter().next() } else { None }
    }

    /// Iterate over the members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=255u8).filter(move |&f| self.contains(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    #[test]
    fn display_prints_crc_first() {
        let addr = DeviceAddress::new([0x28, 0xff, 0x4c, 0x9e, 0x61, 0x16, 0x04, 0x5d]);
        assert_eq!(addr.to_string(), "5D0416619E4CFF28");
        assert_eq!(addr.family(), 0x28);
        assert_eq!(addr.crc(), 0x5d);
        assert!(addr.is_valid());
    }

    #[test]
    fn from_parts_computes_crc() {
        let addr = DeviceAddress::from_parts(0x10, [1, 2, 3, 4, 5, 6]);
        assert!(addr.is_valid());
        assert_eq!(addr.serial(), [1, 2, 3, 4, 5, 6]);
        assert_eq!(DeviceAddress::from(addr.to_u64()), addr);
    }

    #[test]
    fn family_set_membership() {
        let mut set = FamilySet::from_slice(&[0x10, 0x28, 0xff]);
        assert_eq!(set.len(), 3);
        assert!(set.contains(0xff));
        assert!(!set.contains(0x00));
        set.remove(0x28);
        set.remove(0xff);
        assert_eq!(set.single(), Some(0x10));
        set.clear();
        assert!(set.is_empty());
        assert_eq!(set.single(), None);
    }
}
