#[derive(Debug, Default, Clone, Copy)]
/// Calculate CRC-8 used in 1-Wire communications.
///
/// Dallas/Maxim polynomial `x^8 + x^5 + x^4 + 1`, reflected, initial value 0.
pub struct OneWireCrc(u8);

#[cfg(feature = "crc-table")]
const CRC8_TABLE: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = crc8_bitwise(0, i as u8);
        i += 1;
    }
    table
};

const fn crc8_bitwise(crc: u8, byte: u8) -> u8 {
    let mut crc = crc ^ byte;
    let mut i = 0;
    while i < 8 {
        crc = if crc & 0x1 == 0x1 {
            (crc >> 1) ^ 0x8c
        } else {
            crc >> 1
        };
        i += 1;
    }
    crc
}

impl OneWireCrc {
    /// Create a CRC accumulator starting from `seed`.
    pub const fn new(seed: u8) -> Self {
        Self(seed)
    }

    /// Get the current CRC value
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Update the CRC with the incoming byte.
    pub fn update(&mut self, byte: u8) {
        #[cfg(feature = "crc-table")]
        {
            self.0 = CRC8_TABLE[(self.0 ^ byte) as usize];
        }
        #[cfg(not(feature = "crc-table"))]
        {
            self.0 = crc8_bitwise(self.0, byte);
        }
    }

    /// Compute the CRC of a sequence of bytes.
    pub fn compute(sequence: &[u8]) -> u8 {
        let mut crc = OneWireCrc(0);
        sequence.iter().for_each(|&b| crc.update(b));
        crc.0
    }

    /// Validate a sequence of bytes where the last byte is the 1-Wire CRC of
    /// the previous bytes.
    pub fn validate(sequence: &[u8]) -> bool {
        // Running the CRC over data followed by its own CRC yields 0.
        Self::compute(sequence) == 0x0
    }
}

/// CRC-16 used by 1-Wire memory devices and the network adapter handshake.
///
/// Polynomial `x^16 + x^15 + x^2 + 1`, reflected, chainable through the seed.
#[derive(Debug, Default, Clone, Copy)]
pub struct Crc16(u16);

impl Crc16 {
    /// Create a CRC accumulator starting from `seed`.
    pub const fn new(seed: u16) -> Self {
        Self(seed)
    }

    /// Get the current CRC value
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Update the CRC with the incoming byte.
    pub fn update(&mut self, byte: u8) {
        let mut crc = self.0 ^ byte as u16;
        for _ in 0..8 {
            crc = if crc & 0x1 == 0x1 {
                (crc >> 1) ^ 0xa001
            } else {
                crc >> 1
            };
        }
        self.0 = crc;
    }

    /// Compute the CRC of `data`, continuing from `seed`.
    pub fn compute(data: &[u8], seed: u16) -> u16 {
        let mut crc = Crc16(seed);
        data.iter().for_each(|&b| crc.update(b));
        crc.0
    }
}

/// Read bit `index` of a little-endian bit string (bit 0 is the LSB of `buf[0]`).
pub fn bit_at(buf: &[u8], index: usize) -> bool {
    (buf[index / 8] >> (index % 8)) & 0x1 == 0x1
}

/// Write bit `index` of a little-endian bit string (bit 0 is the LSB of `buf[0]`).
pub fn set_bit_at(buf: &mut [u8], index: usize, value: bool) {
    let mask = 1 << (index % 8);
    if value {
        buf[index / 8] |= mask;
    } else {
        buf[index / 8] &= !mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc8_check_value() {
        assert_eq!(OneWireCrc::compute(b"123456789"), 0xa1);
    }

    #[test]
    fn crc8_table_matches_bitwise() {
        for b in 0..=255u8 {
            let mut crc = OneWireCrc::new(0x5a);
            crc.update(b);
            assert_eq!(crc.value(), crc8_bitwise(0x5a, b));
        }
    }

    #[test]
    fn crc8_validates_known_rom() {
        let rom = [0x28, 0xff, 0x4c, 0x9e, 0x61, 0x16, 0x04, 0x5d];
        assert_eq!(OneWireCrc::compute(&rom[..7]), rom[7]);
        assert!(OneWireCrc::validate(&rom));
    }

    #[test]
    fn crc16_check_value_and_chaining() {
        assert_eq!(Crc16::compute(b"123456789", 0), 0xbb3d);
        let first = Crc16::compute(b"1234", 0);
        assert_eq!(Crc16::compute(b"56789", first), 0xbb3d);
    }

    #[test]
    fn bit_helpers() {
        let mut buf = [0u8; 3];
        set_bit_at(&mut buf, 0, true);
        set_bit_at(&mut buf, 9, true);
        set_bit_at(&mut buf, 23, true);
        assert_eq!(buf, [0x01, 0x02, 0x80]);
        assert!(bit_at(&buf, 9));
        assert!(!bit_at(&buf, 8));
        set_bit_at(&mut buf, 9, false);
        assert_eq!(buf[1], 0);
    }
}
