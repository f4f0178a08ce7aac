use crate::{
    DeviceAddress, OneWireError, OneWireResult, ResetResult,
    consts::{
        ONEWIRE_MATCH_ROM_CMD, ONEWIRE_MATCH_ROM_CMD_OD, ONEWIRE_SKIP_ROM_CMD,
        ONEWIRE_SKIP_ROM_CMD_OD,
    },
};

/// Bus state reported by a reset pulse.
pub trait OneWireStatus {
    /// Whether a presence pulse was detected.
    fn presence(&self) -> bool;
    /// Whether a short circuit was detected.
    fn shortcircuit(&self) -> bool;
    /// Whether an alarming device signaled during the presence pulse.
    fn alarm(&self) -> bool {
        false
    }
    /// The logic level of the line, if the bus master samples it.
    fn logic_level(&self) -> Option<bool> {
        None
    }
    /// Collapse the status into a [`ResetResult`].
    fn result(&self) -> ResetResult {
        if self.shortcircuit() {
            ResetResult::Short
        } else if self.alarm() {
            ResetResult::Alarm
        } else if self.presence() {
            ResetResult::Presence
        } else {
            ResetResult::NoPresence
        }
    }
}

/// Trait for 1-Wire communication.
/// This trait defines the basic operations required for 1-Wire communication, such as resetting the bus,
/// writing and reading bytes, and writing and reading bits.
pub trait OneWire {
    /// The status type returned by the reset operation.
    /// This type must implement the [OneWireStatus] trait.
    type Status: OneWireStatus;
    /// The error type returned by the operations of this trait.
    /// This type is used to indicate errors in the underlying hardware or communication.
    type BusError;

    /// Resets the 1-Wire bus and returns the status of the bus.
    ///
    /// A missing presence pulse is reported through the status, not as an error.
    fn reset(&mut self) -> OneWireResult<Self::Status, Self::BusError>;

    /// Writes a byte to the 1-Wire bus, least significant bit first.
    fn write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError> {
        for i in 0..8 {
            self.write_bit((byte >> i) & 0x1 == 0x1)?;
        }
        Ok(())
    }

    /// Reads a byte from the 1-Wire bus by generating eight read slots.
    fn read_byte(&mut self) -> OneWireResult<u8, Self::BusError> {
        let mut byte = 0;
        for i in 0..8 {
            if self.read_bit()? {
                byte |= 1 << i;
            }
        }
        Ok(byte)
    }

    /// Writes a single bit to the 1-Wire bus.
    fn write_bit(&mut self, bit: bool) -> OneWireResult<(), Self::BusError>;

    /// Reads a single bit from the 1-Wire bus.
    fn read_bit(&mut self) -> OneWireResult<bool, Self::BusError>;

    /// Generates three time slots: two read time slots and one write time slot.
    ///
    /// The write slot carries the id bit when the two read slots differ, and
    /// `direction` when both read 0. Used by the [search algorithm](https://www.analog.com/en/resources/app-notes/1wire-search-algorithm.html)
    /// when the bus master has hardware support for it.
    ///
    /// # Returns
    /// The id bit, the complement bit and the direction written.
    ///
    /// # Errors
    /// [`OneWireError::Unimplemented`] unless the bus master overrides it.
    fn read_triplet(&mut self, _direction: bool) -> OneWireResult<(bool, bool, bool), Self::BusError> {
        Err(OneWireError::Unimplemented)
    }

    /// Check if the 1-Wire bus is in overdrive mode.
    fn get_overdrive_mode(&mut self) -> OneWireResult<bool, Self::BusError>;

    /// Set the 1-Wire bus to overdrive mode.
    fn set_overdrive_mode(&mut self, _enable: bool) -> OneWireResult<(), Self::BusError> {
        Err(OneWireError::Unimplemented)
    }

    /// Addresses devices on the 1-Wire bus.
    ///
    /// Issues a reset followed by Match ROM and the address, or Skip ROM when `rom` is
    /// [`None`]. The overdrive variants are used when the bus is in overdrive mode.
    fn address(&mut self, rom: Option<DeviceAddress>) -> OneWireResult<(), Self::BusError> {
        if rom.is_some_and(|rom| !rom.is_valid()) {
            return Err(OneWireError::InvalidRomCrc);
        }
        let od = self.get_overdrive_mode()?;
        let cmd = match (rom.is_some(), od) {
            (true, false) => ONEWIRE_MATCH_ROM_CMD,
            (true, true) => ONEWIRE_MATCH_ROM_CMD_OD,
            (false, false) => ONEWIRE_SKIP_ROM_CMD,
            (false, true) => ONEWIRE_SKIP_ROM_CMD_OD,
        };
        let status = self.reset()?;
        if status.shortcircuit() {
            return Err(OneWireError::ShortCircuit);
        }
        if !status.presence() {
            return Err(OneWireError::NoDevicePresent);
        }
        self.write_byte(cmd)?;
        if let Some(rom) = rom {
            for &b in rom.as_bytes() {
                self.write_byte(b)?;
            }
        }
        Ok(())
    }
}
