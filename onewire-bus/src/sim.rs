//! A simulated 1-Wire bus, slot by slot.
//!
//! Every device runs the ROM layer of a real slave: it takes the command byte after a
//! reset and answers Search ROM, Conditional Search, Match ROM, Skip ROM and Read ROM.
//! The line is the wired-AND of the master and every device, so multi-drop effects
//! such as search discrepancies come out exactly as on hardware.
//!
//! Enabled by the `sim` feature.

use crate::{
    DeviceAddress, OneWire, OneWireResult, ResetResult,
    consts::{
        ONEWIRE_CONDITIONAL_SEARCH_CMD, ONEWIRE_MATCH_ROM_CMD, ONEWIRE_READ_ROM_CMD,
        ONEWIRE_SEARCH_CMD, ONEWIRE_SKIP_ROM_CMD,
    },
    utils::bit_at,
};
use core::convert::Infallible;
use std::vec::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Command { count: u8, value: u8 },
    Search { index: u8, step: u8 },
    Match { index: u8 },
    ReadRom { index: u8 },
    Selected,
    Asleep,
}

#[derive(Debug, Clone)]
struct SimDevice {
    address: DeviceAddress,
    alarm: bool,
    phase: Phase,
}

impl SimDevice {
    fn rom_bit(&self, index: u8) -> bool {
        bit_at(self.address.as_bytes(), index as usize)
    }

    /// Level the device drives in the current slot, `true` when it releases the line.
    fn drive(&self) -> bool {
        match self.phase {
            Phase::Search { index, step: 0 } => self.rom_bit(index),
            Phase::Search { index, step: 1 } => !self.rom_bit(index),
            Phase::ReadRom { index } => self.rom_bit(index),
            _ => true,
        }
    }

    fn observe(&mut self, line: bool) {
        self.phase = match self.phase {
            Phase::Command { count: 7, value } => self.dispatch(value | (line as u8) << 7),
            Phase::Command { count, value } => Phase::Command {
                count: count + 1,
                value: value | (line as u8) << count,
            },
            Phase::Search { index, step } if step < 2 => Phase::Search {
                index,
                step: step + 1,
            },
            Phase::Search { index, .. } => self.follow(index, line, |index| Phase::Search {
                index,
                step: 0,
            }),
            Phase::Match { index } => self.follow(index, line, |index| Phase::Match { index }),
            Phase::ReadRom { index: 63 } => Phase::Selected,
            Phase::ReadRom { index } => Phase::ReadRom { index: index + 1 },
            other => other,
        };
    }

    fn follow(&self, index: u8, line: bool, next: impl FnOnce(u8) -> Phase) -> Phase {
        if line != self.rom_bit(index) {
            Phase::Asleep
        } else if index == 63 {
            Phase::Selected
        } else {
            next(index + 1)
        }
    }

    fn dispatch(&self, command: u8) -> Phase {
        match command {
            ONEWIRE_SEARCH_CMD => Phase::Search { index: 0, step: 0 },
            ONEWIRE_CONDITIONAL_SEARCH_CMD if self.alarm => Phase::Search { index: 0, step: 0 },
            ONEWIRE_MATCH_ROM_CMD => Phase::Match { index: 0 },
            ONEWIRE_SKIP_ROM_CMD => Phase::Selected,
            ONEWIRE_READ_ROM_CMD => Phase::ReadRom { index: 0 },
            _ => Phase::Asleep,
        }
    }
}

/// A simulated multi-drop 1-Wire bus.
#[derive(Debug, Clone, Default)]
pub struct SimBus {
    devices: Vec<SimDevice>,
    shorted: bool,
    overdrive: bool,
}

impl SimBus {
    /// An empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus populated with `addresses`.
    pub fn with_devices(addresses: impl IntoIterator<Item = DeviceAddress>) -> Self {
        let mut bus = Self::new();
        addresses.into_iter().for_each(|a| bus.add(a));
        bus
    }

    /// Attach a device.
    pub fn add(&mut self, address: DeviceAddress) {
        self.devices.push(SimDevice {
            address,
            alarm: false,
            phase: Phase::Asleep,
        });
    }

    /// Attach a device in alarm state.
    pub fn add_alarming(&mut self, address: DeviceAddress) {
        self.add(address);
        self.set_alarm(address, true);
    }

    /// Detach a device.
    pub fn remove(&mut self, address: DeviceAddress) {
        self.devices.retain(|d| d.address != address);
    }

    /// Change the alarm state of an attached device.
    pub fn set_alarm(&mut self, address: DeviceAddress, alarm: bool) {
        self.devices
            .iter_mut()
            .filter(|d| d.address == address)
            .for_each(|d| d.alarm = alarm);
    }

    /// Short the line to ground, or remove the short.
    pub fn set_short(&mut self, shorted: bool) {
        self.shorted = shorted;
    }

    /// Addresses of the attached devices.
    pub fn addresses(&self) -> impl Iterator<Item = DeviceAddress> + '_ {
        self.devices.iter().map(|d| d.address)
    }

    /// Issue a reset pulse.
    pub fn reset_pulse(&mut self) -> ResetResult {
        if self.shorted {
            return ResetResult::Short;
        }
        self.devices
            .iter_mut()
            .for_each(|d| d.phase = Phase::Command { count: 0, value: 0 });
        if self.devices.is_empty() {
            ResetResult::NoPresence
        } else {
            ResetResult::Presence
        }
    }

    /// Run one time slot. The master writes `bit`; a 1 doubles as a read slot.
    ///
    /// Returns the sampled line level.
    pub fn slot(&mut self, bit: bool) -> bool {
        let line = !self.shorted && self.devices.iter().fold(bit, |line, d| line && d.drive());
        self.devices.iter_mut().for_each(|d| d.observe(line));
        line
    }

    /// Exchange a byte, least significant bit first. Sending 0xff reads a byte.
    pub fn touch_byte(&mut self, byte: u8) -> u8 {
        (0..8).fold(0, |acc, i| acc | (self.slot((byte >> i) & 0x1 == 0x1) as u8) << i)
    }
}

impl OneWire for SimBus {
    type Status = ResetResult;
    type BusError = Infallible;

    fn reset(&mut self) -> OneWireResult<Self::Status, Self::BusError> {
        Ok(self.reset_pulse())
    }

    fn write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError> {
        self.touch_byte(byte);
        Ok(())
    }

    fn read_byte(&mut self) -> OneWireResult<u8, Self::BusError> {
        Ok(self.touch_byte(0xff))
    }

    fn write_bit(&mut self, bit: bool) -> OneWireResult<(), Self::BusError> {
        self.slot(bit);
        Ok(())
    }

    fn read_bit(&mut self) -> OneWireResult<bool, Self::BusError> {
        Ok(self.slot(true))
    }

    fn get_overdrive_mode(&mut self) -> OneWireResult<bool, Self::BusError> {
        Ok(self.overdrive)
    }

    fn set_overdrive_mode(&mut self, enable: bool) -> OneWireResult<(), Self::BusError> {
        self.overdrive = enable;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_rom_on_single_drop_bus() {
        let address = DeviceAddress::from_parts(0x28, [0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6]);
        let mut bus = SimBus::with_devices([address]);
        assert_eq!(bus.reset().unwrap(), ResetResult::Presence);
        bus.write_byte(ONEWIRE_READ_ROM_CMD).unwrap();
        let mut rom = [0u8; 8];
        rom.iter_mut().for_each(|b| *b = bus.read_byte().unwrap());
        assert_eq!(DeviceAddress::new(rom), address);
    }

    #[test]
    fn match_rom_silences_other_devices() {
        let a = DeviceAddress::from_parts(0x28, [1, 0, 0, 0, 0, 0]);
        let b = DeviceAddress::from_parts(0x28, [2, 0, 0, 0, 0, 0]);
        let mut bus = SimBus::with_devices([a, b]);
        bus.address(Some(a)).unwrap();
        // a sits in Selected, b is asleep, the line idles high
        assert_eq!(bus.read_byte().unwrap(), 0xff);
    }

    #[test]
    fn empty_and_shorted_bus() {
        let mut bus = SimBus::new();
        assert_eq!(bus.reset().unwrap(), ResetResult::NoPresence);
        bus.set_short(true);
        assert_eq!(bus.reset().unwrap(), ResetResult::Short);
        assert!(!bus.slot(true));
    }
}
