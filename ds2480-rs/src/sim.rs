//! A simulated DS2480 on a simulated serial port.
//!
//! [`SimDs2480`] implements [`SerialTransport`] and answers the bytes written to it the
//! way the chip does: command and data mode, configuration parameters, communication
//! commands and the search accelerator. The 1-Wire side is a [`SimBus`], so every
//! slot reaches real simulated devices.
//!
//! Line conditions are modeled too. A break resets the chip, DTR and RTS both low cut
//! its power, and bytes sent at a baud rate other than the chip's are lost.
//!
//! Enabled by the `sim` feature.

use crate::{
    SerialTransport,
    registers::{
        BaudRate, CommunicationCommand, ConfigurationCommand, Function, MODE_COMMAND, MODE_DATA,
        MODE_STOP_PULSE, Parameter,
    },
};
use core::time::Duration;
use onewire_bus::{DeviceAddress, ResetResult, bit_at, set_bit_at, sim::SimBus};
use std::collections::VecDeque;
use thiserror::Error;

/// Errors of the simulated serial port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SimError {
    /// The port is not open.
    #[error("port is not open")]
    NotOpen,
}

/// Chip state lost on a master reset or power cycle.
#[derive(Debug, Clone)]
struct Chip {
    baud: BaudRate,
    awaiting_timing: bool,
    command_mode: bool,
    escape: bool,
    accelerator: bool,
    params: [u8; 8],
    pulse_pending: Option<u8>,
}

impl Default for Chip {
    fn default() -> Self {
        Self {
            baud: BaudRate::Baud9600,
            awaiting_timing: true,
            command_mode: true,
            escape: false,
            accelerator: false,
            params: [0; 8],
            pulse_pending: None,
        }
    }
}

/// A DS2480 behind a serial port, driving a [`SimBus`].
#[derive(Debug, Clone)]
pub struct SimDs2480 {
    bus: SimBus,
    chip: Chip,
    open: bool,
    host_baud: u32,
    dtr: bool,
    rts: bool,
    responsive: bool,
    fail_baud_change: bool,
    revision: u8,
    program_voltage: bool,
    output: VecDeque<u8>,
    written: Vec<u8>,
    breaks: usize,
    power_cycles: usize,
}

impl Default for SimDs2480 {
    fn default() -> Self {
        Self::with_bus(SimBus::new())
    }
}

impl SimDs2480 {
    /// An adapter on an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// An adapter on a bus populated with `addresses`.
    pub fn with_devices(addresses: impl IntoIterator<Item = DeviceAddress>) -> Self {
        Self::with_bus(SimBus::with_devices(addresses))
    }

    /// An adapter driving `bus`.
    pub fn with_bus(bus: SimBus) -> Self {
        Self {
            bus,
            chip: Chip::default(),
            open: false,
            host_baud: BaudRate::Baud9600.bps(),
            dtr: true,
            rts: true,
            responsive: true,
            fail_baud_change: false,
            revision: 3,
            program_voltage: false,
            output: VecDeque::new(),
            written: Vec::new(),
            breaks: 0,
            power_cycles: 0,
        }
    }

    /// Chip revision reported in reset responses.
    pub fn with_revision(mut self, revision: u8) -> Self {
        self.revision = revision & 0x7;
        self
    }

    /// Whether 12V program voltage is reported available.
    pub fn with_program_voltage(mut self, available: bool) -> Self {
        self.program_voltage = available;
        self
    }

    /// The simulated 1-Wire bus.
    pub fn bus(&self) -> &SimBus {
        &self.bus
    }

    /// The simulated 1-Wire bus, mutably.
    pub fn bus_mut(&mut self) -> &mut SimBus {
        &mut self.bus
    }

    /// Stop answering, as if the adapter was unplugged.
    pub fn set_responsive(&mut self, responsive: bool) {
        self.responsive = responsive;
    }

    /// Make the chip ignore baud rate changes.
    pub fn set_fail_baud_change(&mut self, fail: bool) {
        self.fail_baud_change = fail;
    }

    /// Every byte written to the port so far.
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Number of breaks sent.
    pub fn breaks(&self) -> usize {
        self.breaks
    }

    /// Number of times the chip was powered back up through DTR/RTS.
    pub fn power_cycles(&self) -> usize {
        self.power_cycles
    }

    fn powered(&self) -> bool {
        self.dtr || self.rts
    }

    fn set_lines(&mut self, dtr: bool, rts: bool) {
        let was_powered = self.powered();
        self.dtr = dtr;
        self.rts = rts;
        match (was_powered, self.powered()) {
            (false, true) => {
                self.power_cycles += 1;
                self.chip = Chip::default();
            }
            (true, false) => self.output.clear(),
            _ => {}
        }
    }

    fn receive(&mut self, byte: u8) {
        if self.chip.awaiting_timing {
            // the first byte after a reset only calibrates the chip
            self.chip.awaiting_timing = false;
        } else if self.chip.command_mode {
            self.command(byte);
        } else if self.chip.escape {
            self.chip.escape = false;
            if byte == MODE_COMMAND {
                self.data(byte);
            } else {
                self.chip.command_mode = true;
                self.command(byte);
            }
        } else if byte == MODE_COMMAND {
            self.chip.escape = true;
        } else {
            self.data(byte);
        }
    }

    fn command(&mut self, byte: u8) {
        match byte {
            MODE_DATA => self.chip.command_mode = false,
            MODE_COMMAND => {}
            MODE_STOP_PULSE => {
                let pulse = self
                    .chip
                    .pulse_pending
                    .take()
                    .unwrap_or(CommunicationCommand::pulse(false).into_bits());
                self.output.push_back(pulse & 0xfc);
            }
            b if b & 0x80 == 0 => self.configure(ConfigurationCommand::from_bits(b)),
            b => self.communicate(CommunicationCommand::from_bits(b)),
        }
    }

    fn configure(&mut self, cmd: ConfigurationCommand) {
        match cmd.parameter() {
            Parameter::Read => {
                let value = self.chip.params[cmd.value() as usize];
                self.output.push_back(value << 1);
            }
            Parameter::Baud => {
                if self.fail_baud_change {
                    return;
                }
                if let Ok(baud) = BaudRate::try_from(cmd.value()) {
                    self.chip.params[Parameter::Baud as usize] = cmd.value();
                    self.chip.baud = baud;
                }
            }
            parameter => {
                self.chip.params[parameter as usize] = cmd.value();
                self.output.push_back(cmd.echo());
            }
        }
    }

    fn communicate(&mut self, cmd: CommunicationCommand) {
        let byte = cmd.into_bits();
        match cmd.function() {
            Function::Bit => {
                let line = self.bus.slot(cmd.value());
                self.output.push_back((byte & 0xfc) | if line { 0x3 } else { 0x0 });
                if cmd.arm() {
                    self.chip.pulse_pending = Some(CommunicationCommand::pulse(false).into_bits());
                }
            }
            Function::SearchAccelerator => self.chip.accelerator = cmd.value(),
            Function::Reset => {
                let code = match self.bus.reset_pulse() {
                    ResetResult::Short => 0x0,
                    ResetResult::Presence => 0x1,
                    ResetResult::Alarm => 0x2,
                    ResetResult::NoPresence => 0x3,
                };
                self.output.push_back(
                    0xc0 | (self.program_voltage as u8) << 5 | self.revision << 2 | code,
                );
            }
            Function::Pulse if cmd.value() => self.output.push_back(byte & 0xfc),
            Function::Pulse => self.chip.pulse_pending = Some(byte),
        }
    }

    fn data(&mut self, byte: u8) {
        let response = if self.chip.accelerator {
            self.search_byte(byte)
        } else {
            self.bus.touch_byte(byte)
        };
        self.output.push_back(response);
    }

    /// Four ROM bits of an accelerated search. Bit 2j+1 of `request` is the direction
    /// for ROM bit j; the response carries the discrepancy flag in bit 2j and the bit
    /// taken in bit 2j+1.
    fn search_byte(&mut self, request: u8) -> u8 {
        let mut response = [0u8];
        for j in 0..4 {
            let direction = bit_at(&[request], 2 * j + 1);
            let id = self.bus.slot(true);
            let complement = self.bus.slot(true);
            let (discrepancy, taken) = match (id, complement) {
                (true, true) => (true, true),
                (false, false) => (true, direction),
                (id, _) => (false, id),
            };
            self.bus.slot(taken);
            set_bit_at(&mut response, 2 * j, discrepancy);
            set_bit_at(&mut response, 2 * j + 1, taken);
        }
        response[0]
    }
}

impl SerialTransport for SimDs2480 {
    type Error = SimError;

    fn open(&mut self, _name: &str) -> Result<(), Self::Error> {
        self.open = true;
        self.host_baud = BaudRate::Baud9600.bps();
        self.output.clear();
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), Self::Error> {
        if !self.open {
            return Err(SimError::NotOpen);
        }
        self.host_baud = baud;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.host_baud
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if !self.open {
            return Err(SimError::NotOpen);
        }
        self.output.clear();
        Ok(())
    }

    fn send_break(&mut self, _duration: Duration) -> Result<(), Self::Error> {
        if !self.open {
            return Err(SimError::NotOpen);
        }
        self.breaks += 1;
        self.output.clear();
        if self.powered() {
            self.chip = Chip::default();
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        if !self.open {
            return Err(SimError::NotOpen);
        }
        self.written.extend_from_slice(data);
        if !self.responsive || !self.powered() || self.host_baud != self.chip.baud.bps() {
            return Ok(());
        }
        data.iter().for_each(|&b| self.receive(b));
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, Self::Error> {
        if !self.open {
            return Err(SimError::NotOpen);
        }
        let count = buf.len().min(self.output.len());
        buf.iter_mut()
            .zip(self.output.drain(..count))
            .for_each(|(slot, b)| *slot = b);
        Ok(count)
    }

    fn set_dtr(&mut self, level: bool) -> Result<(), Self::Error> {
        if !self.open {
            return Err(SimError::NotOpen);
        }
        self.set_lines(level, self.rts);
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<(), Self::Error> {
        if !self.open {
            return Err(SimError::NotOpen);
        }
        self.set_lines(self.dtr, level);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened(sim: SimDs2480) -> SimDs2480 {
        let mut sim = sim;
        sim.open("sim").unwrap();
        sim
    }

    fn exchange(sim: &mut SimDs2480, request: &[u8]) -> Vec<u8> {
        sim.write(request).unwrap();
        let mut buf = [0u8; 64];
        let n = sim.read(&mut buf, Duration::ZERO).unwrap();
        buf[..n].to_vec()
    }

    #[test]
    fn timing_byte_then_commands() {
        let address = DeviceAddress::from_parts(0x28, [1, 2, 3, 4, 5, 6]);
        let mut sim = opened(SimDs2480::with_devices([address]));
        assert!(exchange(&mut sim, &[0xc1]).is_empty());
        assert_eq!(exchange(&mut sim, &[0x17, 0x0f, 0x95]), [0x16, 0x00, 0x97]);
        assert_eq!(exchange(&mut sim, &[0xc5]), [0xcd]);
    }

    #[test]
    fn data_mode_escape() {
        let mut sim = opened(SimDs2480::new());
        exchange(&mut sim, &[0xc1]);
        // an empty bus echoes whatever is written
        assert_eq!(exchange(&mut sim, &[0xe1, 0xe3, 0xe3, 0x00, 0xe3, 0x95]), [0xe3, 0x00, 0x97]);
    }

    #[test]
    fn baud_change_and_lines() {
        let mut sim = opened(SimDs2480::new());
        exchange(&mut sim, &[0xc1, 0x77]);
        // still at 9600 on the host side, the chip no longer hears us
        assert!(exchange(&mut sim, &[0x0f]).is_empty());
        sim.set_baud_rate(115200).unwrap();
        assert_eq!(exchange(&mut sim, &[0x0f]), [0x06]);

        sim.set_dtr(false).unwrap();
        sim.set_rts(false).unwrap();
        sim.set_dtr(true).unwrap();
        assert_eq!(sim.power_cycles(), 1);
        sim.set_baud_rate(9600).unwrap();
        exchange(&mut sim, &[0xc1]);
        assert_eq!(exchange(&mut sim, &[0x0f]), [0x00]);
    }

    #[test]
    fn closed_port_fails() {
        let mut sim = SimDs2480::new();
        assert_eq!(sim.write(&[0xc1]), Err(SimError::NotOpen));
        assert!(sim.written().is_empty());
    }
}
