//! Request packets for the DS2480 and interpretation of its responses.
//!
//! A [`PacketBuilder`] queues commands and data into packets, switching between command
//! and data mode as needed, and returns the offset of each command's response within
//! the concatenated response stream. The session writes the packets of the finished
//! [`Transaction`] one after the other and reads back their responses.

use crate::{
    registers::{
        BaudRate, CommunicationCommand, ConfigurationCommand, MODE_COMMAND, MODE_DATA, Parameter,
        ParameterValue, ResetResponse, SpeedMode,
    },
    state::AdapterState,
};
use onewire_bus::{BusSpeed, OneWireStatus, SearchState, bit_at, set_bit_at};

/// Response bytes a single packet may expect.
pub const MAX_PACKET_RESPONSE: usize = 64;

/// How data bytes are put on the 1-Wire bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteFraming {
    /// One byte per byte in data mode.
    #[default]
    DataMode,
    /// Eight single bit commands per byte.
    BitSlots,
}

/// Bytes written in one go, and the number of response bytes they produce.
///
/// A packet with neither is a settle marker: the session waits for the bus to
/// recover from a long alarm reset and discards whatever the adapter sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    /// Bytes to write.
    pub request: Vec<u8>,
    /// Response bytes to read back.
    pub response_len: usize,
}

impl Packet {
    /// Whether this is a settle marker.
    pub fn is_settle(&self) -> bool {
        self.request.is_empty() && self.response_len == 0
    }
}

/// Packets of one transaction, in send order.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    packets: Vec<Packet>,
    response_len: usize,
}

impl Transaction {
    /// Packets in send order.
    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    /// Response bytes expected over all packets.
    pub fn response_len(&self) -> usize {
        self.response_len
    }
}

/// Location of a run of data bytes in the response stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataBytes {
    offset: usize,
    count: usize,
    framing: ByteFraming,
}

impl DataBytes {
    /// Response bytes taken by the run.
    pub fn response_len(&self) -> usize {
        match self.framing {
            ByteFraming::DataMode => self.count,
            ByteFraming::BitSlots => self.count * 8,
        }
    }

    /// Extract the bytes sampled on the bus into `out`.
    pub fn decode(&self, response: &[u8], out: &mut [u8]) {
        let response = &response[self.offset..self.offset + self.response_len()];
        match self.framing {
            ByteFraming::DataMode => out[..self.count].copy_from_slice(response),
            ByteFraming::BitSlots => {
                for (byte, slots) in out.iter_mut().zip(response.chunks_exact(8)) {
                    *byte = slots.iter().enumerate().fold(0, |acc, (i, &r)| {
                        acc | (CommunicationCommand::bit_result(r) as u8) << i
                    });
                }
            }
        }
    }
}

/// Queues DS2480 commands into a [`Transaction`].
///
/// Borrows the adapter state to keep track of command/data mode and to pick the slot
/// timing of communication commands.
pub struct PacketBuilder<'a> {
    state: &'a mut AdapterState,
    framing: ByteFraming,
    packets: Vec<Packet>,
    current: Packet,
    response_len: usize,
}

impl<'a> PacketBuilder<'a> {
    /// Start an empty transaction.
    pub fn new(state: &'a mut AdapterState, framing: ByteFraming) -> Self {
        Self {
            state,
            framing,
            packets: Vec::new(),
            current: Packet::default(),
            response_len: 0,
        }
    }

    fn push(&mut self, bytes: &[u8], response_len: usize) -> usize {
        if self.current.response_len + response_len > MAX_PACKET_RESPONSE {
            self.packets.push(core::mem::take(&mut self.current));
        }
        let offset = self.response_len;
        self.current.request.extend_from_slice(bytes);
        self.current.response_len += response_len;
        self.response_len += response_len;
        offset
    }

    fn close_packet(&mut self) {
        if !self.current.request.is_empty() {
            self.packets.push(core::mem::take(&mut self.current));
        }
    }

    fn command_mode(&mut self) {
        if !self.state.in_command_mode {
            self.push(&[MODE_COMMAND], 0);
            self.state.in_command_mode = true;
        }
    }

    fn data_mode(&mut self) {
        if self.state.in_command_mode {
            self.push(&[MODE_DATA], 0);
            self.state.in_command_mode = false;
        }
    }

    fn push_data(&mut self, byte: u8) {
        if byte == MODE_COMMAND {
            // doubled so it is not taken for a mode switch
            self.push(&[byte, byte], 1);
        } else {
            self.push(&[byte], 1);
        }
    }

    /// Insert a settle marker.
    pub fn settle(&mut self) {
        self.close_packet();
        self.packets.push(Packet::default());
    }

    /// Reset pulse. Returns the response offset.
    pub fn reset(&mut self) -> usize {
        self.command_mode();
        let offset = self.push(&[CommunicationCommand::reset(self.state.speed_mode).into_bits()], 1);
        if self.state.long_alarm_check
            && matches!(self.state.bus_speed, BusSpeed::Regular | BusSpeed::Flex)
        {
            self.settle();
        }
        offset
    }

    /// Write `data`, sampling the bus in each slot, using the configured framing.
    pub fn data_bytes(&mut self, data: &[u8]) -> DataBytes {
        let offset = self.response_len;
        match self.framing {
            ByteFraming::DataMode => {
                self.data_mode();
                data.iter().for_each(|&b| self.push_data(b));
            }
            ByteFraming::BitSlots => {
                self.command_mode();
                let speed = self.state.speed_mode;
                for &byte in data {
                    for i in 0..8 {
                        let cmd = CommunicationCommand::bit(speed, (byte >> i) & 0x1 == 0x1, false);
                        self.push(&[cmd.into_bits()], 1);
                    }
                }
            }
        }
        DataBytes {
            offset,
            count: data.len(),
            framing: self.framing,
        }
    }

    /// Write a single data byte.
    pub fn data_byte(&mut self, byte: u8) -> DataBytes {
        self.data_bytes(&[byte])
    }

    /// Write a byte as bit slots with the strong pullup armed after the last one.
    pub fn primed_data_byte(&mut self, byte: u8) -> DataBytes {
        self.command_mode();
        let offset = self.response_len;
        let speed = self.state.speed_mode;
        for i in 0..8 {
            let cmd = CommunicationCommand::bit(speed, (byte >> i) & 0x1 == 0x1, i == 7);
            self.push(&[cmd.into_bits()], 1);
        }
        DataBytes {
            offset,
            count: 1,
            framing: ByteFraming::BitSlots,
        }
    }

    /// Single time slot writing `bit`, with the strong pullup armed after it if `arm`.
    pub fn data_bit(&mut self, bit: bool, arm: bool) -> usize {
        self.command_mode();
        let cmd = CommunicationCommand::bit(self.state.speed_mode, bit, arm);
        self.push(&[cmd.into_bits()], 1)
    }

    /// One accelerated search round steered by `search`. Returns the offset of the
    /// 16-byte response.
    ///
    /// The search ROM command itself has to be queued before.
    pub fn search(&mut self, search: &SearchState) -> usize {
        let speed = self.state.speed_mode;
        self.command_mode();
        self.push(&[CommunicationCommand::search_accelerator(speed, true).into_bits()], 0);
        self.data_mode();
        let mut request = [0u8; 16];
        for position in 1..=64u8 {
            set_bit_at(&mut request, position as usize * 2 - 1, search.direction(position));
        }
        let offset = self.response_len;
        request.iter().for_each(|&b| self.push_data(b));
        self.command_mode();
        self.push(&[CommunicationCommand::search_accelerator(speed, false).into_bits()], 0);
        offset
    }

    /// Write a configuration parameter. Returns the offset of the echo.
    pub fn set_parameter<V: ParameterValue>(&mut self, value: V) -> usize {
        self.command_mode();
        self.push(&[ConfigurationCommand::write(value).into_bits()], 1)
    }

    /// Change the baud rate. The echo is sent at the new rate, so none is expected.
    pub fn set_baud(&mut self, baud: BaudRate) {
        self.command_mode();
        self.push(&[ConfigurationCommand::write(baud).into_bits()], 0);
    }

    /// Read a configuration parameter. Returns the response offset.
    pub fn get_parameter(&mut self, parameter: Parameter) -> usize {
        self.command_mode();
        self.push(&[ConfigurationCommand::read(parameter).into_bits()], 1)
    }

    /// Queue a raw command byte. Returns the response offset.
    pub fn send_command(&mut self, command: u8, expect_response: bool) -> usize {
        self.command_mode();
        self.push(&[command], expect_response as usize)
    }

    /// Load the timing parameters of the selected 1-Wire speed. Returns the offset of
    /// the first echo.
    pub fn set_speed(&mut self) -> usize {
        let profile = self.state.profile();
        let offset = self.set_parameter(profile.slew);
        self.set_parameter(profile.write1_low);
        self.set_parameter(profile.sample_offset);
        offset
    }

    /// Finish the transaction.
    pub fn finish(mut self) -> Transaction {
        self.close_packet();
        Transaction {
            packets: self.packets,
            response_len: self.response_len,
        }
    }
}

/// Decode a reset response, recording what it tells about the adapter.
///
/// Returns the byte itself if it is not a reset response.
pub fn interpret_reset(state: &mut AdapterState, response: u8) -> Result<ResetResponse, u8> {
    let reset = ResetResponse::from_bits(response);
    if !reset.is_valid() {
        return Err(response);
    }
    state.chip_revision = Some(reset.revision());
    state.program_voltage = Some(reset.program_voltage());
    state.long_alarm_check =
        reset.alarm() && matches!(state.bus_speed, BusSpeed::Regular | BusSpeed::Flex);
    Ok(reset)
}

/// Finish an accelerated search round from its 16-byte response.
///
/// Each ROM bit takes two response bits: the discrepancy flag, then the chosen bit.
pub fn interpret_search(search: &mut SearchState, response: &[u8]) -> bool {
    let mut rom = [0u8; 8];
    let mut last_zero = 0;
    let mut family_zero = 0;
    for i in 0..64 {
        let discrepancy = bit_at(response, i * 2);
        let chosen = bit_at(response, i * 2 + 1);
        set_bit_at(&mut rom, i, chosen);
        if discrepancy && !chosen {
            last_zero = i as u8 + 1;
            if i < 8 {
                family_zero = i as u8 + 1;
            }
        }
    }
    search.accept(rom, last_zero, family_zero)
}

/// Baud rate wanted for streaming `operation` at `speed`, capped at `max`.
pub fn desired_baud(operation: Operation, speed: BusSpeed, max: BaudRate) -> BaudRate {
    let baud = match (operation, speed) {
        (Operation::Byte, BusSpeed::Overdrive) => BaudRate::Baud115200,
        (Operation::Search, BusSpeed::Overdrive) => BaudRate::Baud57600,
        _ => BaudRate::Baud9600,
    };
    baud.min(max)
}

/// Kind of streamed operation, for [`desired_baud`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Data bytes.
    Byte,
    /// Accelerated search.
    Search,
}

impl SpeedMode {
    /// Slot timing used for `speed`.
    pub fn for_bus_speed(speed: BusSpeed) -> Self {
        if speed == BusSpeed::Overdrive {
            Self::Overdrive
        } else {
            Self::Flex
        }
    }
}
