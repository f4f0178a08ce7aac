use bitfield_struct::bitfield;
use onewire_bus::{OneWireStatus, ResetResult};

pub(crate) const MODE_DATA: u8 = 0xe1; // Switch to data mode
pub(crate) const MODE_COMMAND: u8 = 0xe3; // Switch to command mode
pub(crate) const MODE_STOP_PULSE: u8 = 0xf1; // Terminate a strong pullup or program pulse

/// Timing mode the DS2480 generates 1-Wire slots with.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeedMode {
    /// Standard speed, fixed timing.
    #[default]
    Regular = 0,
    /// Standard speed, timing from the configuration parameters.
    Flex = 1,
    /// Overdrive speed.
    Overdrive = 2,
    /// Pulse commands.
    Pulse = 3,
}

impl SpeedMode {
    const fn into_bits(self) -> u8 {
        self as u8
    }

    const fn from_bits(value: u8) -> Self {
        match value & 0x3 {
            0 => Self::Regular,
            1 => Self::Flex,
            2 => Self::Overdrive,
            _ => Self::Pulse,
        }
    }
}

/// Function field of a communication command.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Function {
    /// A single time slot.
    #[default]
    Bit = 0,
    /// Search accelerator on or off.
    SearchAccelerator = 1,
    /// Reset and presence detect.
    Reset = 2,
    /// Strong pullup or program pulse.
    Pulse = 3,
}

impl Function {
    const fn into_bits(self) -> u8 {
        self as u8
    }

    const fn from_bits(value: u8) -> Self {
        match value & 0x3 {
            0 => Self::Bit,
            1 => Self::SearchAccelerator,
            2 => Self::Reset,
            _ => Self::Pulse,
        }
    }
}

#[bitfield(u8)]
/// # Communication command
///
/// Sent in command mode to generate 1-Wire activity. Bit 7 is set, which tells the
/// DS2480 it is not a configuration command.
pub struct CommunicationCommand {
    #[bits(1, default = true)]
    _marker: bool,
    /// Arm the strong pullup to start after the slot (bit function), or arm a pulse.
    pub arm: bool,
    /// Slot timing.
    #[bits(2)]
    pub speed: SpeedMode,
    /// Bit to write (bit function), accelerator on (search function) or 12V select
    /// (pulse function).
    pub value: bool,
    /// What to do.
    #[bits(2)]
    pub function: Function,
    #[bits(1, default = true)]
    _command: bool,
}

impl CommunicationCommand {
    /// Single time slot writing `bit`.
    pub fn bit(speed: SpeedMode, bit: bool, arm: bool) -> Self {
        Self::new()
            .with_function(Function::Bit)
            .with_speed(speed)
            .with_value(bit)
            .with_arm(arm)
    }

    /// Reset pulse.
    pub fn reset(speed: SpeedMode) -> Self {
        Self::new().with_function(Function::Reset).with_speed(speed)
    }

    /// Search accelerator on or off.
    pub fn search_accelerator(speed: SpeedMode, on: bool) -> Self {
        Self::new()
            .with_function(Function::SearchAccelerator)
            .with_speed(speed)
            .with_value(on)
    }

    /// Immediate 5V strong pullup, or 12V program pulse when `program` is set.
    pub fn pulse(program: bool) -> Self {
        Self::new()
            .with_function(Function::Pulse)
            .with_speed(SpeedMode::Pulse)
            .with_value(program)
    }

    /// Whether `response` answers a single bit command with a sampled 1.
    pub fn bit_result(response: u8) -> bool {
        response & 0x3 == 0x3
    }
}

/// Configuration parameter codes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parameter {
    /// Read form of a configuration command, the parameter sits in the value field.
    #[default]
    Read = 0,
    /// Pulldown slew rate.
    Slew = 1,
    /// Program pulse duration.
    Pulse12V = 2,
    /// Strong pullup duration.
    Pulse5V = 3,
    /// Write-1 low time.
    Write1Low = 4,
    /// Data sample offset and write-0 recovery time.
    SampleOffset = 5,
    /// Active pullup on time.
    ActivePullupTime = 6,
    /// RS232 baud rate.
    Baud = 7,
}

impl Parameter {
    const fn into_bits(self) -> u8 {
        self as u8
    }

    const fn from_bits(value: u8) -> Self {
        match value & 0x7 {
            0 => Self::Read,
            1 => Self::Slew,
            2 => Self::Pulse12V,
            3 => Self::Pulse5V,
            4 => Self::Write1Low,
            5 => Self::SampleOffset,
            6 => Self::ActivePullupTime,
            _ => Self::Baud,
        }
    }
}

#[bitfield(u8)]
/// # Configuration command
///
/// Writes or reads one of the timing or baud rate parameters. The DS2480 echoes a write
/// with bit 0 cleared. A read returns the current value in bits 3-1 with every other
/// bit cleared.
pub struct ConfigurationCommand {
    #[bits(1, default = true)]
    _marker: bool,
    /// Parameter value, or the parameter to read.
    #[bits(3)]
    pub value: u8,
    /// Parameter to write, or [`Parameter::Read`].
    #[bits(3)]
    pub parameter: Parameter,
    #[bits(1)]
    _command: bool,
}

impl ConfigurationCommand {
    /// Write `value`.
    pub fn write<V: ParameterValue>(value: V) -> Self {
        Self::new().with_parameter(V::PARAMETER).with_value(value.code())
    }

    /// Read `parameter`.
    pub fn read(parameter: Parameter) -> Self {
        Self::new()
            .with_parameter(Parameter::Read)
            .with_value(parameter as u8)
    }

    /// Response the DS2480 sends to this command when it is a write.
    pub fn echo(&self) -> u8 {
        self.into_bits() & 0xfe
    }

    /// Value carried by the response to a read, [`None`] if the response is malformed.
    pub fn read_result(response: u8) -> Option<u8> {
        (response & 0xf1 == 0).then_some((response >> 1) & 0x7)
    }
}

/// A value of one of the configuration parameters.
pub trait ParameterValue: Copy {
    /// The parameter this is a value of.
    const PARAMETER: Parameter;
    /// 3-bit parameter code.
    fn code(self) -> u8;
}

macro_rules! parameter_value {
    ($(#[$meta:meta])* $name:ident = $param:ident { $($(#[$vmeta:meta])* $variant:ident = $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $code),+
        }

        impl ParameterValue for $name {
            const PARAMETER: Parameter = Parameter::$param;

            fn code(self) -> u8 {
                self as u8
            }
        }

        impl TryFrom<u8> for $name {
            type Error = u8;

            fn try_from(code: u8) -> Result<Self, Self::Error> {
                match code {
                    $($code => Ok(Self::$variant),)+
                    other => Err(other),
                }
            }
        }
    };
}

parameter_value!(
    /// Pulldown slew rate, in V/µs.
    SlewRate = Slew {
        /// 15 V/µs.
        V15_00 = 0,
        /// 2.2 V/µs.
        V2_20 = 1,
        /// 1.65 V/µs.
        V1_65 = 2,
        /// 1.37 V/µs.
        V1_37 = 3,
        /// 1.1 V/µs.
        V1_10 = 4,
        /// 0.83 V/µs.
        V0_83 = 5,
        /// 0.7 V/µs.
        V0_70 = 6,
        /// 0.55 V/µs.
        V0_55 = 7,
    }
);

parameter_value!(
    /// Program pulse duration.
    ProgramPulseTime = Pulse12V {
        /// 32µs.
        Us32 = 0,
        /// 64µs.
        Us64 = 1,
        /// 128µs.
        Us128 = 2,
        /// 256µs.
        Us256 = 3,
        /// 512µs.
        Us512 = 4,
        /// 1024µs.
        Us1024 = 5,
        /// 2048µs.
        Us2048 = 6,
        /// Until terminated.
        Infinite = 7,
    }
);

parameter_value!(
    /// Strong pullup duration.
    StrongPullupTime = Pulse5V {
        /// 16.4ms.
        Ms16_4 = 0,
        /// 65.5ms.
        Ms65_5 = 1,
        /// 131ms.
        Ms131 = 2,
        /// 262ms.
        Ms262 = 3,
        /// 524ms.
        Ms524 = 4,
        /// 1.05s.
        Ms1048 = 5,
        /// Dynamic current detect.
        Dynamic = 6,
        /// Until terminated.
        Infinite = 7,
    }
);

parameter_value!(
    /// Write-1 low time.
    Write1LowTime = Write1Low {
        /// 8µs.
        Us8 = 0,
        /// 9µs.
        Us9 = 1,
        /// 10µs.
        Us10 = 2,
        /// 11µs.
        Us11 = 3,
        /// 12µs.
        Us12 = 4,
        /// 13µs.
        Us13 = 5,
        /// 14µs.
        Us14 = 6,
        /// 15µs.
        Us15 = 7,
    }
);

parameter_value!(
    /// Data sample offset and write-0 recovery time.
    SampleOffsetTime = SampleOffset {
        /// 3µs.
        Us3 = 0,
        /// 4µs.
        Us4 = 1,
        /// 5µs.
        Us5 = 2,
        /// 6µs.
        Us6 = 3,
        /// 7µs.
        Us7 = 4,
        /// 8µs.
        Us8 = 5,
        /// 9µs.
        Us9 = 6,
        /// 10µs.
        Us10 = 7,
    }
);

parameter_value!(
    /// RS232 baud rate between host and adapter.
    BaudRate = Baud {
        /// 9600 bps, the rate after power up and master reset.
        Baud9600 = 0,
        /// 19200 bps.
        Baud19200 = 1,
        /// 57600 bps.
        Baud57600 = 2,
        /// 115200 bps.
        Baud115200 = 3,
    }
);

impl BaudRate {
    /// Bits per second.
    pub fn bps(self) -> u32 {
        match self {
            Self::Baud9600 => 9600,
            Self::Baud19200 => 19200,
            Self::Baud57600 => 57600,
            Self::Baud115200 => 115200,
        }
    }

    /// The fastest supported rate not above `bps`, 9600 at least.
    pub fn at_most(bps: u32) -> Self {
        [Self::Baud115200, Self::Baud57600, Self::Baud19200]
            .into_iter()
            .find(|b| b.bps() <= bps)
            .unwrap_or(Self::Baud9600)
    }
}

impl Default for BaudRate {
    fn default() -> Self {
        Self::Baud9600
    }
}

impl PartialOrd for BaudRate {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BaudRate {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

/// Flexible speed timing parameters used at one 1-Wire speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingProfile {
    /// Pulldown slew rate.
    pub slew: SlewRate,
    /// Write-1 low time.
    pub write1_low: Write1LowTime,
    /// Data sample offset.
    pub sample_offset: SampleOffsetTime,
}

impl TimingProfile {
    /// Timing used at regular, overdrive and hyperdrive speed.
    pub const fn standard() -> Self {
        Self {
            slew: SlewRate::V1_37,
            write1_low: Write1LowTime::Us10,
            sample_offset: SampleOffsetTime::Us8,
        }
    }

    /// Relaxed timing for long lines.
    pub const fn flex() -> Self {
        Self {
            slew: SlewRate::V0_83,
            write1_low: Write1LowTime::Us12,
            sample_offset: SampleOffsetTime::Us10,
        }
    }
}

impl Default for TimingProfile {
    fn default() -> Self {
        Self::standard()
    }
}

#[bitfield(u8)]
/// # Reset response
///
/// Answer to a reset command: `11 V RRR PP`.
pub struct ResetResponse {
    /// Presence code: 00 short, 01 presence, 10 alarming presence, 11 no presence.
    #[bits(2)]
    presence_code: u8,
    /// Chip revision.
    #[bits(3)]
    pub revision: u8,
    /// Whether 12V program voltage is available on the adapter.
    pub program_voltage: bool,
    #[bits(2)]
    marker: u8,
}

impl ResetResponse {
    /// Whether the top bits identify a reset response.
    pub fn is_valid(&self) -> bool {
        self.marker() == 0x3
    }
}

impl OneWireStatus for ResetResponse {
    fn presence(&self) -> bool {
        matches!(self.presence_code(), 0x1 | 0x2)
    }

    fn shortcircuit(&self) -> bool {
        self.presence_code() == 0x0
    }

    fn alarm(&self) -> bool {
        self.presence_code() == 0x2
    }

    fn result(&self) -> ResetResult {
        match self.presence_code() {
            0x0 => ResetResult::Short,
            0x1 => ResetResult::Presence,
            0x2 => ResetResult::Alarm,
            _ => ResetResult::NoPresence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn communication_command_bytes() {
        assert_eq!(CommunicationCommand::bit(SpeedMode::Regular, false, false).into_bits(), 0x81);
        assert_eq!(CommunicationCommand::bit(SpeedMode::Flex, true, false).into_bits(), 0x95);
        assert_eq!(CommunicationCommand::bit(SpeedMode::Regular, true, true).into_bits(), 0x93);
        assert_eq!(CommunicationCommand::reset(SpeedMode::Regular).into_bits(), 0xc1);
        assert_eq!(CommunicationCommand::reset(SpeedMode::Overdrive).into_bits(), 0xc9);
        assert_eq!(CommunicationCommand::search_accelerator(SpeedMode::Regular, true).into_bits(), 0xb1);
        assert_eq!(CommunicationCommand::search_accelerator(SpeedMode::Flex, false).into_bits(), 0xa5);
        assert_eq!(CommunicationCommand::pulse(false).into_bits(), 0xed);
        assert_eq!(CommunicationCommand::pulse(true).into_bits(), 0xfd);
        assert_eq!(CommunicationCommand::pulse(false).with_arm(true).into_bits(), 0xef);
    }

    #[test]
    fn configuration_command_bytes() {
        assert_eq!(ConfigurationCommand::write(SlewRate::V1_37).into_bits(), 0x17);
        assert_eq!(ConfigurationCommand::write(Write1LowTime::Us10).into_bits(), 0x45);
        assert_eq!(ConfigurationCommand::write(SampleOffsetTime::Us8).into_bits(), 0x5b);
        assert_eq!(ConfigurationCommand::write(StrongPullupTime::Infinite).into_bits(), 0x3f);
        assert_eq!(ConfigurationCommand::write(BaudRate::Baud115200).into_bits(), 0x77);
        assert_eq!(ConfigurationCommand::read(Parameter::Baud).into_bits(), 0x0f);
        assert_eq!(ConfigurationCommand::write(SlewRate::V1_37).echo(), 0x16);
    }

    #[test]
    fn responses() {
        assert_eq!(ConfigurationCommand::read_result(0x06), Some(3));
        assert_eq!(ConfigurationCommand::read_result(0x07), None);
        assert!(CommunicationCommand::bit_result(0x97));
        assert!(!CommunicationCommand::bit_result(0x94));

        let reset = ResetResponse::from_bits(0xcd);
        assert!(reset.is_valid());
        assert_eq!(reset.result(), ResetResult::Presence);
        assert_eq!(reset.revision(), 3);
        assert!(!reset.program_voltage());
        let reset = ResetResponse::from_bits(0xee);
        assert_eq!(reset.result(), ResetResult::Alarm);
        assert!(reset.program_voltage());
        assert!(!ResetResponse::from_bits(0x4d).is_valid());
    }

    #[test]
    fn baud_rates() {
        assert_eq!(BaudRate::at_most(100_000), BaudRate::Baud57600);
        assert_eq!(BaudRate::at_most(1200), BaudRate::Baud9600);
        assert!(BaudRate::Baud115200 > BaudRate::Baud19200);
        assert_eq!(BaudRate::try_from(2), Ok(BaudRate::Baud57600));
    }
}
