use crate::registers::{BaudRate, SpeedMode, TimingProfile};
use onewire_bus::{BusSpeed, PowerLevel};

/// What the host knows about the DS2480 between transactions.
#[derive(Debug, Clone)]
pub struct AdapterState {
    /// Baud rate the DS2480 is configured for.
    pub baud: BaudRate,
    /// Slot timing carried by communication commands.
    pub speed_mode: SpeedMode,
    /// 1-Wire speed selected by the user.
    pub bus_speed: BusSpeed,
    /// Whether the DS2480 is in command mode.
    pub in_command_mode: bool,
    /// Chip revision, learned from the first reset response.
    pub chip_revision: Option<u8>,
    /// Whether 12V program voltage is available, learned from the first reset response.
    pub program_voltage: Option<bool>,
    /// Electrical level of the 1-Wire line.
    pub level: PowerLevel,
    /// Timing parameters per [`BusSpeed`].
    pub profiles: [TimingProfile; 4],
    /// Strong pullup primed to start after the next bit.
    pub prime_after_bit: bool,
    /// Strong pullup primed to start after the next byte.
    pub prime_after_byte: bool,
    /// An alarming device answered a reset; resets need extra settle time.
    pub long_alarm_check: bool,
    /// Whether the adapter answered the last detection.
    pub present: bool,
}

impl Default for AdapterState {
    fn default() -> Self {
        Self {
            baud: BaudRate::Baud9600,
            speed_mode: SpeedMode::Flex,
            bus_speed: BusSpeed::Regular,
            in_command_mode: true,
            chip_revision: None,
            program_voltage: None,
            level: PowerLevel::Normal,
            profiles: [
                TimingProfile::standard(),
                TimingProfile::flex(),
                TimingProfile::standard(),
                TimingProfile::standard(),
            ],
            prime_after_bit: false,
            prime_after_byte: false,
            long_alarm_check: false,
            present: false,
        }
    }
}

impl AdapterState {
    /// Timing parameters for the selected 1-Wire speed.
    pub fn profile(&self) -> TimingProfile {
        self.profiles[self.bus_speed as usize]
    }

    /// Return to the state after a master reset: 9600 baud, regular speed, command mode.
    pub fn master_reset(&mut self) {
        self.baud = BaudRate::Baud9600;
        self.bus_speed = BusSpeed::Regular;
        self.speed_mode = SpeedMode::Flex;
        self.in_command_mode = true;
    }
}
