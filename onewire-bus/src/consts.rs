//! ROM function commands understood by every 1-Wire slave.

/// Match ROM: the following 64 bits address exactly one device.
pub const ONEWIRE_MATCH_ROM_CMD: u8 = 0x55;

/// Skip ROM: address every device on the bus.
pub const ONEWIRE_SKIP_ROM_CMD: u8 = 0xcc;

/// Read ROM: the only device on a single-drop bus sends its 64-bit address.
pub const ONEWIRE_READ_ROM_CMD: u8 = 0x33;

/// The Overdrive-Match ROM command followed by a 64-bit
/// ROM sequence transmitted at overdrive speed allows the
/// bus master to address a specific device on a multidrop
/// bus and to simultaneously set it in overdrive mode.
/// Devices already in overdrive mode remain in overdrive
/// mode until the next reset pulse at standard speed.
pub const ONEWIRE_MATCH_ROM_CMD_OD: u8 = 0x69;

/// Overdrive-Skip ROM. Like Skip ROM, but every device on the
/// bus switches to overdrive speed. All communication following
/// this command has to occur at overdrive speed until a reset
/// pulse of minimum 480μs duration.
pub const ONEWIRE_SKIP_ROM_CMD_OD: u8 = 0x3c;

/// Command to search for devices on the 1-Wire bus
pub const ONEWIRE_SEARCH_CMD: u8 = 0xf0;

/// Command to search for devices in alarm state on the 1-Wire bus
pub const ONEWIRE_CONDITIONAL_SEARCH_CMD: u8 = 0xec;
