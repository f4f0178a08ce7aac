#![no_std]
#![deny(missing_docs)]
//! # onewire-bus
//! A no-std core for the 1-Wire protocol.
//!
//! The [OneWire] trait defines the bit-level operations a bus master has to provide: resetting
//! the bus, writing and reading bits, and writing and reading bytes.
//!
//! On top of it, [SearchState] implements the ROM search algorithm used to enumerate every
//! device sharing one bus, including the family include/exclude filter loop that port adapters
//! run around it. [OneWireSearch] wraps a search state and a bus into a simple iterator-style API.
//!
//! Addresses are carried as [DeviceAddress] values, validated with [OneWireCrc]. [Crc16] is the
//! 16-bit 1-Wire CRC used by memory devices and the network adapter handshake.

#[cfg(any(test, feature = "sim"))]
extern crate std;

mod address;
mod bus;
pub mod consts;
mod error;
mod search;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
mod traits;
mod utils;

pub use address::{DeviceAddress, FamilySet};
pub use bus::{BusSpeed, ChangeCondition, PowerDuration, PowerLevel, ResetResult};
pub use error::{OneWireError, UnknownCode};
pub use search::{
    OneWireSearch, OneWireSearchKind, SearchState, strong_access_block, strong_access_matches,
};
pub use traits::{OneWire, OneWireStatus};
pub use utils::{Crc16, OneWireCrc, bit_at, set_bit_at};

/// Error type for 1-Wire operations.
pub type OneWireResult<T, E> = Result<T, OneWireError<E>>;
