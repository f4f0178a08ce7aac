use log::debug;
use onewire_bus::consts::{ONEWIRE_CONDITIONAL_SEARCH_CMD, ONEWIRE_MATCH_ROM_CMD, ONEWIRE_SEARCH_CMD};
use onewire_bus::{
    BusSpeed, ChangeCondition, DeviceAddress, OneWireStatus, PowerDuration, ResetResult,
    strong_access_block, strong_access_matches,
};

use crate::{PortError, PortResult};

/// What an adapter can do beyond plain communication at regular speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Overdrive speed.
    pub overdrive: bool,
    /// Hyperdrive speed.
    pub hyperdrive: bool,
    /// Flexible regular speed timing for long lines.
    pub flex: bool,
    /// 12V EPROM program pulses.
    pub program: bool,
    /// Strong pullup power delivery.
    pub power_delivery: bool,
    /// Power delivery that ends when the device signals completion.
    pub smart_power: bool,
    /// Holding the line low.
    pub line_break: bool,
}

impl Capabilities {
    /// Every capability.
    pub const fn all() -> Self {
        Self {
            overdrive: true,
            hyperdrive: true,
            flex: true,
            program: true,
            power_delivery: true,
            smart_power: true,
            line_break: true,
        }
    }
}

/// A 1-Wire port adapter.
///
/// Implementations serialize their own I/O, so an adapter is shared between threads by
/// reference. Threads that need several operations in a row without interleaving take
/// [exclusive ownership](Self::begin_exclusive) first; every single operation takes it
/// implicitly for its own duration.
pub trait PortAdapter: Send + Sync {
    /// Adapter family name, e.g. `"DS9097U"`.
    fn adapter_name(&self) -> &str;

    /// One-line description of the ports the adapter runs on.
    fn port_type_description(&self) -> &str;

    /// Open the named port. Selecting the port already open is a no-op.
    fn select_port(&self, name: &str) -> PortResult<bool>;

    /// Close the port.
    fn free_port(&self) -> PortResult<()>;

    /// Name of the selected port.
    fn port_name(&self) -> PortResult<String>;

    /// Whether the adapter answers on the selected port.
    fn adapter_detected(&self) -> PortResult<bool>;

    /// Human readable adapter version.
    fn adapter_version(&self) -> PortResult<String>;

    /// What the adapter can do.
    fn capabilities(&self) -> PortResult<Capabilities>;

    /// Take exclusive ownership for the calling thread.
    ///
    /// # Returns
    /// `false` when `blocking` is unset and another thread owns the adapter.
    fn begin_exclusive(&self, blocking: bool) -> PortResult<bool>;

    /// Release exclusive ownership, if the calling thread has it.
    fn end_exclusive(&self);

    /// Whether the calling thread has exclusive ownership.
    fn holds_exclusive(&self) -> bool;

    /// Restrict the next searches to alarming devices.
    fn set_search_only_alarming(&self) -> PortResult<()>;

    /// Skip the reset before each search round.
    fn set_no_reset_search(&self) -> PortResult<()>;

    /// Search every device, with a reset before each round.
    fn set_search_all_devices(&self) -> PortResult<()>;

    /// Drop every family filter.
    fn target_all_families(&self) -> PortResult<()>;

    /// Only report devices of these families.
    fn target_family(&self, families: &[u8]) -> PortResult<()>;

    /// Never report devices of these families.
    fn exclude_family(&self, families: &[u8]) -> PortResult<()>;

    /// Restart the search and find the first device.
    fn find_first_device(&self) -> PortResult<bool>;

    /// Find the next device.
    fn find_next_device(&self) -> PortResult<bool>;

    /// Address of the device found last.
    fn address(&self) -> PortResult<DeviceAddress>;

    /// Reset the 1-Wire bus.
    fn reset(&self) -> PortResult<ResetResult>;

    /// Write one bit.
    fn put_bit(&self, bit: bool) -> PortResult<()>;

    /// Read one bit.
    fn get_bit(&self) -> PortResult<bool>;

    /// Write one byte.
    fn put_byte(&self, byte: u8) -> PortResult<()>;

    /// Read one byte.
    fn get_byte(&self) -> PortResult<u8>;

    /// Exchange a block of bytes, replacing each with the byte read back.
    fn data_block(&self, block: &mut [u8]) -> PortResult<()>;

    /// Set the strong pullup duration.
    fn set_power_duration(&self, duration: PowerDuration) -> PortResult<()>;

    /// Switch to strong pullup now or after the next bit or byte.
    ///
    /// # Returns
    /// Whether the line is already delivering power.
    fn start_power_delivery(&self, condition: ChangeCondition) -> PortResult<bool>;

    /// Set the program pulse duration.
    fn set_program_pulse_duration(&self, duration: PowerDuration) -> PortResult<()>;

    /// Issue a 12V program pulse now or after the next bit or byte.
    fn start_program_pulse(&self, condition: ChangeCondition) -> PortResult<bool>;

    /// Hold the line low.
    fn start_break(&self) -> PortResult<()>;

    /// Return the line to normal level.
    fn set_power_normal(&self) -> PortResult<()>;

    /// Change the 1-Wire speed.
    fn set_speed(&self, speed: BusSpeed) -> PortResult<()>;

    /// Current 1-Wire speed.
    fn speed(&self) -> PortResult<BusSpeed>;

    /// Read `len` bytes.
    fn get_block(&self, len: usize) -> PortResult<Vec<u8>> {
        let mut block = vec![0xff; len];
        self.data_block(&mut block)?;
        Ok(block)
    }

    /// Reset the bus and address one device.
    ///
    /// # Returns
    /// Whether any device answered the reset.
    fn select(&self, address: DeviceAddress) -> PortResult<bool> {
        let _scope = ExclusiveScope::enter(self)?;
        let mut block = [0u8; 9];
        block[0] = ONEWIRE_MATCH_ROM_CMD;
        block[1..].copy_from_slice(address.as_bytes());

        let presence = self.reset()?.presence();
        self.data_block(&mut block)?;
        Ok(presence)
    }

    /// Like [`select`](Self::select), failing when nobody answers.
    fn assert_select(&self, address: DeviceAddress) -> PortResult<()> {
        if self.select(address)? {
            Ok(())
        } else {
            Err(PortError::DeviceNotPresent(address))
        }
    }

    /// Whether the device answers a search steered along its address.
    fn is_present(&self, address: DeviceAddress) -> PortResult<bool> {
        self.strong_access(ONEWIRE_SEARCH_CMD, address)
    }

    /// Whether the device answers a conditional search steered along its address.
    fn is_alarming(&self, address: DeviceAddress) -> PortResult<bool> {
        self.strong_access(ONEWIRE_CONDITIONAL_SEARCH_CMD, address)
    }

    /// Run one search round steered along `address` with the given search command.
    fn strong_access(&self, command: u8, address: DeviceAddress) -> PortResult<bool> {
        let _scope = ExclusiveScope::enter(self)?;
        if !self.reset()?.presence() {
            return Ok(false);
        }
        self.put_byte(command)?;
        let mut block = strong_access_block(&address);
        self.data_block(&mut block)?;
        Ok(strong_access_matches(&address, &block))
    }

    /// Every device the current search settings find.
    fn all_device_addresses(&self) -> PortResult<Vec<DeviceAddress>> {
        let _scope = ExclusiveScope::enter(self)?;
        let mut found = Vec::new();
        let mut more = self.find_first_device()?;
        while more {
            found.push(self.address()?);
            more = self.find_next_device()?;
        }
        debug!("Search found {} device(s)", found.len());
        Ok(found)
    }
}

/// Exclusive ownership of a [`PortAdapter`] for the lifetime of the scope.
///
/// Releases on drop only if the scope took the ownership itself.
pub struct ExclusiveScope<'a, A: PortAdapter + ?Sized> {
    adapter: &'a A,
    acquired: bool,
}

impl<'a, A: PortAdapter + ?Sized> ExclusiveScope<'a, A> {
    /// Wait for exclusive ownership of `adapter`.
    pub fn enter(adapter: &'a A) -> PortResult<Self> {
        let acquired = !adapter.holds_exclusive();
        if acquired {
            adapter.begin_exclusive(true)?;
        }
        Ok(Self { adapter, acquired })
    }
}

impl<A: PortAdapter + ?Sized> Drop for ExclusiveScope<'_, A> {
    fn drop(&mut self) {
        if self.acquired {
            self.adapter.end_exclusive();
        }
    }
}
