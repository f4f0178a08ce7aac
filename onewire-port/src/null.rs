use onewire_bus::{BusSpeed, ChangeCondition, DeviceAddress, PowerDuration, ResetResult, SearchState};
use parking_lot::Mutex;

use crate::{Capabilities, ExclusiveGate, PortAdapter, PortError, PortResult};

#[derive(Default)]
struct Roster {
    devices: Vec<DeviceAddress>,
    next: usize,
    current: Option<DeviceAddress>,
    search: SearchState,
    speed: BusSpeed,
}

impl Roster {
    fn advance(&mut self) -> bool {
        while let Some(&address) = self.devices.get(self.next) {
            self.next += 1;
            if self.search.includes(address.family()) {
                self.current = Some(address);
                return true;
            }
        }
        self.current = None;
        false
    }
}

/// Adapter without hardware.
///
/// Searches walk a fixed device list, every device on it is present, and the bus reads
/// back all ones. Useful for exercising code above the adapter layer.
#[derive(Default)]
pub struct NullAdapter {
    gate: ExclusiveGate,
    roster: Mutex<Roster>,
}

impl NullAdapter {
    /// An adapter with no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// An adapter reporting the given devices.
    pub fn with_devices(devices: impl IntoIterator<Item = DeviceAddress>) -> Self {
        let adapter = Self::new();
        adapter.roster.lock().devices.extend(devices);
        adapter
    }

    /// Put a device on the list.
    pub fn add_device(&self, address: DeviceAddress) {
        self.roster.lock().devices.push(address);
    }

    /// Take a device off the list.
    pub fn remove_device(&self, address: DeviceAddress) {
        self.roster.lock().devices.retain(|&a| a != address);
    }

    fn with_roster<T>(&self, op: impl FnOnce(&mut Roster) -> T) -> PortResult<T> {
        let _guard = self.gate.acquire();
        Ok(op(&mut self.roster.lock()))
    }
}

impl PortAdapter for NullAdapter {
    fn adapter_name(&self) -> &str {
        "NullAdapter"
    }

    fn port_type_description(&self) -> &str {
        "virtual port without hardware"
    }

    fn select_port(&self, _name: &str) -> PortResult<bool> {
        Ok(true)
    }

    fn free_port(&self) -> PortResult<()> {
        Ok(())
    }

    fn port_name(&self) -> PortResult<String> {
        Ok("NULL0".into())
    }

    fn adapter_detected(&self) -> PortResult<bool> {
        Ok(true)
    }

    fn adapter_version(&self) -> PortResult<String> {
        Ok("NullAdapter".into())
    }

    fn capabilities(&self) -> PortResult<Capabilities> {
        Ok(Capabilities::all())
    }

    fn begin_exclusive(&self, blocking: bool) -> PortResult<bool> {
        Ok(self.gate.begin(blocking))
    }

    fn end_exclusive(&self) {
        self.gate.end();
    }

    fn holds_exclusive(&self) -> bool {
        self.gate.held_by_current()
    }

    fn set_search_only_alarming(&self) -> PortResult<()> {
        self.with_roster(|r| r.search.set_search_only_alarming())
    }

    fn set_no_reset_search(&self) -> PortResult<()> {
        self.with_roster(|r| r.search.set_no_reset_search())
    }

    fn set_search_all_devices(&self) -> PortResult<()> {
        self.with_roster(|r| r.search.set_search_all_devices())
    }

    fn target_all_families(&self) -> PortResult<()> {
        self.with_roster(|r| r.search.target_all_families())
    }

    fn target_family(&self, families: &[u8]) -> PortResult<()> {
        self.with_roster(|r| r.search.target_family(families))
    }

    fn exclude_family(&self, families: &[u8]) -> PortResult<()> {
        self.with_roster(|r| r.search.exclude_family(families))
    }

    fn find_first_device(&self) -> PortResult<bool> {
        self.with_roster(|r| {
            r.next = 0;
            r.advance()
        })
    }

    fn find_next_device(&self) -> PortResult<bool> {
        self.with_roster(Roster::advance)
    }

    fn address(&self) -> PortResult<DeviceAddress> {
        self.with_roster(|r| r.current)?
            .ok_or_else(|| PortError::Protocol("no device found yet".into()))
    }

    fn reset(&self) -> PortResult<ResetResult> {
        self.with_roster(|r| {
            if r.devices.is_empty() {
                ResetResult::NoPresence
            } else {
                ResetResult::Presence
            }
        })
    }

    fn put_bit(&self, _bit: bool) -> PortResult<()> {
        Ok(())
    }

    fn get_bit(&self) -> PortResult<bool> {
        Ok(true)
    }

    fn put_byte(&self, _byte: u8) -> PortResult<()> {
        Ok(())
    }

    fn get_byte(&self) -> PortResult<u8> {
        Ok(0xff)
    }

    fn data_block(&self, _block: &mut [u8]) -> PortResult<()> {
        Ok(())
    }

    fn set_power_duration(&self, _duration: PowerDuration) -> PortResult<()> {
        Ok(())
    }

    fn start_power_delivery(&self, _condition: ChangeCondition) -> PortResult<bool> {
        Ok(true)
    }

    fn set_program_pulse_duration(&self, _duration: PowerDuration) -> PortResult<()> {
        Ok(())
    }

    fn start_program_pulse(&self, _condition: ChangeCondition) -> PortResult<bool> {
        Ok(true)
    }

    fn start_break(&self) -> PortResult<()> {
        Ok(())
    }

    fn set_power_normal(&self) -> PortResult<()> {
        Ok(())
    }

    fn set_speed(&self, speed: BusSpeed) -> PortResult<()> {
        self.with_roster(|r| r.speed = speed)
    }

    fn speed(&self) -> PortResult<BusSpeed> {
        self.with_roster(|r| r.speed)
    }

    fn select(&self, address: DeviceAddress) -> PortResult<bool> {
        self.is_present(address)
    }

    fn is_present(&self, address: DeviceAddress) -> PortResult<bool> {
        self.with_roster(|r| r.devices.contains(&address))
    }

    fn is_alarming(&self, _address: DeviceAddress) -> PortResult<bool> {
        Ok(false)
    }
}
