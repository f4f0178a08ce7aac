use ds2480::{Ds2480, Ds2480Builder, SerialTransport};
use embedded_hal::delay::DelayNs;
use log::info;
use onewire_bus::{
    BusSpeed, ChangeCondition, DeviceAddress, OneWireStatus, PowerDuration, ResetResult,
    SearchState,
};
use parking_lot::Mutex;

use crate::{Capabilities, ExclusiveGate, PortAdapter, PortError, PortResult};

struct Inner<S, D> {
    session: Ds2480<S, D>,
    search: SearchState,
    port_name: Option<String>,
}

impl<S: SerialTransport, D: DelayNs> Inner<S, D> {
    fn session(&mut self) -> PortResult<&mut Ds2480<S, D>> {
        if self.session.is_open() {
            Ok(&mut self.session)
        } else {
            Err(PortError::PortNotSelected)
        }
    }
}

/// DS2480 based serial adapter (DS9097U and relatives).
pub struct SerialAdapter<S, D> {
    gate: ExclusiveGate,
    inner: Mutex<Inner<S, D>>,
}

impl<S, D> SerialAdapter<S, D>
where
    S: SerialTransport + Send,
    D: DelayNs + Send,
{
    /// Adapter on `port` with default DS2480 settings. No port is selected yet.
    pub fn new(port: S, delay: D) -> Self {
        Self::from_session(Ds2480::new(port, delay))
    }

    /// Adapter on `port` with the given DS2480 settings.
    pub fn with_builder(builder: Ds2480Builder, port: S, delay: D) -> Self {
        Self::from_session(builder.build(port, delay))
    }

    /// Wrap an existing DS2480 session.
    pub fn from_session(session: Ds2480<S, D>) -> Self {
        Self {
            gate: ExclusiveGate::new(),
            inner: Mutex::new(Inner {
                session,
                search: SearchState::new(),
                port_name: None,
            }),
        }
    }

    /// Run `op` on the DS2480 session while holding the adapter.
    pub fn with_session<T>(&self, op: impl FnOnce(&mut Ds2480<S, D>) -> T) -> T {
        let _guard = self.gate.acquire();
        op(&mut self.inner.lock().session)
    }

    fn run<T>(&self, op: impl FnOnce(&mut Inner<S, D>) -> PortResult<T>) -> PortResult<T> {
        let _guard = self.gate.acquire();
        op(&mut self.inner.lock())
    }

    fn run_search(&self, op: impl FnOnce(&mut SearchState)) -> PortResult<()> {
        self.run(|inner| {
            op(&mut inner.search);
            Ok(())
        })
    }
}

impl<S, D> PortAdapter for SerialAdapter<S, D>
where
    S: SerialTransport + Send,
    D: DelayNs + Send,
{
    fn adapter_name(&self) -> &str {
        "DS9097U"
    }

    fn port_type_description(&self) -> &str {
        "serial communication port"
    }

    fn select_port(&self, name: &str) -> PortResult<bool> {
        self.run(|inner| {
            if inner.session.is_open() && inner.port_name.as_deref() == Some(name) {
                return Ok(true);
            }
            if inner.session.is_open() {
                inner.session.close();
            }
            inner.port_name = None;
            inner.session.open(name)?;
            inner.port_name = Some(name.to_owned());
            info!("Selected port {name}");
            Ok(true)
        })
    }

    fn free_port(&self) -> PortResult<()> {
        self.run(|inner| {
            inner.session.close();
            if let Some(name) = inner.port_name.take() {
                info!("Freed port {name}");
            }
            Ok(())
        })
    }

    fn port_name(&self) -> PortResult<String> {
        self.run(|inner| inner.port_name.clone().ok_or(PortError::PortNotSelected))
    }

    fn adapter_detected(&self) -> PortResult<bool> {
        self.run(|inner| Ok(inner.session()?.detect()?))
    }

    fn adapter_version(&self) -> PortResult<String> {
        self.run(|inner| Ok(inner.session()?.adapter_version()?))
    }

    fn capabilities(&self) -> PortResult<Capabilities> {
        let program = self.run(|inner| Ok(inner.session()?.can_program()?))?;
        Ok(Capabilities {
            overdrive: true,
            hyperdrive: false,
            flex: true,
            program,
            power_delivery: true,
            smart_power: false,
            line_break: true,
        })
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
        self.run_search(SearchState::set_search_only_alarming)
    }

    fn set_no_reset_search(&self) -> PortResult<()> {
        self.run_search(SearchState::set_no_reset_search)
    }

    fn set_search_all_devices(&self) -> PortResult<()> {
        self.run_search(SearchState::set_search_all_devices)
    }

    fn target_all_families(&self) -> PortResult<()> {
        self.run_search(SearchState::target_all_families)
    }

    fn target_family(&self, families: &[u8]) -> PortResult<()> {
        self.run_search(|search| search.target_family(families))
    }

    fn exclude_family(&self, families: &[u8]) -> PortResult<()> {
        self.run_search(|search| search.exclude_family(families))
    }

    fn find_first_device(&self) -> PortResult<bool> {
        self.run(|inner| {
            inner.session()?;
            let Inner { session, search, .. } = inner;
            Ok(search.find_first_with(|state| session.search(state))?)
        })
    }

    fn find_next_device(&self) -> PortResult<bool> {
        self.run(|inner| {
            inner.session()?;
            let Inner { session, search, .. } = inner;
            Ok(search.find_next_with(|state| session.search(state))?)
        })
    }

    fn address(&self) -> PortResult<DeviceAddress> {
        self.run(|inner| Ok(inner.search.address()))
    }

    fn reset(&self) -> PortResult<ResetResult> {
        self.run(|inner| Ok(inner.session()?.bus_reset()?.result()))
    }

    fn put_bit(&self, bit: bool) -> PortResult<()> {
        self.run(|inner| Ok(inner.session()?.put_bit(bit)?))
    }

    fn get_bit(&self) -> PortResult<bool> {
        self.run(|inner| Ok(inner.session()?.get_bit()?))
    }

    fn put_byte(&self, byte: u8) -> PortResult<()> {
        self.run(|inner| Ok(inner.session()?.put_byte(byte)?))
    }

    fn get_byte(&self) -> PortResult<u8> {
        self.run(|inner| Ok(inner.session()?.get_byte()?))
    }

    fn get_block(&self, len: usize) -> PortResult<Vec<u8>> {
        self.run(|inner| Ok(inner.session()?.get_block(len)?))
    }

    fn data_block(&self, block: &mut [u8]) -> PortResult<()> {
        self.run(|inner| Ok(inner.session()?.data_block(block)?))
    }

    fn set_power_duration(&self, duration: PowerDuration) -> PortResult<()> {
        if duration != PowerDuration::Infinite {
            return Err(PortError::capability("power delivery duration other than infinite"));
        }
        Ok(())
    }

    fn start_power_delivery(&self, condition: ChangeCondition) -> PortResult<bool> {
        self.run(|inner| Ok(inner.session()?.start_power_delivery(condition)?))
    }

    fn set_program_pulse_duration(&self, duration: PowerDuration) -> PortResult<()> {
        if duration != PowerDuration::Eprom {
            return Err(PortError::capability("program pulse duration other than EPROM"));
        }
        Ok(())
    }

    fn start_program_pulse(&self, condition: ChangeCondition) -> PortResult<bool> {
        self.run(|inner| Ok(inner.session()?.start_program_pulse(condition)?))
    }

    fn start_break(&self) -> PortResult<()> {
        self.run(|inner| Ok(inner.session()?.start_break()?))
    }

    fn set_power_normal(&self) -> PortResult<()> {
        self.run(|inner| Ok(inner.session()?.set_power_normal()?))
    }

    fn set_speed(&self, speed: BusSpeed) -> PortResult<()> {
        self.run(|inner| Ok(inner.session()?.set_speed(speed)?))
    }

    fn speed(&self) -> PortResult<BusSpeed> {
        self.run(|inner| Ok(inner.session()?.speed()))
    }
}
