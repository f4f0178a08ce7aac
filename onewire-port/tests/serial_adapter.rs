use std::sync::Arc;
use std::thread;

use ds2480::sim::SimDs2480;
use embedded_hal_mock::eh1::delay::NoopDelay;
use onewire_bus::sim::SimBus;
use onewire_bus::{BusSpeed, ChangeCondition, DeviceAddress, PowerDuration, ResetResult};
use onewire_port::{ErrorKind, PortAdapter, PortError, PortResult, SerialAdapter};

type SimAdapter = SerialAdapter<SimDs2480, NoopDelay>;

fn addr(family: u8, id: u8) -> DeviceAddress {
    DeviceAddress::from_parts(family, [id, 0x5a, 0x00, 0x11, 0x22, 0x33])
}

fn selected(sim: SimDs2480) -> SimAdapter {
    let adapter = SerialAdapter::new(sim, NoopDelay::new());
    assert!(adapter.select_port("/dev/ttyUSB0").unwrap());
    adapter
}

fn kind<T: std::fmt::Debug>(result: PortResult<T>) -> ErrorKind {
    result.unwrap_err().kind()
}

fn sorted(mut addresses: Vec<DeviceAddress>) -> Vec<DeviceAddress> {
    addresses.sort();
    addresses
}

#[test]
fn nothing_works_before_a_port_is_selected() {
    let adapter = SerialAdapter::new(SimDs2480::new(), NoopDelay::new());
    assert!(matches!(adapter.reset(), Err(PortError::PortNotSelected)));
    assert!(matches!(adapter.port_name(), Err(PortError::PortNotSelected)));
    assert_eq!(adapter.find_first_device().unwrap_err().kind(), ErrorKind::Transport);
}

#[test]
fn detects_and_describes_adapter() {
    let adapter = selected(SimDs2480::new());
    assert!(adapter.adapter_detected().unwrap());
    assert_eq!(adapter.port_name().unwrap(), "/dev/ttyUSB0");
    assert!(adapter.adapter_version().unwrap().contains("DS2480"));

    let caps = adapter.capabilities().unwrap();
    assert!(caps.overdrive && caps.flex && caps.power_delivery && caps.line_break);
    assert!(!caps.hyperdrive && !caps.smart_power && !caps.program);

    let programmer = selected(SimDs2480::new().with_program_voltage(true));
    assert!(programmer.capabilities().unwrap().program);
}

#[test]
fn reselecting_the_open_port_is_a_no_op() {
    let adapter = selected(SimDs2480::with_devices([addr(0x28, 1)]));
    adapter.reset().unwrap();
    let before = adapter.with_session(|s| s.port().written().len());
    assert!(adapter.select_port("/dev/ttyUSB0").unwrap());
    assert_eq!(adapter.with_session(|s| s.port().written().len()), before);

    assert!(adapter.select_port("/dev/ttyUSB1").unwrap());
    assert_eq!(adapter.port_name().unwrap(), "/dev/ttyUSB1");
    assert_eq!(adapter.reset().unwrap(), ResetResult::Presence);

    adapter.free_port().unwrap();
    assert!(matches!(adapter.reset(), Err(PortError::PortNotSelected)));
}

#[test]
fn enumerates_with_family_filters() {
    let devices = [addr(0x10, 1), addr(0x28, 2), addr(0x28, 3), addr(0x3a, 4)];
    let adapter = selected(SimDs2480::with_devices(devices));

    assert_eq!(sorted(adapter.all_device_addresses().unwrap()), sorted(devices.to_vec()));

    adapter.target_family(&[0x28]).unwrap();
    assert_eq!(
        sorted(adapter.all_device_addresses().unwrap()),
        vec![addr(0x28, 2), addr(0x28, 3)]
    );

    adapter.target_all_families().unwrap();
    adapter.exclude_family(&[0x28, 0x10]).unwrap();
    assert_eq!(adapter.all_device_addresses().unwrap(), vec![addr(0x3a, 4)]);
}

#[test]
fn empty_bus_finds_nothing() {
    let adapter = selected(SimDs2480::new());
    assert_eq!(adapter.reset().unwrap(), ResetResult::NoPresence);
    assert!(!adapter.find_first_device().unwrap());
    assert!(adapter.all_device_addresses().unwrap().is_empty());
}

#[test]
fn presence_and_alarms() {
    let quiet = addr(0x28, 1);
    let alarming = addr(0x28, 2);
    let mut bus = SimBus::with_devices([quiet]);
    bus.add_alarming(alarming);
    let adapter = selected(SimDs2480::with_bus(bus));

    assert!(adapter.is_present(quiet).unwrap());
    assert!(adapter.is_present(alarming).unwrap());
    assert!(!adapter.is_present(addr(0x28, 9)).unwrap());

    assert!(adapter.is_alarming(alarming).unwrap());
    assert!(!adapter.is_alarming(quiet).unwrap());

    adapter.set_search_only_alarming().unwrap();
    assert_eq!(adapter.all_device_addresses().unwrap(), vec![alarming]);
    adapter.set_search_all_devices().unwrap();
    assert_eq!(adapter.all_device_addresses().unwrap().len(), 2);
}

#[test]
fn select_reports_presence() {
    let device = addr(0x28, 1);
    let adapter = selected(SimDs2480::with_devices([device]));
    assert!(adapter.select(device).unwrap());
    adapter.assert_select(device).unwrap();

    let empty = selected(SimDs2480::new());
    assert!(!empty.select(device).unwrap());
    assert!(matches!(
        empty.assert_select(device),
        Err(PortError::DeviceNotPresent(a)) if a == device
    ));
}

#[test]
fn unsupported_requests_are_capability_errors() {
    let adapter = selected(SimDs2480::new());

    adapter.set_power_duration(PowerDuration::Infinite).unwrap();
    assert_eq!(kind(adapter.set_power_duration(PowerDuration::HalfSecond)), ErrorKind::Capability);

    adapter.set_program_pulse_duration(PowerDuration::Eprom).unwrap();
    assert_eq!(
        kind(adapter.set_program_pulse_duration(PowerDuration::Infinite)),
        ErrorKind::Capability
    );
    assert_eq!(kind(adapter.start_program_pulse(ChangeCondition::Now)), ErrorKind::Capability);
    assert_eq!(kind(adapter.set_speed(BusSpeed::Hyperdrive)), ErrorKind::Capability);

    adapter.set_speed(BusSpeed::Overdrive).unwrap();
    assert_eq!(adapter.speed().unwrap(), BusSpeed::Overdrive);
}

#[test]
fn power_delivery_round_trip() {
    let adapter = selected(SimDs2480::with_devices([addr(0x28, 1)]));
    assert!(adapter.start_power_delivery(ChangeCondition::Now).unwrap());
    adapter.set_power_normal().unwrap();
    assert_eq!(adapter.reset().unwrap(), ResetResult::Presence);

    adapter.start_break().unwrap();
    adapter.set_power_normal().unwrap();
    assert_eq!(adapter.reset().unwrap(), ResetResult::Presence);
}

#[test]
fn unplugged_adapter_forces_redetection() {
    let adapter = selected(SimDs2480::with_devices([addr(0x28, 1)]));
    adapter.reset().unwrap();

    adapter.with_session(|s| s.port_mut().set_responsive(false));
    // the short read surfaces as a length mismatch
    assert_eq!(adapter.reset().unwrap_err().kind(), ErrorKind::Protocol);
    assert!(!adapter.adapter_detected().unwrap());
    assert!(matches!(adapter.reset(), Err(PortError::AdapterNotPresent)));

    adapter.with_session(|s| s.port_mut().set_responsive(true));
    assert_eq!(adapter.reset().unwrap(), ResetResult::Presence);
}

#[test]
fn exclusive_ownership_between_threads() {
    let adapter = Arc::new(selected(SimDs2480::with_devices([addr(0x28, 1)])));
    assert!(adapter.begin_exclusive(false).unwrap());

    let other = Arc::clone(&adapter);
    assert!(!thread::spawn(move || other.begin_exclusive(false).unwrap()).join().unwrap());

    let other = Arc::clone(&adapter);
    let waiter = thread::spawn(move || {
        // blocks until the main thread lets go
        let found = other.all_device_addresses().unwrap();
        (found.len(), other.holds_exclusive())
    });
    assert_eq!(adapter.reset().unwrap(), ResetResult::Presence);
    adapter.end_exclusive();
    assert_eq!(waiter.join().unwrap(), (1, false));
}
