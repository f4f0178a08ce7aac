use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use ds2480::sim::SimDs2480;
use embedded_hal_mock::eh1::delay::NoopDelay;
use onewire_bus::{BusSpeed, ChangeCondition, DeviceAddress, ResetResult};
use onewire_port::net::StopHandle;
use onewire_port::{
    Capabilities, ErrorKind, NetAdapter, NetAdapterHost, NullAdapter, PortAdapter, PortError,
    PortResult, SerialAdapter,
};

struct Running {
    addr: SocketAddr,
    stop: StopHandle,
    thread: JoinHandle<PortResult<()>>,
}

impl Running {
    fn port_name(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    fn client(&self) -> NetAdapter {
        let client = NetAdapter::new();
        assert!(client.select_port(&self.port_name()).unwrap());
        client
    }

    fn shutdown(self) {
        self.stop.stop();
        self.thread.join().unwrap().unwrap();
    }
}

fn serve<A: PortAdapter + 'static>(adapter: A, secret: Option<&str>) -> Running {
    let mut host = NetAdapterHost::bind(Arc::new(adapter), "127.0.0.1:0").unwrap();
    if let Some(secret) = secret {
        host = host.with_secret(secret);
    }
    let addr = host.local_addr().unwrap();
    let stop = host.stop_handle().unwrap();
    let thread = thread::spawn(move || host.run());
    Running { addr, stop, thread }
}

fn addr(family: u8, id: u8) -> DeviceAddress {
    DeviceAddress::from_parts(family, [id, 0x01, 0x02, 0x03, 0x04, 0x05])
}

#[test]
fn null_adapter_over_the_network() {
    let devices = [addr(0x10, 1), addr(0x28, 2)];
    let host = serve(NullAdapter::with_devices(devices), None);
    let client = host.client();

    client.ping().unwrap();
    assert!(client.adapter_detected().unwrap());
    assert_eq!(client.port_name().unwrap(), host.port_name());
    assert_eq!(client.capabilities().unwrap(), Capabilities::all());

    assert_eq!(client.all_device_addresses().unwrap(), devices.to_vec());
    client.target_family(&[0x28]).unwrap();
    assert_eq!(client.all_device_addresses().unwrap(), vec![addr(0x28, 2)]);

    assert_eq!(client.reset().unwrap(), ResetResult::Presence);
    assert!(client.select(addr(0x10, 1)).unwrap());
    assert!(client.get_bit().unwrap());
    assert_eq!(client.get_byte().unwrap(), 0xff);
    assert_eq!(client.get_block(5).unwrap(), vec![0xff; 5]);

    let mut block = [0x12, 0x34, 0x56];
    client.data_block(&mut block).unwrap();
    assert_eq!(block, [0x12, 0x34, 0x56]);

    client.set_speed(BusSpeed::Overdrive).unwrap();
    assert_eq!(client.speed().unwrap(), BusSpeed::Overdrive);
    assert!(client.start_power_delivery(ChangeCondition::Now).unwrap());
    client.set_power_normal().unwrap();

    drop(client);
    host.shutdown();
}

#[test]
fn serial_adapter_over_the_network() {
    let devices = [addr(0x28, 1), addr(0x28, 2), addr(0x3a, 3)];
    let serial = SerialAdapter::new(SimDs2480::with_devices(devices), NoopDelay::new());
    serial.select_port("/dev/ttyS0").unwrap();
    let host = serve(serial, None);
    let client = host.client();

    let mut found = client.all_device_addresses().unwrap();
    found.sort();
    assert_eq!(found, devices.to_vec());

    assert!(client.is_present(addr(0x3a, 3)).unwrap());
    assert!(!client.is_present(addr(0x3a, 4)).unwrap());
    assert!(!client.capabilities().unwrap().hyperdrive);

    match client.set_speed(BusSpeed::Hyperdrive) {
        Err(PortError::Remote(message)) => assert!(message.contains("not supported")),
        other => panic!("expected a remote failure, got {other:?}"),
    }
    // the session survives a failed request
    assert_eq!(client.reset().unwrap(), ResetResult::Presence);

    drop(client);
    host.shutdown();
}

#[test]
fn secrets_must_match() {
    let host = serve(NullAdapter::new(), Some("s3cret"));

    let stranger = NetAdapter::new();
    let err = stranger.select_port(&host.port_name()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(!stranger.adapter_detected().unwrap());

    let friend = NetAdapter::new().with_secret("s3cret");
    assert!(friend.select_port(&host.port_name()).unwrap());
    friend.ping().unwrap();

    let inline = NetAdapter::new();
    assert!(inline.select_port(&format!("{}:s3cret", host.port_name())).unwrap());
    inline.ping().unwrap();

    drop((friend, inline));
    host.shutdown();
}

#[test]
fn exclusive_ownership_spans_clients() {
    let host = serve(NullAdapter::with_devices([addr(0x28, 1)]), None);
    let first = host.client();
    let second = host.client();

    assert!(first.begin_exclusive(false).unwrap());
    assert!(first.holds_exclusive());
    assert!(!second.begin_exclusive(false).unwrap());
    assert!(!second.holds_exclusive());

    first.end_exclusive();
    assert!(second.begin_exclusive(false).unwrap());

    // a client that goes away releases what it held
    drop(second);
    assert!(first.begin_exclusive(true).unwrap());
    first.end_exclusive();

    drop(first);
    host.shutdown();
}
