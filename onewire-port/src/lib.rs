#![deny(missing_docs)]
/*!
# onewire-port

A uniform facade over 1-Wire port adapters.

Every adapter implements [`PortAdapter`]: port selection, exclusive ownership, device
search with family filters, bit, byte and block I/O, power delivery and speed control.
Shared helpers (selecting a device, checking presence and alarms, collecting every
address) are provided on top of the raw operations.

Adapters:
- [`SerialAdapter`]: a DS2480 on a serial port.
- [`NetAdapter`]: a remote adapter served by a [`NetAdapterHost`] over TCP.
- [`NullAdapter`]: a fixed device list without hardware.

```no_run
use onewire_port::{NullAdapter, PortAdapter};
use onewire_bus::DeviceAddress;

let adapter = NullAdapter::with_devices([DeviceAddress::from_parts(0x28, [1, 2, 3, 4, 5, 6])]);
for address in adapter.all_device_addresses()? {
    println!("{address}");
}
# Ok::<(), onewire_port::PortError>(())
```
*/

mod adapter;
mod error;
mod exclusive;
pub mod net;
mod null;
mod serial;

pub use adapter::{Capabilities, ExclusiveScope, PortAdapter};
pub use error::{ErrorKind, PortError, PortResult};
pub use exclusive::{ExclusiveGate, ExclusiveGuard, POLL_INTERVAL};
pub use net::{NetAdapter, NetAdapterHost};
pub use null::NullAdapter;
pub use serial::SerialAdapter;
