#![deny(missing_docs)]

/*! # DS2480
 *
 * Driver for the Analog Devices DS2480 serial to 1-Wire line driver, the chip inside
 * DS9097U style serial port adapters.
 *
 * [`Ds2480`] owns a [`SerialTransport`] and talks the DS2480 byte protocol over it:
 * command and data mode, configuration parameters, bit and reset commands, the search
 * accelerator and strong pullup/program pulses. Work is queued by a [`PacketBuilder`](packet::PacketBuilder)
 * into packets of at most 64 expected response bytes, so long transfers cost a handful
 * of round trips.
 *
 * The adapter is detected lazily and again after any link failure: master reset through
 * a serial break, a second one, then a power cycle through DTR/RTS. Overdrive transfers
 * stream at up to 115200 baud; a failed baud switch falls back to 9600.
 *
 * [`Ds2480`] implements [`OneWire`], so the generic [`OneWireSearch`](onewire_bus::OneWireSearch)
 * works on it. [`Ds2480::search`] runs a whole search round in a single transaction
 * through the search accelerator instead.
 *
 * With the `sim` feature, [`sim::SimDs2480`] provides a simulated adapter on a simulated bus.
 */

pub use onewire_bus::{OneWire, OneWireError, OneWireResult};
mod error;
mod onewire;
pub mod packet;
mod registers;
mod session;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
mod state;
mod traits;

pub use error::Ds2480Error;
pub use packet::ByteFraming;
pub use registers::{
    BaudRate, CommunicationCommand, ConfigurationCommand, Function, Parameter, ParameterValue,
    ProgramPulseTime, ResetResponse, SampleOffsetTime, SlewRate, SpeedMode, StrongPullupTime,
    TimingProfile, Write1LowTime,
};
pub use session::{Ds2480, Ds2480Builder};
pub use state::AdapterState;
pub use traits::SerialTransport;

/// Results of DS2480-specific function calls.
pub type Ds2480Result<T, E> = Result<T, Ds2480Error<E>>;
