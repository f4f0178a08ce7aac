use crate::{
    Ds2480Error, Ds2480Result, SerialTransport,
    packet::{
        ByteFraming, Operation, PacketBuilder, Transaction, desired_baud, interpret_reset,
        interpret_search,
    },
    registers::{
        BaudRate, CommunicationCommand, ConfigurationCommand, MODE_STOP_PULSE, Parameter,
        ParameterValue, ProgramPulseTime, ResetResponse, SpeedMode, StrongPullupTime,
    },
    state::AdapterState,
};
use core::time::Duration;
use embedded_hal::delay::DelayNs;
use log::{debug, info, trace, warn};
use onewire_bus::{BusSpeed, ChangeCondition, OneWireStatus, PowerLevel, SearchState};

/// A DS2480 serial to 1-Wire line driver.
///
/// Takes ownership of a serial port (implementing [`SerialTransport`])
/// and a timer object implementing the [`DelayNs`] trait.
///
/// The adapter is detected lazily: the first operation after [`open`](Self::open), or
/// after a communication failure, runs the detection sequence (master reset, again,
/// then a power cycle through DTR/RTS) before talking to the bus.
pub struct Ds2480<S, D> {
    pub(crate) port: S,
    pub(crate) delay: D,
    pub(crate) state: AdapterState,
    pub(crate) max_baud: BaudRate,
    pub(crate) framing: ByteFraming,
    pub(crate) read_timeout: Duration,
}

/// Builder for creating a [`Ds2480`] instance with custom configuration.
#[derive(Debug, Clone)]
pub struct Ds2480Builder {
    pub(crate) max_baud: BaudRate,
    pub(crate) framing: ByteFraming,
    pub(crate) read_timeout: Duration,
}

impl Default for Ds2480Builder {
    fn default() -> Self {
        Ds2480Builder {
            max_baud: BaudRate::Baud115200,
            framing: ByteFraming::DataMode,
            read_timeout: Duration::from_millis(50),
        }
    }
}

impl Ds2480Builder {
    /// Fastest baud rate used for streaming, in bits per second.
    ///
    /// Rounded down to a rate the DS2480 supports.
    pub fn with_max_baud(mut self, bps: u32) -> Self {
        self.max_baud = BaudRate::at_most(bps);
        self
    }

    /// How data bytes are put on the bus.
    pub fn with_byte_framing(mut self, framing: ByteFraming) -> Self {
        self.framing = framing;
        self
    }

    /// Base time to wait for a response packet, on top of its transfer time.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Builds a new `Ds2480` instance with the specified configuration.
    ///
    /// No I/O is performed until the port is opened.
    pub fn build<S: SerialTransport, D: DelayNs>(self, port: S, delay: D) -> Ds2480<S, D> {
        Ds2480 {
            port,
            delay,
            state: AdapterState::default(),
            max_baud: self.max_baud,
            framing: self.framing,
            read_timeout: self.read_timeout,
        }
    }
}

impl<S: SerialTransport, D: DelayNs> Ds2480<S, D> {
    /// Creates a new instance of `Ds2480` with the default configuration.
    pub fn new(port: S, delay: D) -> Self {
        Ds2480Builder::default().build(port, delay)
    }

    /// Open the serial port called `name`.
    pub fn open(&mut self, name: &str) -> Ds2480Result<(), S::Error> {
        debug!("ds2480: opening {name}");
        self.port.open(name)?;
        self.state = AdapterState::default();
        Ok(())
    }

    /// Close the serial port.
    pub fn close(&mut self) {
        self.port.close();
        self.state.present = false;
    }

    /// Whether the serial port is open.
    pub fn is_open(&self) -> bool {
        self.port.is_open()
    }

    /// Adapter state.
    pub fn state(&self) -> &AdapterState {
        &self.state
    }

    /// The serial port.
    pub fn port(&self) -> &S {
        &self.port
    }

    /// The serial port, mutably.
    pub fn port_mut(&mut self) -> &mut S {
        &mut self.port
    }

    /// Check for the adapter, running the detection sequence if it is not known to be present.
    pub fn detect(&mut self) -> Ds2480Result<bool, S::Error> {
        match self.require_adapter() {
            Ok(()) => Ok(true),
            Err(Ds2480Error::AdapterNotDetected) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Adapter description including the chip revision.
    pub fn adapter_version(&mut self) -> Ds2480Result<String, S::Error> {
        if self.state.chip_revision.is_none() {
            self.bus_reset()?;
        }
        Ok(format!(
            "DS2480 based adapter, version {}",
            self.state.chip_revision.unwrap_or_default()
        ))
    }

    /// Whether the adapter has 12V program voltage available.
    pub fn can_program(&mut self) -> Ds2480Result<bool, S::Error> {
        if self.state.program_voltage.is_none() {
            self.bus_reset()?;
        }
        Ok(self.state.program_voltage.unwrap_or(false))
    }

    /// Reset the 1-Wire bus.
    pub fn bus_reset(&mut self) -> Ds2480Result<ResetResponse, S::Error> {
        self.guarded(|dev| {
            dev.prepare()?;
            let mut builder = dev.builder();
            let offset = builder.reset();
            let transaction = builder.finish();
            let response = dev.transact(&transaction)?;
            interpret_reset(&mut dev.state, response[offset]).map_err(Ds2480Error::UnexpectedResponse)
        })
    }

    /// Write a bit, failing with [`Ds2480Error::EchoMismatch`] if the bus reads back otherwise.
    pub fn put_bit(&mut self, bit: bool) -> Ds2480Result<(), S::Error> {
        if self.touch_bit(bit)? != bit {
            return Err(Ds2480Error::EchoMismatch);
        }
        Ok(())
    }

    /// Read a bit.
    pub fn get_bit(&mut self) -> Ds2480Result<bool, S::Error> {
        self.touch_bit(true)
    }

    fn touch_bit(&mut self, bit: bool) -> Ds2480Result<bool, S::Error> {
        self.guarded(|dev| {
            dev.prepare()?;
            let arm = dev.state.prime_after_bit;
            let mut builder = dev.builder();
            let offset = builder.data_bit(bit, arm);
            let transaction = builder.finish();
            let response = dev.transact(&transaction)?;
            if arm {
                dev.state.prime_after_bit = false;
                dev.state.level = PowerLevel::PowerDelivery;
            }
            Ok(CommunicationCommand::bit_result(response[offset]))
        })
    }

    /// Write a byte, failing with [`Ds2480Error::EchoMismatch`] if the bus reads back otherwise.
    pub fn put_byte(&mut self, byte: u8) -> Ds2480Result<(), S::Error> {
        let mut block = [byte];
        self.data_block(&mut block)?;
        if block[0] != byte {
            return Err(Ds2480Error::EchoMismatch);
        }
        Ok(())
    }

    /// Read a byte.
    pub fn get_byte(&mut self) -> Ds2480Result<u8, S::Error> {
        let mut block = [0xff];
        self.data_block(&mut block)?;
        Ok(block[0])
    }

    /// Read `len` bytes.
    pub fn get_block(&mut self, len: usize) -> Ds2480Result<Vec<u8>, S::Error> {
        let mut block = vec![0xff; len];
        self.data_block(&mut block)?;
        Ok(block)
    }

    /// Exchange a block of bytes with the bus, in place.
    ///
    /// Bytes to be read have to be sent as 0xff.
    pub fn data_block(&mut self, block: &mut [u8]) -> Ds2480Result<(), S::Error> {
        if block.is_empty() {
            return Ok(());
        }
        self.guarded(|dev| {
            dev.prepare()?;
            dev.set_streaming_speed(Operation::Byte)?;
            let primed = block.len() == 1 && dev.state.prime_after_byte;
            let mut builder = dev.builder();
            let data = if primed {
                builder.primed_data_byte(block[0])
            } else {
                builder.data_bytes(block)
            };
            let transaction = builder.finish();
            let response = dev.transact(&transaction)?;
            if primed {
                dev.state.prime_after_byte = false;
                dev.state.level = PowerLevel::PowerDelivery;
            }
            data.decode(&response, block);
            Ok(())
        })
    }

    /// Run one accelerated search round on `search`.
    ///
    /// Use as the round of [`SearchState::find_next_with`].
    pub fn search(&mut self, search: &mut SearchState) -> Ds2480Result<bool, S::Error> {
        if !search.begin_round() {
            return Ok(false);
        }
        self.guarded(|dev| {
            dev.prepare()?;
            dev.set_streaming_speed(Operation::Search)?;
            let mut builder = dev.builder();
            let reset = (!search.skip_reset()).then(|| builder.reset());
            builder.data_byte(search.search_command());
            let offset = builder.search(search);
            let transaction = builder.finish();
            let response = dev.transact(&transaction)?;
            if let Some(reset) = reset {
                let status = interpret_reset(&mut dev.state, response[reset])
                    .map_err(Ds2480Error::UnexpectedResponse)?;
                if !status.presence() {
                    search.reset();
                    return Ok(false);
                }
            }
            Ok(interpret_search(search, &response[offset..offset + 16]))
        })
    }

    /// Change the 1-Wire speed. Hyperdrive is not supported.
    pub fn set_speed(&mut self, speed: BusSpeed) -> Ds2480Result<(), S::Error> {
        if speed == BusSpeed::Hyperdrive {
            return Err(Ds2480Error::Unsupported("hyperdrive speed"));
        }
        self.guarded(|dev| {
            dev.prepare()?;
            debug!("ds2480: bus speed {:?} -> {speed:?}", dev.state.bus_speed);
            let previous = (dev.state.bus_speed, dev.state.speed_mode);
            dev.state.bus_speed = speed;
            dev.state.speed_mode = SpeedMode::for_bus_speed(speed);
            let mut builder = dev.builder();
            builder.set_speed();
            let transaction = builder.finish();
            if let Err(e) = dev.transact(&transaction) {
                (dev.state.bus_speed, dev.state.speed_mode) = previous;
                return Err(e);
            }
            Ok(())
        })
    }

    /// Current 1-Wire speed.
    pub fn speed(&self) -> BusSpeed {
        self.state.bus_speed
    }

    /// Start the 5V strong pullup, now or primed for after the next bit or byte.
    ///
    /// # Returns
    /// `true` if the strong pullup is running, `false` if it was only primed.
    pub fn start_power_delivery(&mut self, condition: ChangeCondition) -> Ds2480Result<bool, S::Error> {
        match condition {
            ChangeCondition::AfterBit => {
                self.state.prime_after_bit = true;
                Ok(false)
            }
            ChangeCondition::AfterByte => {
                self.state.prime_after_byte = true;
                Ok(false)
            }
            ChangeCondition::Now => self.guarded(|dev| {
                dev.prepare()?;
                let mut builder = dev.builder();
                builder.set_parameter(StrongPullupTime::Infinite);
                builder.send_command(CommunicationCommand::pulse(false).into_bits(), false);
                let transaction = builder.finish();
                dev.transact(&transaction)?;
                dev.state.level = PowerLevel::PowerDelivery;
                Ok(true)
            }),
        }
    }

    /// Fire a 512µs 12V program pulse.
    ///
    /// Only [`ChangeCondition::Now`] is supported, and only with program voltage available.
    pub fn start_program_pulse(&mut self, condition: ChangeCondition) -> Ds2480Result<bool, S::Error> {
        if condition != ChangeCondition::Now {
            return Err(Ds2480Error::Unsupported("program pulse on a change condition"));
        }
        if !self.can_program()? {
            return Err(Ds2480Error::Unsupported("program voltage not available"));
        }
        self.guarded(|dev| {
            dev.prepare()?;
            let mut builder = dev.builder();
            builder.set_parameter(ProgramPulseTime::Us512);
            builder.send_command(CommunicationCommand::pulse(true).into_bits(), true);
            let transaction = builder.finish();
            dev.state.level = PowerLevel::Program;
            let result = dev.transact(&transaction);
            // the pulse ends on its own
            dev.state.level = PowerLevel::Normal;
            result.map(|_| true)
        })
    }

    /// Hold the 1-Wire line low by powering the adapter down.
    pub fn start_break(&mut self) -> Ds2480Result<(), S::Error> {
        self.guarded(|dev| {
            dev.port.set_dtr(false)?;
            dev.port.set_rts(false)?;
            dev.delay.delay_ms(200);
            dev.state.level = PowerLevel::Break;
            Ok(())
        })
    }

    /// Return the 1-Wire line to its normal level.
    pub fn set_power_normal(&mut self) -> Ds2480Result<(), S::Error> {
        self.guarded(|dev| dev.restore_level())
    }

    fn restore_level(&mut self) -> Ds2480Result<(), S::Error> {
        match self.state.level {
            PowerLevel::PowerDelivery => {
                self.require_adapter()?;
                let mut builder = self.builder();
                builder.send_command(MODE_STOP_PULSE, true);
                builder.send_command(CommunicationCommand::pulse(false).into_bits(), false);
                builder.send_command(MODE_STOP_PULSE, true);
                let transaction = builder.finish();
                self.transact(&transaction)?;
                self.state.level = PowerLevel::Normal;
            }
            PowerLevel::Break => {
                self.port.set_dtr(true)?;
                self.port.set_rts(true)?;
                self.delay.delay_ms(300);
                self.state.level = PowerLevel::Normal;
                self.state.present = false;
                self.require_adapter()?;
            }
            PowerLevel::Normal | PowerLevel::Program => self.state.level = PowerLevel::Normal,
        }
        Ok(())
    }

    fn builder(&mut self) -> PacketBuilder<'_> {
        PacketBuilder::new(&mut self.state, self.framing)
    }

    /// Mark the adapter for re-detection when `f` fails in a way that breaks the link.
    fn guarded<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Ds2480Result<T, S::Error>,
    ) -> Ds2480Result<T, S::Error> {
        let result = f(self);
        if matches!(&result, Err(e) if e.is_link_failure()) {
            self.state.present = false;
        }
        result
    }

    fn prepare(&mut self) -> Ds2480Result<(), S::Error> {
        self.require_adapter()?;
        if self.state.level != PowerLevel::Normal {
            self.restore_level()?;
        }
        Ok(())
    }

    fn packet_timeout(&self, response_len: usize) -> Duration {
        let per_byte = Duration::from_micros(10_000_000 / self.state.baud.bps() as u64)
            + Duration::from_millis(1);
        self.read_timeout + per_byte * response_len as u32
    }

    /// Send the packets of `transaction`, collecting their responses.
    fn transact(&mut self, transaction: &Transaction) -> Ds2480Result<Vec<u8>, S::Error> {
        self.port.flush()?;
        let expected = transaction.response_len();
        let mut response = vec![0; expected];
        let mut received = 0;
        for packet in transaction.packets() {
            if packet.is_settle() {
                self.delay.delay_ms(6);
                self.port.flush()?;
                continue;
            }
            trace!("ds2480: > {:02x?}", packet.request);
            self.port.write(&packet.request)?;
            if packet.response_len == 0 {
                continue;
            }
            let timeout = self.packet_timeout(packet.response_len);
            let buf = &mut response[received..received + packet.response_len];
            let read = self.port.read(buf, timeout)?;
            trace!("ds2480: < {:02x?}", &buf[..read]);
            received += read;
            if read < packet.response_len {
                break;
            }
        }
        if received < expected {
            self.state.present = false;
            return Err(Ds2480Error::ResponseLength { expected, received });
        }
        Ok(response)
    }

    /// Move the host and the adapter to the baud rate wanted for `operation`.
    fn set_streaming_speed(&mut self, operation: Operation) -> Ds2480Result<(), S::Error> {
        let target = desired_baud(operation, self.state.bus_speed, self.max_baud);
        if target == self.state.baud {
            return Ok(());
        }
        debug!("ds2480: baud {} -> {}", self.state.baud.bps(), target.bps());
        self.state.present = false;
        let mut builder = self.builder();
        builder.set_baud(target);
        let transaction = builder.finish();
        self.port.flush()?;
        for packet in transaction.packets() {
            self.port.write(&packet.request)?;
        }
        self.delay.delay_ms(5);
        self.port.flush()?;
        self.delay.delay_ms(5);
        self.port.set_baud_rate(target.bps())?;
        self.state.baud = target;
        self.delay.delay_ms(5);

        let mut builder = self.builder();
        let offset = builder.get_parameter(Parameter::Baud);
        builder.set_speed();
        let transaction = builder.finish();
        match self.transact(&transaction) {
            Ok(response) if ConfigurationCommand::read_result(response[offset]) == Some(target.code()) => {
                self.state.present = true;
                self.delay.delay_ms(150);
                self.port.flush()?;
                return Ok(());
            }
            Ok(response) => warn!(
                "ds2480: adapter reports {:#04x} after switching to {} baud",
                response[offset],
                target.bps()
            ),
            Err(e) => warn!("ds2480: no answer after switching to {} baud: {e}", target.bps()),
        }
        // back to 9600 through the detection sequence
        self.require_adapter()
    }

    /// Run the detection sequence unless the adapter is known to be present.
    fn require_adapter(&mut self) -> Ds2480Result<(), S::Error> {
        if self.state.present {
            return Ok(());
        }
        let steps: [fn(&mut Self) -> Ds2480Result<(), S::Error>; 3] =
            [Self::master_reset, Self::master_reset, Self::power_reset];
        for step in steps {
            step(self)?;
            if self.verify() {
                info!("ds2480: adapter detected at {} baud", self.state.baud.bps());
                self.state.present = true;
                return Ok(());
            }
        }
        warn!("ds2480: adapter not detected");
        Err(Ds2480Error::AdapterNotDetected)
    }

    /// Break the adapter back to 9600 baud and send the timing byte.
    fn master_reset(&mut self) -> Ds2480Result<(), S::Error> {
        debug!("ds2480: master reset");
        self.port.set_baud_rate(BaudRate::Baud9600.bps())?;
        self.state.master_reset();
        self.port.send_break(Duration::from_millis(10))?;
        self.delay.delay_ms(5);
        self.send_timing_byte()
    }

    /// Power cycle the adapter through DTR/RTS and send the timing byte.
    fn power_reset(&mut self) -> Ds2480Result<(), S::Error> {
        debug!("ds2480: power reset");
        self.port.set_baud_rate(BaudRate::Baud9600.bps())?;
        self.state.master_reset();
        self.port.set_dtr(false)?;
        self.port.set_rts(false)?;
        self.delay.delay_ms(300);
        self.port.set_dtr(true)?;
        self.port.set_rts(true)?;
        self.delay.delay_ms(1);
        self.send_timing_byte()
    }

    fn send_timing_byte(&mut self) -> Ds2480Result<(), S::Error> {
        self.port.flush()?;
        self.port
            .write(&[CommunicationCommand::reset(SpeedMode::Regular).into_bits()])?;
        self.port.flush()?;
        Ok(())
    }

    /// Load the timing parameters, then check the baud rate and a bit slot.
    fn verify(&mut self) -> bool {
        if self.port.flush().is_err() {
            return false;
        }
        let mut builder = self.builder();
        builder.set_speed();
        builder.set_parameter(StrongPullupTime::Infinite);
        let baud = builder.get_parameter(Parameter::Baud);
        let bit = builder.data_bit(true, false);
        let transaction = builder.finish();
        match self.transact(&transaction) {
            Ok(response) => {
                ConfigurationCommand::read_result(response[baud]) == Some(self.state.baud.code())
                    && response[bit] & 0xf0 == 0x90
                    && response[bit] & 0x0c == (self.state.speed_mode as u8) << 2
            }
            Err(e) => {
                debug!("ds2480: verify failed: {e}");
                false
            }
        }
    }
}
