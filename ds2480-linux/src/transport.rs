use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use ds2480::SerialTransport;
use log::debug;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

/// A [`SerialTransport`] on a host serial port.
#[derive(Default)]
pub struct SerialPortTransport {
    port: Option<Box<dyn SerialPort>>,
    baud: u32,
}

impl SerialPortTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, serialport::Error> {
        self.port
            .as_mut()
            .ok_or_else(|| serialport::Error::new(serialport::ErrorKind::NoDevice, "port not open"))
    }
}

impl SerialTransport for SerialPortTransport {
    type Error = serialport::Error;

    fn open(&mut self, name: &str) -> Result<(), Self::Error> {
        let mut port = serialport::new(name, 9600)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(50))
            .open()?;
        port.write_data_terminal_ready(true)?;
        port.write_request_to_send(true)?;
        debug!("Opened {name}");
        self.port = Some(port);
        self.baud = 9600;
        Ok(())
    }

    fn close(&mut self) {
        self.port = None;
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), Self::Error> {
        self.port()?.set_baud_rate(baud)?;
        self.baud = baud;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.port()?.clear(ClearBuffer::All)
    }

    fn send_break(&mut self, duration: Duration) -> Result<(), Self::Error> {
        let port = self.port()?;
        port.set_break()?;
        thread::sleep(duration);
        port.clear_break()
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        let port = self.port()?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, Self::Error> {
        let port = self.port()?;
        let deadline = Instant::now() + timeout;
        let mut filled = 0;
        while filled < buf.len() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            port.set_timeout(left)?;
            match port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn set_dtr(&mut self, level: bool) -> Result<(), Self::Error> {
        self.port()?.write_data_terminal_ready(level)
    }

    fn set_rts(&mut self, level: bool) -> Result<(), Self::Error> {
        self.port()?.write_request_to_send(level)
    }
}
