use core::time::Duration;

/// Serial port the DS2480 is attached to.
///
/// The platform side of the adapter: port handling, line control and raw byte
/// transfer. Everything above the byte level is done by [`Ds2480`](crate::Ds2480).
pub trait SerialTransport {
    /// Error type of the port.
    type Error: core::fmt::Debug;

    /// Open the port called `name`, 9600 baud 8N1, no flow control.
    fn open(&mut self, name: &str) -> Result<(), Self::Error>;

    /// Close the port. Closing a closed port is a no-op.
    fn close(&mut self);

    /// Whether the port is open.
    fn is_open(&self) -> bool;

    /// Change the UART baud rate.
    fn set_baud_rate(&mut self, baud: u32) -> Result<(), Self::Error>;

    /// Current UART baud rate.
    fn baud_rate(&self) -> u32;

    /// Discard pending input and output.
    fn flush(&mut self) -> Result<(), Self::Error>;

    /// Hold the transmit line in break for `duration`.
    fn send_break(&mut self, duration: Duration) -> Result<(), Self::Error>;

    /// Write every byte of `data`.
    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Read until `buf` is full or `timeout` elapses.
    ///
    /// # Returns
    /// The number of bytes read. A short count is not an error at this level.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, Self::Error>;

    /// Drive the DTR line.
    fn set_dtr(&mut self, level: bool) -> Result<(), Self::Error>;

    /// Drive the RTS line.
    fn set_rts(&mut self, level: bool) -> Result<(), Self::Error>;
}
