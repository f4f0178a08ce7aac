use thiserror::Error;

/// DS2480 adapter errors.
///
/// `E` is the error type of the [`SerialTransport`](crate::SerialTransport) the adapter talks through.
#[derive(Debug, Error)]
pub enum Ds2480Error<E> {
    /// Serial port errors.
    #[error("serial port error: {0:?}")]
    Serial(E),
    /// Fewer response bytes than the transaction expected arrived before the read timeout.
    #[error("expected {expected} response bytes, received {received}")]
    ResponseLength {
        /// Bytes the transaction expected.
        expected: usize,
        /// Bytes actually received.
        received: usize,
    },
    /// The bit or byte read back from the 1-Wire bus differs from the one written.
    #[error("1-Wire echo mismatch")]
    EchoMismatch,
    /// A response byte does not have the shape of the command it answers.
    #[error("unexpected response byte {0:#04x}")]
    UnexpectedResponse(u8),
    /// The adapter did not answer the detection sequence.
    #[error("DS2480 adapter not detected")]
    AdapterNotDetected,
    /// The adapter cannot perform the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl<E> From<E> for Ds2480Error<E> {
    fn from(value: E) -> Self {
        Self::Serial(value)
    }
}

impl<E> Ds2480Error<E> {
    /// Whether the error means the link to the adapter can no longer be trusted.
    ///
    /// The adapter has to be detected again before the next transaction.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            Self::Serial(_) | Self::ResponseLength { .. } | Self::AdapterNotDetected
        )
    }
}
