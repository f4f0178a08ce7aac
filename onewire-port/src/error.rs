use ds2480::Ds2480Error;
use onewire_bus::{DeviceAddress, UnknownCode};
use thiserror::Error;

/// Port adapter errors.
#[derive(Debug, Error)]
pub enum PortError {
    /// The link to the adapter failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// The adapter or the 1-Wire bus answered something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The adapter cannot do what was asked.
    #[error("not supported: {0}")]
    Capability(String),
    /// The network host rejected the client, or the client the host.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// No port has been selected yet.
    #[error("no port selected")]
    PortNotSelected,
    /// The adapter did not answer on the selected port.
    #[error("adapter not present")]
    AdapterNotPresent,
    /// A device did not answer its address.
    #[error("device {0} not present")]
    DeviceNotPresent(DeviceAddress),
    /// The network host reported a failure.
    #[error("remote adapter: {0}")]
    Remote(String),
    /// Socket errors.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad classification of a [`PortError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The port, the adapter or the socket is unreachable.
    Transport,
    /// The conversation with the adapter or the bus went wrong.
    Protocol,
    /// The adapter lacks the requested capability.
    Capability,
    /// The network handshake failed.
    Authentication,
}

impl PortError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) | Self::PortNotSelected | Self::AdapterNotPresent | Self::Io(_) => {
                ErrorKind::Transport
            }
            Self::Protocol(_) | Self::DeviceNotPresent(_) | Self::Remote(_) => ErrorKind::Protocol,
            Self::Capability(_) => ErrorKind::Capability,
            Self::Authentication(_) => ErrorKind::Authentication,
        }
    }

    pub(crate) fn capability(what: impl Into<String>) -> Self {
        Self::Capability(what.into())
    }
}

impl<E: core::fmt::Debug> From<Ds2480Error<E>> for PortError {
    fn from(value: Ds2480Error<E>) -> Self {
        match value {
            Ds2480Error::Serial(e) => Self::Transport(format!("{e:?}")),
            Ds2480Error::AdapterNotDetected => Self::AdapterNotPresent,
            Ds2480Error::Unsupported(what) => Self::Capability(what.into()),
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl From<UnknownCode> for PortError {
    fn from(value: UnknownCode) -> Self {
        Self::Protocol(value.to_string())
    }
}

/// Result type of port adapter operations.
pub type PortResult<T> = Result<T, PortError>;
