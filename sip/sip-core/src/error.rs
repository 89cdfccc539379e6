use sip_types::header::HeaderError;
use std::io;
use std::sync::Arc;

/// Failure of a transport operation
///
/// Cloneable so it can be handed to every transaction affected by the same socket failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("address already in use")]
    AddressInUse,
    #[error("network unreachable")]
    NetworkUnreachable,
    #[error("connection reset by peer")]
    ConnectionReset,
    #[error("send timed out")]
    SendTimeout,
    #[error(transparent)]
    Io(Arc<io::Error>),
}

impl From<io::Error> for TransportError {
    fn from(error: io::Error) -> Self {
        use io::ErrorKind::*;

        match error.kind() {
            AddrInUse => Self::AddressInUse,
            NetworkUnreachable | HostUnreachable | AddrNotAvailable => Self::NetworkUnreachable,
            ConnectionReset | ConnectionAborted | BrokenPipe | UnexpectedEof | NotConnected => {
                Self::ConnectionReset
            }
            _ => Self::Io(Arc::new(error)),
        }
    }
}

/// An incoming message could not be understood
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed message: {0}")]
    MalformedMessage(&'static str),
    #[error("malformed message: {0}")]
    Header(#[from] HeaderError),
}
