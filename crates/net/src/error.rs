//! Error types for the I/O bridge.

use thiserror::Error;

/// Host-level bridge failures.
#[derive(Error, Debug)]
pub enum NetError {
    /// A server socket could not be created.
    #[error("couldn't create server socket: {source}")]
    Socket {
        #[source]
        source: std::io::Error,
    },

    /// A server socket could not be bound.
    #[error("couldn't bind to port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// Result alias for bridge operations.
pub type NetResult<T> = Result<T, NetError>;

/// Why an outbound connection failed; delivered to the owner as an error
/// symbol with the `failed` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    Refused,
    Net,
    Timeout,
    Address,
    Socket,
    Other,
}

impl ConnectError {
    /// The stable error-symbol name.
    pub fn name(self) -> &'static str {
        match self {
            ConnectError::Refused => "refused",
            ConnectError::Net => "net",
            ConnectError::Timeout => "timeout",
            ConnectError::Address => "address",
            ConnectError::Socket => "socket",
            ConnectError::Other => "other",
        }
    }

    pub(crate) fn from_io(err: &std::io::Error) -> ConnectError {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused => ConnectError::Refused,
            std::io::ErrorKind::TimedOut => ConnectError::Timeout,
            _ => match err.raw_os_error() {
                // ENETUNREACH / EHOSTUNREACH
                Some(101) | Some(113) => ConnectError::Net,
                _ => ConnectError::Other,
            },
        }
    }
}
