use std::fmt;

/// Errors surfaced by the transport layer.
#[derive(Debug)]
pub enum CommError {
    /// Underlying socket failure.
    Io(std::io::Error),
    /// TLS configuration or handshake failure.
    Tls(String),
    /// The connection has been shut down (locally or by the peer).
    Closed,
    /// `start` was called twice on the same connection.
    AlreadyStarted,
    /// A handler is already registered for this frame type.
    HandlerExists(u32),
    /// A frame's length prefix was smaller than the fixed header.
    FrameTooSmall { len: usize },
    /// A frame's payload exceeded the transport limit.
    PayloadTooLarge { len: usize, max: usize },
    /// The dial address could not be parsed into a host and port.
    InvalidAddress(String),
}

impl fmt::Display for CommError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommError::Io(e) => write!(f, "i/o error: {e}"),
            CommError::Tls(msg) => write!(f, "tls error: {msg}"),
            CommError::Closed => write!(f, "connection closed"),
            CommError::AlreadyStarted => write!(f, "connection already started"),
            CommError::HandlerExists(ft) => {
                write!(f, "a handler is already registered for frame type {ft}")
            }
            CommError::FrameTooSmall { len } => {
                write!(f, "frame length {len} is smaller than the frame header")
            }
            CommError::PayloadTooLarge { len, max } => {
                write!(f, "frame payload of {len} bytes exceeds the {max} byte limit")
            }
            CommError::InvalidAddress(addr) => write!(f, "invalid address: {addr}"),
        }
    }
}

impl std::error::Error for CommError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CommError {
    fn from(e: std::io::Error) -> Self {
        CommError::Io(e)
    }
}
