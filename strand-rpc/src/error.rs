use std::fmt;

use strand_comm::CommError;

use crate::codec::CodecError;
use crate::registry::RegistryError;

/// Errors surfaced by the RPC runtime.
///
/// Client-side call failures are always delivered through the call's
/// completion, exactly once. Server-side failures that cannot be reported to
/// the caller are counted in the [stat counters](crate::stat) and logged.
#[derive(Debug)]
pub enum RpcError {
    /// Registry insertion or lookup failed (duplicate name, unknown method).
    Registry(RegistryError),
    /// No method with this name in the client's local registry.
    MethodNotFound(String),
    /// The supplied input/output types do not match the registered method.
    TypeMismatch(String),
    /// The input was passed by reference; inputs are passed by value.
    BadArgumentShape(String),
    /// Value encode/decode failed.
    Codec(CodecError),
    /// The method-table handshake did not complete.
    Handshake(String),
    /// The transport refused or lost the frame.
    Transport(CommError),
    /// The remote method returned an error; the message travelled in the
    /// response body with `errno != 0`.
    Remote(String),
    /// The client is not in the running state.
    NotRunning,
    /// `start` was called more than once.
    AlreadyStarted,
    /// The client was stopped while the call was in flight.
    Stopped,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Registry(e) => write!(f, "{e}"),
            RpcError::MethodNotFound(name) => write!(f, "method not found: {name}"),
            RpcError::TypeMismatch(name) => {
                write!(f, "method {name}: argument types do not match the registry")
            }
            RpcError::BadArgumentShape(desc) => {
                write!(f, "input must be passed by value, got {desc}")
            }
            RpcError::Codec(e) => write!(f, "{e}"),
            RpcError::Handshake(msg) => write!(f, "handshake failed: {msg}"),
            RpcError::Transport(e) => write!(f, "transport error: {e}"),
            RpcError::Remote(msg) => write!(f, "remote error: {msg}"),
            RpcError::NotRunning => write!(f, "client is not running"),
            RpcError::AlreadyStarted => write!(f, "client already started"),
            RpcError::Stopped => write!(f, "client stopped while the call was pending"),
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RpcError::Registry(e) => Some(e),
            RpcError::Codec(e) => Some(e),
            RpcError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RegistryError> for RpcError {
    fn from(e: RegistryError) -> Self {
        RpcError::Registry(e)
    }
}

impl From<CodecError> for RpcError {
    fn from(e: CodecError) -> Self {
        RpcError::Codec(e)
    }
}

impl From<CommError> for RpcError {
    fn from(e: CommError) -> Self {
        RpcError::Transport(e)
    }
}
