//! Typed method bindings and their erased invokers.
//!
//! A bound method has exactly one by-value input, one output written through
//! a mutable reference, and a `Result` telling success from a remote error.
//! The typed identity is captured once, at registration; after that the
//! server only ever sees an erased `bytes -> Invoked` function keyed by the
//! method id.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::codec;

/// Error a method hands back to its caller.
///
/// Travels in the response body with `errno = 1`; the client surfaces it as
/// [`RpcError::Remote`](crate::RpcError::Remote).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodError(String);

impl MethodError {
    pub fn new(msg: impl Into<String>) -> Self {
        MethodError(msg.into())
    }
}

impl fmt::Display for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for MethodError {}

impl From<String> for MethodError {
    fn from(msg: String) -> Self {
        MethodError(msg)
    }
}

impl From<&str> for MethodError {
    fn from(msg: &str) -> Self {
        MethodError(msg.to_string())
    }
}

/// Outcome of driving a request body through an invoker.
pub(crate) enum Invoked {
    /// A response is ready to be sent back.
    Reply { errno: u32, body: Vec<u8> },
    /// The body did not decode into the method's input type; no response.
    Undecodable,
    /// The output or error value did not encode; no response.
    Unencodable,
}

pub(crate) type Invoker = Box<dyn Fn(&[u8]) -> Invoked + Send + Sync>;

/// Wrap a typed handler into an erased invoker.
///
/// The adapter decodes the input, allocates a fresh output slot, runs the
/// handler, and encodes either the output (`errno = 0`) or the error message
/// (`errno = 1`).
pub(crate) fn bind<I, O, F>(name: &str, handler: F) -> Invoker
where
    I: DeserializeOwned + 'static,
    O: Serialize + Default + 'static,
    F: Fn(I, &mut O) -> Result<(), MethodError> + Send + Sync + 'static,
{
    let name = name.to_string();
    Box::new(move |body| {
        let input: I = match codec::decode(body) {
            Ok(input) => input,
            Err(e) => {
                warn!(method = %name, error = %e, "request body did not decode");
                return Invoked::Undecodable;
            }
        };

        let mut output = O::default();
        let encoded = match handler(input, &mut output) {
            Ok(()) => codec::encode(&output).map(|body| (0, body)),
            Err(e) => codec::encode(&e.to_string()).map(|body| (1, body)),
        };
        match encoded {
            Ok((errno, body)) => Invoked::Reply { errno, body },
            Err(e) => {
                warn!(method = %name, error = %e, "response body did not encode");
                Invoked::Unencodable
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_reply_carries_errno_zero_and_encoded_output() {
        let invoker = bind("double", |a: u32, out: &mut u32| {
            *out = a * 2;
            Ok(())
        });

        let body = codec::encode(&21u32).unwrap();
        match invoker(&body) {
            Invoked::Reply { errno, body } => {
                assert_eq!(errno, 0);
                assert_eq!(codec::decode::<u32>(&body).unwrap(), 42);
            }
            _ => panic!("expected a reply"),
        }
    }

    #[test]
    fn method_error_carries_errno_one_and_message() {
        let invoker = bind("refuse", |_a: u32, _out: &mut u32| {
            Err(MethodError::new("refused"))
        });

        let body = codec::encode(&1u32).unwrap();
        match invoker(&body) {
            Invoked::Reply { errno, body } => {
                assert_eq!(errno, 1);
                assert_eq!(codec::decode::<String>(&body).unwrap(), "refused");
            }
            _ => panic!("expected a reply"),
        }
    }

    #[test]
    fn undecodable_input_produces_no_reply() {
        let invoker = bind("sum", |v: Vec<u32>, out: &mut u32| {
            *out = v.iter().sum();
            Ok(())
        });

        // A length prefix promising more elements than there are bytes.
        match invoker(&[0xff]) {
            Invoked::Undecodable => {}
            _ => panic!("expected a decode failure"),
        }
    }

    #[test]
    fn empty_body_decodes_a_unit_input() {
        let invoker = bind("ping", |(): (), out: &mut u32| {
            *out = 7;
            Ok(())
        });

        match invoker(&[]) {
            Invoked::Reply { errno, body } => {
                assert_eq!(errno, 0);
                assert_eq!(codec::decode::<u32>(&body).unwrap(), 7);
            }
            _ => panic!("expected a reply"),
        }
    }
}
