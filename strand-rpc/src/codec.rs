//! The value codec boundary.
//!
//! Values cross the wire as postcard bytes; the runtime itself only ever
//! treats them as `encode(value) -> bytes` / `decode(bytes) -> value`.
//!
//! Peers never exchange schemas, only *type descriptors*: deterministic
//! strings both sides derive from the concrete Rust type. Two ends agree on a
//! method's signature iff the descriptor strings compare equal, so the types
//! backing a method must be shared (same crate) between client and server.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encode a value to its wire bytes.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(value).map_err(CodecError::Encode)
}

/// Decode wire bytes into a value.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    postcard::from_bytes(bytes).map_err(CodecError::Decode)
}

/// Deterministic string identity for a type, as exchanged in the handshake.
///
/// Whitespace is stripped so generic spelling differences cannot break the
/// comparison.
pub fn type_descriptor<T: ?Sized>() -> String {
    std::any::type_name::<T>().replace(' ', "")
}

/// Whether a descriptor names a reference or pointer type.
pub fn is_reference(descriptor: &str) -> bool {
    descriptor.starts_with('&') || descriptor.starts_with('*')
}

/// Value encode/decode failure.
#[derive(Debug)]
pub enum CodecError {
    Encode(postcard::Error),
    Decode(postcard::Error),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Encode(e) => write!(f, "encode failed: {e}"),
            CodecError::Decode(e) => write!(f, "decode failed: {e}"),
        }
    }
}

impl std::error::Error for CodecError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        a: u32,
        b: Vec<u32>,
        c: String,
    }

    #[test]
    fn roundtrip() {
        let v = Sample {
            a: 7,
            b: vec![1, 2, 3],
            c: "xyz".to_string(),
        };
        let bytes = encode(&v).unwrap();
        let back: Sample = decode(&bytes).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn unit_encodes_to_nothing() {
        assert!(encode(&()).unwrap().is_empty());
        decode::<()>(&[]).unwrap();
    }

    #[test]
    fn decode_of_garbage_fails() {
        assert!(decode::<Sample>(&[0xff]).is_err());
    }

    #[test]
    fn descriptors_are_stable_and_distinct() {
        assert_eq!(type_descriptor::<u32>(), type_descriptor::<u32>());
        assert_ne!(type_descriptor::<u32>(), type_descriptor::<u64>());
        assert_ne!(type_descriptor::<u32>(), type_descriptor::<Vec<u32>>());
    }

    #[test]
    fn references_are_detected() {
        assert!(is_reference(&type_descriptor::<&u32>()));
        assert!(is_reference(&type_descriptor::<&mut Vec<u32>>()));
        assert!(!is_reference(&type_descriptor::<u32>()));
        assert!(!is_reference(&type_descriptor::<String>()));
    }
}
