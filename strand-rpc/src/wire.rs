//! Inner frame layouts for the two RPC frame types.
//!
//! Everything here is big-endian and byte-exact:
//!
//! ```text
//! request  : u64 req_id | u32 method_id | u8[] body
//! response : u64 req_id | u32 errno     | u8[] body
//! ```
//!
//! The handshake (`SYNC_METHOD`) request is empty; its response body is the
//! encoded method table.

use std::fmt;

use crate::codec::{self, CodecError};
use crate::registry::MethodInfo;

/// Frame type of the method-table handshake.
pub const SYNC_METHOD: u32 = 0;
/// Frame type of RPC calls and their responses.
pub const CALL_METHOD: u32 = 1;

/// Bytes in front of the body, for both requests and responses.
pub const HEADER_LEN: usize = 12;

/// A frame payload too short to carry a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncatedFrame {
    pub len: usize,
}

impl fmt::Display for TruncatedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame payload of {} bytes is shorter than the {HEADER_LEN} byte header",
            self.len
        )
    }
}

impl std::error::Error for TruncatedFrame {}

pub fn pack_request(req_id: u64, method_id: u32, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    buf.extend_from_slice(&req_id.to_be_bytes());
    buf.extend_from_slice(&method_id.to_be_bytes());
    buf.extend_from_slice(body);
    buf
}

pub fn unpack_request(buf: &[u8]) -> Result<(u64, u32, &[u8]), TruncatedFrame> {
    split_header(buf)
}

pub fn pack_response(req_id: u64, errno: u32, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    buf.extend_from_slice(&req_id.to_be_bytes());
    buf.extend_from_slice(&errno.to_be_bytes());
    buf.extend_from_slice(body);
    buf
}

pub fn unpack_response(buf: &[u8]) -> Result<(u64, u32, &[u8]), TruncatedFrame> {
    split_header(buf)
}

fn split_header(buf: &[u8]) -> Result<(u64, u32, &[u8]), TruncatedFrame> {
    if buf.len() < HEADER_LEN {
        return Err(TruncatedFrame { len: buf.len() });
    }
    let req_id = u64::from_be_bytes([
        buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
    ]);
    let word = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
    Ok((req_id, word, &buf[HEADER_LEN..]))
}

/// Encode the handshake response body.
pub fn encode_method_list(methods: &[MethodInfo]) -> Result<Vec<u8>, CodecError> {
    codec::encode(&methods)
}

/// Decode the handshake response body.
pub fn decode_method_list(body: &[u8]) -> Result<Vec<MethodInfo>, CodecError> {
    codec::decode(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_layout_is_byte_exact() {
        let buf = pack_request(1, 2, &[0xaa, 0xbb]);
        assert_eq!(
            buf,
            vec![0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 2, 0xaa, 0xbb]
        );
    }

    #[test]
    fn response_layout_is_byte_exact() {
        let buf = pack_response(0x0102_0304_0506_0708, 1, &[]);
        assert_eq!(
            buf,
            vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0, 0, 0, 1]
        );
    }

    #[test]
    fn request_roundtrip() {
        let buf = pack_request(u64::MAX, u32::MAX, b"body bytes");
        let (req_id, method_id, body) = unpack_request(&buf).unwrap();
        assert_eq!(req_id, u64::MAX);
        assert_eq!(method_id, u32::MAX);
        assert_eq!(body, b"body bytes");
    }

    #[test]
    fn response_roundtrip_with_empty_body() {
        let buf = pack_response(77, 0, &[]);
        let (req_id, errno, body) = unpack_response(&buf).unwrap();
        assert_eq!(req_id, 77);
        assert_eq!(errno, 0);
        assert!(body.is_empty());
    }

    #[test]
    fn short_payload_rejected() {
        for len in 0..HEADER_LEN {
            let buf = vec![0u8; len];
            assert_eq!(unpack_request(&buf), Err(TruncatedFrame { len }));
            assert_eq!(unpack_response(&buf), Err(TruncatedFrame { len }));
        }
    }

    #[test]
    fn method_list_roundtrip() {
        let methods = vec![
            MethodInfo {
                id: 1,
                name: "Add".to_string(),
                in_type: "u32".to_string(),
                out_type: "u32".to_string(),
            },
            MethodInfo {
                id: 2,
                name: "Sub".to_string(),
                in_type: "u32".to_string(),
                out_type: "u32".to_string(),
            },
        ];
        let body = encode_method_list(&methods).unwrap();
        assert_eq!(decode_method_list(&body).unwrap(), methods);
    }

    #[test]
    fn empty_method_list_roundtrip() {
        let body = encode_method_list(&[]).unwrap();
        assert!(decode_method_list(&body).unwrap().is_empty());
    }
}
