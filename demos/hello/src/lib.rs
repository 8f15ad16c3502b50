//! Parameter types shared by the hello demo pair.
//!
//! Client and server must agree on the type descriptors exchanged in the
//! handshake, so the types live in this common crate rather than in either
//! binary.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputParam {
    pub a32: u32,
    pub b32: Vec<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputParam {
    pub sum: String,
}
