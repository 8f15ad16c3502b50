//! A small symmetric RPC runtime over length-framed, optionally TLS-secured
//! byte streams.
//!
//! A server exposes named methods, each with one by-value input and one
//! output written in place; clients look methods up by name, submit inputs,
//! and get back the output or an error. The first round trip on every
//! connection is a handshake that copies the server's method table — names,
//! ids and type descriptors — into the client, so every later call is
//! checked locally before a byte reaches the wire.
//!
//! ```no_run
//! # async fn demo() -> Result<(), strand_rpc::RpcError> {
//! use strand_rpc::{Client, Server};
//!
//! let server = Server::bind("127.0.0.1:0").await?;
//! server.register("Add", |a: u32, out: &mut u32| {
//!     *out = a;
//!     Ok(())
//! })?;
//! let addr = server.local_addr()?;
//! tokio::spawn(async move { server.serve().await });
//!
//! let client = Client::new(&addr.to_string());
//! client.start().await?;
//! let mut out = 0u32;
//! client.call("Add", 42u32, &mut out).await?;
//! assert_eq!(out, 42);
//! client.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! The stream transport underneath lives in `strand-comm`; this crate only
//! assumes "send a typed frame, get frames back per frame type".

pub mod binding;
pub mod client;
pub mod codec;
pub mod error;
pub mod registry;
pub mod server;
pub mod stat;
pub mod wire;

pub use binding::MethodError;
pub use client::{Client, PendingCall};
pub use error::RpcError;
pub use registry::{MethodInfo, MethodRegistry, RegistryError};
pub use server::Server;
pub use stat::{Stat, get_stat, stat_add};
pub use wire::{CALL_METHOD, SYNC_METHOD};

/// Depth of the submit, response and dispatch queues.
pub(crate) const QUEUE_DEPTH: usize = 1000;
