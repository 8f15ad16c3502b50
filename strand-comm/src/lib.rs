//! Length-framed stream transport with optional mutual TLS.
//!
//! This crate carries raw frames between two peers; it knows nothing about
//! RPC semantics. A frame is `(frame_type, inner_req_id, payload)` behind a
//! big-endian `u32` length prefix. The receiving side routes each frame to
//! the handler registered for its frame type, on a bounded worker pool.
//!
//! ```no_run
//! # async fn demo() -> Result<(), strand_comm::CommError> {
//! use strand_comm::{Connection, Listener};
//!
//! let listener = Listener::bind("127.0.0.1:0").await?;
//! let addr = listener.local_addr()?;
//!
//! let conn = Connection::dial(&addr.to_string()).await?;
//! conn.register_handler(0, |_conn, req_id, payload| async move {
//!     println!("frame {req_id}: {} bytes", payload.len());
//! })?;
//! conn.start(1, 1000).await?;
//! conn.send_frame(0, b"hello").await?;
//! # Ok(())
//! # }
//! ```

mod conn;
mod error;
mod listen;
mod tls;

pub use conn::{Connection, HandlerFuture, FRAME_HEADER_LEN, MAX_PAYLOAD_SIZE};
pub use error::CommError;
pub use listen::Listener;
