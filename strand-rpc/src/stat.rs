//! Process-wide request counters.
//!
//! The server engine bumps these on every handled call; operators sample
//! them periodically and diff snapshots for throughput. Each field is
//! individually consistent; the triple as a whole is not read atomically.

use std::sync::atomic::{AtomicI64, Ordering};

static RECV: AtomicI64 = AtomicI64::new(0);
static SEND: AtomicI64 = AtomicI64::new(0);
static ERR: AtomicI64 = AtomicI64::new(0);

/// Snapshot of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    pub recv: i64,
    pub send: i64,
    pub err: i64,
}

impl Stat {
    /// Componentwise difference, `self - other`.
    pub fn sub(self, other: Stat) -> Stat {
        Stat {
            recv: self.recv - other.recv,
            send: self.send - other.send,
            err: self.err - other.err,
        }
    }
}

/// Snapshot the current counters.
pub fn get_stat() -> Stat {
    Stat {
        recv: RECV.load(Ordering::Relaxed),
        send: SEND.load(Ordering::Relaxed),
        err: ERR.load(Ordering::Relaxed),
    }
}

/// Add deltas to the counters.
pub fn stat_add(recv: i64, send: i64, err: i64) {
    if recv != 0 {
        RECV.fetch_add(recv, Ordering::Relaxed);
    }
    if send != 0 {
        SEND.fetch_add(send, Ordering::Relaxed);
    }
    if err != 0 {
        ERR.fetch_add(err, Ordering::Relaxed);
    }
}
