//! Client engine: handshake, request id assignment, call submission and
//! response correlation.
//!
//! One correlation task owns the pending table outright; producers reach it
//! only through a bounded submit queue, and the transport's receive side
//! through a bounded response queue. That ownership discipline is what keeps
//! the hot path free of locks.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use strand_comm::{CommError, Connection};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::QUEUE_DEPTH;
use crate::codec;
use crate::error::RpcError;
use crate::registry::{MethodInfo, MethodRegistry, RegistryError};
use crate::wire::{self, CALL_METHOD, SYNC_METHOD};

const CREATED: u8 = 0;
const STARTING: u8 = 1;
const RUNNING: u8 = 2;
const STOPPED: u8 = 3;

/// An RPC client bound to one server address.
///
/// Lifecycle is one-shot: `new` then [`start`](Client::start) (which dials,
/// performs the method-table handshake and spawns the correlation task),
/// then any number of concurrent calls, then [`stop`](Client::stop).
/// Calls outside the running state fail with [`RpcError::NotRunning`].
pub struct Client {
    addr: String,
    tls: Mutex<Option<TlsFiles>>,
    registry: Arc<MethodRegistry>,
    next_req_id: AtomicU64,
    state: AtomicU8,
    submit_tx: Mutex<Option<mpsc::Sender<Request>>>,
    conn: Mutex<Option<Connection>>,
    shutdown_tx: watch::Sender<bool>,
    relay: AsyncMutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
struct TlsFiles {
    ca: String,
    cert: String,
    key: String,
}

/// An in-flight call on its way to the correlation task.
struct Request {
    req_id: u64,
    method_id: u32,
    method: String,
    body: Vec<u8>,
    complete: Completer,
}

/// A response handed from the receive handler to the correlation task.
struct Response {
    req_id: u64,
    errno: u32,
    body: Bytes,
}

enum CallReply {
    Response { errno: u32, body: Bytes },
    Failed(RpcError),
}

/// Erased completion: decodes the typed output and fires the caller's
/// oneshot. Consumed exactly once.
type Completer = Box<dyn FnOnce(CallReply) + Send>;

struct Pending {
    method: String,
    complete: Completer,
}

/// Completion handle returned by [`Client::call_async`].
///
/// Resolves exactly once: with the decoded output, the remote error, or the
/// local failure that kept the call off the wire.
pub struct PendingCall<O> {
    rx: oneshot::Receiver<Result<O, RpcError>>,
}

impl<O> PendingCall<O> {
    fn channel() -> (oneshot::Sender<Result<O, RpcError>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, PendingCall { rx })
    }

    fn failed(err: RpcError) -> Self {
        let (tx, pending) = Self::channel();
        let _ = tx.send(Err(err));
        pending
    }
}

impl<O> Future for PendingCall<O> {
    type Output = Result<O, RpcError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| match res {
            Ok(outcome) => outcome,
            // The completer was dropped without firing; the client is gone.
            Err(_) => Err(RpcError::Stopped),
        })
    }
}

impl Client {
    pub fn new(addr: &str) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            addr: addr.to_string(),
            tls: Mutex::new(None),
            registry: Arc::new(MethodRegistry::new()),
            next_req_id: AtomicU64::new(0),
            state: AtomicU8::new(CREATED),
            submit_tx: Mutex::new(None),
            conn: Mutex::new(None),
            shutdown_tx,
            relay: AsyncMutex::new(None),
        }
    }

    /// Use mutual TLS when dialing. Certificate problems surface from
    /// [`start`](Client::start).
    pub fn tls_enable(&self, ca: &str, cert: &str, key: &str) {
        *self.tls.lock() = Some(TlsFiles {
            ca: ca.to_string(),
            cert: cert.to_string(),
            key: key.to_string(),
        });
    }

    /// Dial, perform the handshake, and spawn the correlation task.
    pub async fn start(&self) -> Result<(), RpcError> {
        self.state
            .compare_exchange(CREATED, STARTING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RpcError::AlreadyStarted)?;

        match self.start_inner().await {
            Ok(()) => {
                self.state.store(RUNNING, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                self.state.store(STOPPED, Ordering::Release);
                Err(e)
            }
        }
    }

    async fn start_inner(&self) -> Result<(), RpcError> {
        let tls = self.tls.lock().clone();
        let conn = match tls {
            Some(t) => Connection::dial_tls(&self.addr, &t.ca, &t.cert, &t.key).await?,
            None => Connection::dial(&self.addr).await?,
        };

        let rsp_rx = match self.handshake(&conn).await {
            Ok(rsp_rx) => rsp_rx,
            Err(e) => {
                conn.stop().await;
                conn.wait().await;
                return Err(e);
            }
        };

        let (submit_tx, submit_rx) = mpsc::channel::<Request>(QUEUE_DEPTH);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(relay(conn.clone(), submit_rx, rsp_rx, shutdown_rx));

        *self.conn.lock() = Some(conn);
        *self.submit_tx.lock() = Some(submit_tx);
        *self.relay.lock().await = Some(handle);
        Ok(())
    }

    /// Register both response handlers, start the transport, and block until
    /// the server's method table has been loaded into the local registry.
    async fn handshake(&self, conn: &Connection) -> Result<mpsc::Receiver<Response>, RpcError> {
        let (sync_tx, mut sync_rx) = mpsc::channel::<Result<Vec<MethodInfo>, RpcError>>(1);
        conn.register_handler(SYNC_METHOD, move |_conn, _req_id, body| {
            let sync_tx = sync_tx.clone();
            async move {
                let table = wire::decode_method_list(&body).map_err(RpcError::Codec);
                let _ = sync_tx.send(table).await;
            }
        })?;

        let (rsp_tx, rsp_rx) = mpsc::channel::<Response>(QUEUE_DEPTH);
        conn.register_handler(CALL_METHOD, move |_conn, _req_id, payload| {
            let rsp_tx = rsp_tx.clone();
            async move {
                match wire::unpack_response(&payload) {
                    Ok((req_id, errno, body)) => {
                        let body = payload.slice_ref(body);
                        let _ = rsp_tx.send(Response { req_id, errno, body }).await;
                    }
                    Err(e) => warn!(error = %e, "malformed response frame dropped"),
                }
            }
        })?;

        conn.start(1, QUEUE_DEPTH).await?;
        conn.send_frame(SYNC_METHOD, &[]).await?;

        let table = match sync_rx.recv().await {
            Some(Ok(table)) => table,
            Some(Err(e)) => return Err(RpcError::Handshake(e.to_string())),
            None => {
                return Err(RpcError::Handshake(
                    "connection closed before the method table arrived".to_string(),
                ));
            }
        };
        for m in &table {
            debug!(method = %m.name, id = m.id, in_type = %m.in_type, out_type = %m.out_type, "sync method");
        }
        self.registry
            .batch_add(table)
            .map_err(|e| RpcError::Handshake(e.to_string()))?;
        Ok(rsp_rx)
    }

    /// Call `method` and write the output in place. Synchronous shape of
    /// [`call_async`](Client::call_async).
    pub async fn call<I, O>(&self, method: &str, input: I, output: &mut O) -> Result<(), RpcError>
    where
        I: Serialize,
        O: DeserializeOwned + Send + 'static,
    {
        let pending = self.call_async(method, input).await;
        *output = pending.await?;
        Ok(())
    }

    /// Submit a call and return its completion handle.
    ///
    /// Pre-send checks run in order — input passed by value, method known,
    /// both type descriptors matching the registry, input encodable — and a
    /// failed check completes the handle immediately without anything
    /// reaching the wire. Submission itself backpressures when the queue is
    /// full.
    pub async fn call_async<I, O>(&self, method: &str, input: I) -> PendingCall<O>
    where
        I: Serialize,
        O: DeserializeOwned + Send + 'static,
    {
        if self.state.load(Ordering::Acquire) != RUNNING {
            return PendingCall::failed(RpcError::NotRunning);
        }

        let in_type = codec::type_descriptor::<I>();
        if codec::is_reference(&in_type) {
            return PendingCall::failed(RpcError::BadArgumentShape(in_type));
        }

        let info = match self.registry.get_by_name(method) {
            Ok(info) => info,
            Err(RegistryError::NameNotFound(name)) => {
                return PendingCall::failed(RpcError::MethodNotFound(name));
            }
            Err(e) => return PendingCall::failed(RpcError::Registry(e)),
        };

        let out_type = codec::type_descriptor::<O>();
        if info.in_type != in_type || info.out_type != out_type {
            warn!(
                method,
                want_in = %info.in_type,
                want_out = %info.out_type,
                got_in = %in_type,
                got_out = %out_type,
                "argument types do not match the registry"
            );
            return PendingCall::failed(RpcError::TypeMismatch(method.to_string()));
        }

        let body = match codec::encode(&input) {
            Ok(body) => body,
            Err(e) => return PendingCall::failed(RpcError::Codec(e)),
        };

        let (tx, pending) = PendingCall::channel();
        let complete: Completer = Box::new(move |reply| {
            let outcome = match reply {
                CallReply::Failed(e) => Err(e),
                CallReply::Response { errno: 0, body } => {
                    codec::decode::<O>(&body).map_err(RpcError::Codec)
                }
                CallReply::Response { body, .. } => Err(decode_remote_error(&body)),
            };
            let _ = tx.send(outcome);
        });

        let request = Request {
            req_id: self.next_req_id.fetch_add(1, Ordering::Relaxed) + 1,
            method_id: info.id,
            method: method.to_string(),
            body,
            complete,
        };

        let submit_tx = self.submit_tx.lock().clone();
        match submit_tx {
            Some(submit_tx) => {
                if let Err(rejected) = submit_tx.send(request).await {
                    (rejected.0.complete)(CallReply::Failed(RpcError::Stopped));
                }
            }
            None => (request.complete)(CallReply::Failed(RpcError::NotRunning)),
        }
        pending
    }

    /// Shut the transport down, drain it, then stop the correlation task.
    /// Calls still pending are failed ([`RpcError::Stopped`] or
    /// [`RpcError::Transport`]) rather than left hanging.
    pub async fn stop(&self) -> Result<(), RpcError> {
        self.state
            .compare_exchange(RUNNING, STOPPED, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RpcError::NotRunning)?;

        let conn = self.conn.lock().take();
        if let Some(conn) = conn {
            conn.stop().await;
            conn.wait().await;
        }

        self.submit_tx.lock().take();
        let _ = self.shutdown_tx.send(true);

        let relay = self.relay.lock().await.take();
        if let Some(relay) = relay {
            let _ = relay.await;
        }
        debug!("client stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("addr", &self.addr)
            .field("methods", &self.registry.len())
            .finish_non_exhaustive()
    }
}

/// The correlation task. Sole owner of the pending table.
async fn relay(
    conn: Connection,
    mut submit_rx: mpsc::Receiver<Request>,
    mut rsp_rx: mpsc::Receiver<Response>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut pending: HashMap<u64, Pending> = HashMap::new();
    let mut submit_open = true;
    let mut rsp_open = true;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            req = submit_rx.recv(), if submit_open => match req {
                Some(req) => submit(&conn, &mut pending, req).await,
                None => submit_open = false,
            },
            rsp = rsp_rx.recv(), if rsp_open => match rsp {
                Some(rsp) => complete(&mut pending, rsp),
                None => {
                    // Receive side gone: nothing still in flight can complete.
                    rsp_open = false;
                    fail_all(&mut pending, || RpcError::Transport(CommError::Closed));
                }
            },
        }
        if !submit_open && !rsp_open {
            break;
        }
    }

    fail_all(&mut pending, || RpcError::Stopped);
    debug!("correlation task shut down");
}

async fn submit(conn: &Connection, pending: &mut HashMap<u64, Pending>, req: Request) {
    if pending.contains_key(&req.req_id) {
        // Id wraparound or a bug. Dropping the completer still fires the
        // caller's completion, as Stopped.
        warn!(req_id = req.req_id, method = %req.method, "duplicate request id dropped");
        return;
    }
    let frame = wire::pack_request(req.req_id, req.method_id, &req.body);
    pending.insert(
        req.req_id,
        Pending {
            method: req.method,
            complete: req.complete,
        },
    );
    if let Err(e) = conn.send_frame(CALL_METHOD, &frame).await {
        if let Some(p) = pending.remove(&req.req_id) {
            (p.complete)(CallReply::Failed(RpcError::Transport(e)));
        }
    }
}

fn complete(pending: &mut HashMap<u64, Pending>, rsp: Response) {
    match pending.remove(&rsp.req_id) {
        Some(p) => {
            debug!(req_id = rsp.req_id, method = %p.method, errno = rsp.errno, "completing call");
            (p.complete)(CallReply::Response {
                errno: rsp.errno,
                body: rsp.body,
            });
        }
        None => warn!(req_id = rsp.req_id, "response with no pending call dropped"),
    }
}

fn fail_all(pending: &mut HashMap<u64, Pending>, err: impl Fn() -> RpcError) {
    for (_, p) in pending.drain() {
        (p.complete)(CallReply::Failed(err()));
    }
}

/// An `errno != 0` body carries the encoded error message; an empty body is
/// the zero-valued error.
fn decode_remote_error(body: &[u8]) -> RpcError {
    if body.is_empty() {
        return RpcError::Remote(String::new());
    }
    match codec::decode::<String>(body) {
        Ok(msg) => RpcError::Remote(msg),
        Err(e) => RpcError::Codec(e),
    }
}
