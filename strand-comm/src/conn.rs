use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::CommError;
use crate::tls;

/// Fixed bytes after the length prefix: frame type + inner request id.
pub const FRAME_HEADER_LEN: usize = 8;

/// Maximum frame payload accepted from the wire.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Boxed future returned by frame handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

type HandlerFn = dyn Fn(Connection, u32, Bytes) -> HandlerFuture + Send + Sync;

type Reader = Box<dyn AsyncRead + Unpin + Send>;
type Writer = Box<dyn AsyncWrite + Unpin + Send>;

type Job = (Arc<HandlerFn>, u32, Bytes);

/// One framed, bidirectional byte stream.
///
/// A connection is produced by [`Listener::accept`](crate::Listener::accept)
/// or by [`Connection::dial`]. Frame handlers are registered per frame type,
/// then [`start`](Connection::start) spawns the read loop and a worker pool
/// that drives them. Each frame carries `(frame_type, inner_req_id, payload)`
/// behind a big-endian `u32` length prefix.
///
/// Cloning is cheap; all clones refer to the same stream.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnInner>,
}

struct ConnInner {
    peer: String,
    reader: AsyncMutex<Option<Reader>>,
    writer: AsyncMutex<Writer>,
    handlers: RwLock<HashMap<u32, Arc<HandlerFn>>>,
    next_req_id: AtomicU32,
    started: AtomicBool,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    tasks: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.inner.peer)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn from_stream<S>(stream: S, peer: String) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ConnInner {
                peer,
                reader: AsyncMutex::new(Some(Box::new(reader))),
                writer: AsyncMutex::new(Box::new(writer)),
                handlers: RwLock::new(HashMap::new()),
                next_req_id: AtomicU32::new(0),
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                shutdown_tx,
                tasks: AsyncMutex::new(Vec::new()),
            }),
        }
    }

    /// Open a plain TCP connection.
    pub async fn dial(addr: &str) -> Result<Self, CommError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream, addr.to_string()))
    }

    /// Open a mutually-authenticated TLS connection.
    pub async fn dial_tls(addr: &str, ca: &str, cert: &str, key: &str) -> Result<Self, CommError> {
        let config = tls::client_config(ca, cert, key)?;
        let host = addr
            .rsplit_once(':')
            .map(|(host, _)| host)
            .ok_or_else(|| CommError::InvalidAddress(addr.to_string()))?;
        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|_| CommError::InvalidAddress(addr.to_string()))?;

        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let stream = tokio_rustls::TlsConnector::from(config)
            .connect(server_name, stream)
            .await
            .map_err(|e| CommError::Tls(format!("handshake with {addr} failed: {e}")))?;
        Ok(Self::from_stream(stream, addr.to_string()))
    }

    /// An in-memory connection pair, for tests.
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (
            Self::from_stream(a, "mem:a".to_string()),
            Self::from_stream(b, "mem:b".to_string()),
        )
    }

    /// Peer label, for diagnostics.
    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    /// Register a handler for one frame type.
    ///
    /// Must be called before [`start`](Connection::start); at most one
    /// handler per frame type.
    pub fn register_handler<F, Fut>(&self, frame_type: u32, handler: F) -> Result<(), CommError>
    where
        F: Fn(Connection, u32, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.inner.started.load(Ordering::Acquire) {
            return Err(CommError::AlreadyStarted);
        }
        let erased: Arc<HandlerFn> = Arc::new(move |conn, req_id, payload| {
            Box::pin(handler(conn, req_id, payload)) as HandlerFuture
        });
        let mut handlers = self.inner.handlers.write();
        if handlers.contains_key(&frame_type) {
            return Err(CommError::HandlerExists(frame_type));
        }
        handlers.insert(frame_type, erased);
        Ok(())
    }

    /// Spawn the read loop plus `worker_count` dispatch workers fed by a
    /// bounded queue of `queue_depth` frames.
    pub async fn start(&self, worker_count: usize, queue_depth: usize) -> Result<(), CommError> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(CommError::AlreadyStarted);
        }
        let reader = self
            .inner
            .reader
            .lock()
            .await
            .take()
            .ok_or(CommError::AlreadyStarted)?;

        let (job_tx, job_rx) = mpsc::channel::<Job>(queue_depth.max(1));
        let job_rx = Arc::new(AsyncMutex::new(job_rx));

        let mut tasks = self.inner.tasks.lock().await;
        tasks.push(tokio::spawn(read_loop(self.clone(), reader, job_tx)));
        for _ in 0..worker_count.max(1) {
            tasks.push(tokio::spawn(worker_loop(self.clone(), job_rx.clone())));
        }
        Ok(())
    }

    /// Write one frame. The inner request id is assigned here.
    pub async fn send_frame(&self, frame_type: u32, payload: &[u8]) -> Result<(), CommError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(CommError::Closed);
        }
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(CommError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let req_id = self.inner.next_req_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let mut head = [0u8; 12];
        head[0..4].copy_from_slice(&((FRAME_HEADER_LEN + payload.len()) as u32).to_be_bytes());
        head[4..8].copy_from_slice(&frame_type.to_be_bytes());
        head[8..12].copy_from_slice(&req_id.to_be_bytes());

        let mut writer = self.inner.writer.lock().await;
        let res: Result<(), std::io::Error> = async {
            writer.write_all(&head).await?;
            if !payload.is_empty() {
                writer.write_all(payload).await?;
            }
            writer.flush().await
        }
        .await;

        res.map_err(|e| {
            self.inner.closed.store(true, Ordering::Release);
            CommError::Io(e)
        })
    }

    /// Shut the stream down and stop the read loop. Idempotent.
    pub async fn stop(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.inner.shutdown_tx.send(true);
        let mut writer = self.inner.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    /// Join the read loop and workers spawned by [`start`](Connection::start).
    pub async fn wait(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.inner.tasks.lock().await;
            tasks.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

async fn read_loop(conn: Connection, mut reader: Reader, job_tx: mpsc::Sender<Job>) {
    let mut shutdown_rx = conn.inner.shutdown_tx.subscribe();
    loop {
        let frame = tokio::select! {
            _ = shutdown_rx.changed() => break,
            frame = read_frame(&mut reader) => frame,
        };
        match frame {
            Ok(Some((frame_type, req_id, payload))) => {
                let handler = conn.inner.handlers.read().get(&frame_type).cloned();
                match handler {
                    Some(handler) => {
                        if job_tx.send((handler, req_id, payload)).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        warn!(peer = %conn.inner.peer, frame_type, "no handler for frame, dropping");
                    }
                }
            }
            Ok(None) => {
                debug!(peer = %conn.inner.peer, "peer closed connection");
                break;
            }
            Err(e) => {
                if !conn.is_closed() {
                    warn!(peer = %conn.inner.peer, error = %e, "read failed");
                }
                break;
            }
        }
    }
    conn.inner.closed.store(true, Ordering::Release);
    // Dropping the handlers releases any channel senders captured by them,
    // which is how waiters learn the connection is gone.
    conn.inner.handlers.write().clear();
}

async fn worker_loop(conn: Connection, job_rx: Arc<AsyncMutex<mpsc::Receiver<Job>>>) {
    loop {
        let job = { job_rx.lock().await.recv().await };
        match job {
            Some((handler, req_id, payload)) => handler(conn.clone(), req_id, payload).await,
            None => break,
        }
    }
}

/// Read one frame. `Ok(None)` is a clean EOF at a frame boundary.
async fn read_frame(reader: &mut Reader) -> Result<Option<(u32, u32, Bytes)>, CommError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(CommError::Io(e)),
    }
    let frame_len = u32::from_be_bytes(len_buf) as usize;

    if frame_len < FRAME_HEADER_LEN {
        return Err(CommError::FrameTooSmall { len: frame_len });
    }
    let payload_len = frame_len - FRAME_HEADER_LEN;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(CommError::PayloadTooLarge {
            len: payload_len,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let mut head = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut head).await?;
    let frame_type = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    let req_id = u32::from_be_bytes([head[4], head[5], head[6], head[7]]);

    let mut payload = BytesMut::zeroed(payload_len);
    if payload_len > 0 {
        reader.read_exact(&mut payload).await?;
    }
    Ok(Some((frame_type, req_id, payload.freeze())))
}
