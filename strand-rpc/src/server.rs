//! Server engine: accept loop, handshake replies and call dispatch.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use strand_comm::{CommError, Connection, Listener};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::QUEUE_DEPTH;
use crate::binding::{self, Invoked, Invoker, MethodError};
use crate::codec;
use crate::error::RpcError;
use crate::registry::MethodRegistry;
use crate::stat::stat_add;
use crate::wire::{self, CALL_METHOD, SYNC_METHOD};

/// RPC server: a method registry plus an accept loop.
///
/// Methods are registered up front; [`serve`](Server::serve) then answers
/// each accepted connection until [`stop`](Server::stop). Methods registered
/// after a client's handshake are invisible to that client.
pub struct Server {
    listener: Listener,
    registry: Arc<MethodRegistry>,
    bindings: Arc<RwLock<HashMap<u32, Invoker>>>,
    shutdown_tx: watch::Sender<bool>,
    conns: AsyncMutex<Vec<Connection>>,
}

impl Server {
    /// Bind the listening socket. Port 0 picks a free port; see
    /// [`local_addr`](Server::local_addr).
    pub async fn bind(addr: &str) -> Result<Self, RpcError> {
        let listener = Listener::bind(addr).await?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            listener,
            registry: Arc::new(MethodRegistry::new()),
            bindings: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx,
            conns: AsyncMutex::new(Vec::new()),
        })
    }

    /// Require mutual TLS on every connection accepted from now on.
    pub fn tls_enable(&self, ca: &str, cert: &str, key: &str) -> Result<(), RpcError> {
        self.listener.tls_enable(ca, cert, key).map_err(RpcError::Transport)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RpcError> {
        self.listener.local_addr().map_err(RpcError::Transport)
    }

    /// Bind a method under `name`.
    ///
    /// The handler takes its input by value, writes its output through the
    /// mutable reference, and returns `Err` to send a remote error instead.
    /// The input/output type descriptors recorded here are what clients
    /// check their arguments against after the handshake.
    pub fn register<I, O, F>(&self, name: &str, handler: F) -> Result<u32, RpcError>
    where
        I: DeserializeOwned + 'static,
        O: Serialize + Default + 'static,
        F: Fn(I, &mut O) -> Result<(), MethodError> + Send + Sync + 'static,
    {
        let in_type = codec::type_descriptor::<I>();
        let out_type = codec::type_descriptor::<O>();
        let id = self.registry.add(name, &in_type, &out_type)?;
        self.bindings.write().insert(id, binding::bind(name, handler));
        info!(method = name, id, %in_type, %out_type, "registered method");
        Ok(id)
    }

    /// Accept and serve connections until [`stop`](Server::stop).
    pub async fn serve(&self) -> Result<(), RpcError> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            let accepted = tokio::select! {
                _ = shutdown_rx.changed() => break,
                accepted = self.listener.accept() => accepted,
            };
            let conn = match accepted {
                Ok(conn) => conn,
                Err(CommError::Tls(e)) => {
                    warn!(error = %e, "rejected connection");
                    continue;
                }
                Err(e) => return Err(RpcError::Transport(e)),
            };

            info!(peer = conn.peer(), "new server instance");
            if let Err(e) = self.attach(conn.clone(), workers).await {
                warn!(peer = conn.peer(), error = %e, "connection setup failed");
                continue;
            }
            self.conns.lock().await.push(conn.clone());
            tokio::spawn(async move {
                conn.wait().await;
                debug!(peer = conn.peer(), "server instance closed");
            });
        }
        Ok(())
    }

    /// Register both frame handlers and start the connection's worker pool.
    async fn attach(&self, conn: Connection, workers: usize) -> Result<(), RpcError> {
        let registry = self.registry.clone();
        conn.register_handler(SYNC_METHOD, move |conn, _req_id, _body| {
            let registry = registry.clone();
            async move { sync_methods(conn, registry).await }
        })?;

        let bindings = self.bindings.clone();
        conn.register_handler(CALL_METHOD, move |conn, _req_id, payload| {
            let bindings = bindings.clone();
            async move { dispatch_call(conn, bindings, payload).await }
        })?;

        conn.start(workers, QUEUE_DEPTH).await?;
        Ok(())
    }

    /// Stop accepting and tear down every live connection.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let conns: Vec<Connection> = {
            let mut conns = self.conns.lock().await;
            conns.drain(..).collect()
        };
        for conn in conns {
            conn.stop().await;
            conn.wait().await;
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("methods", &self.registry.len())
            .finish()
    }
}

/// Answer a handshake with the registry snapshot.
async fn sync_methods(conn: Connection, registry: Arc<MethodRegistry>) {
    let snapshot = registry.snapshot();
    let body = match wire::encode_method_list(&snapshot) {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "method table did not encode");
            return;
        }
    };
    debug!(peer = conn.peer(), methods = snapshot.len(), "answering handshake");
    if let Err(e) = conn.send_frame(SYNC_METHOD, &body).await {
        warn!(peer = conn.peer(), error = %e, "handshake reply failed");
    }
}

/// Decode, invoke and answer one call frame.
///
/// Failures that cannot be reported to the caller (unknown id, codec
/// trouble, a lost response) drop the response and bump the error counter;
/// the caller's own timeout or shutdown deals with the silence.
async fn dispatch_call(
    conn: Connection,
    bindings: Arc<RwLock<HashMap<u32, Invoker>>>,
    payload: Bytes,
) {
    let (req_id, method_id, body) = match wire::unpack_request(&payload) {
        Ok(parts) => parts,
        Err(e) => {
            warn!(peer = conn.peer(), error = %e, "malformed call frame");
            stat_add(1, 0, 1);
            return;
        }
    };

    let invoked = {
        let bindings = bindings.read();
        match bindings.get(&method_id) {
            Some(invoker) => invoker(body),
            None => {
                warn!(req_id, method_id, "call for unknown method id dropped");
                stat_add(1, 0, 1);
                return;
            }
        }
    };

    match invoked {
        Invoked::Reply { errno, body } => {
            let frame = wire::pack_response(req_id, errno, &body);
            match conn.send_frame(CALL_METHOD, &frame).await {
                Ok(()) => stat_add(1, 1, 0),
                Err(e) => {
                    debug!(req_id, error = %e, "response send failed");
                    stat_add(1, 0, 1);
                }
            }
        }
        Invoked::Undecodable | Invoked::Unencodable => stat_add(1, 0, 1),
    }
}
