use std::net::SocketAddr;

use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use crate::conn::Connection;
use crate::error::CommError;
use crate::tls;

/// Listening side of the transport.
///
/// Binds immediately so that callers can bind port 0 and read the effective
/// address back. TLS, when enabled, is negotiated inside [`accept`](Listener::accept).
pub struct Listener {
    tcp: TcpListener,
    acceptor: RwLock<Option<TlsAcceptor>>,
}

impl Listener {
    pub async fn bind(addr: &str) -> Result<Self, CommError> {
        let tcp = TcpListener::bind(addr).await?;
        Ok(Self {
            tcp,
            acceptor: RwLock::new(None),
        })
    }

    /// Require mutual TLS on every subsequently accepted connection.
    pub fn tls_enable(&self, ca: &str, cert: &str, key: &str) -> Result<(), CommError> {
        let config = tls::server_config(ca, cert, key)?;
        *self.acceptor.write() = Some(TlsAcceptor::from(config));
        Ok(())
    }

    pub fn local_addr(&self) -> Result<SocketAddr, CommError> {
        Ok(self.tcp.local_addr()?)
    }

    pub async fn accept(&self) -> Result<Connection, CommError> {
        let (stream, peer) = self.tcp.accept().await?;
        stream.set_nodelay(true)?;
        debug!(%peer, "accepted connection");

        let acceptor = self.acceptor.read().clone();
        match acceptor {
            Some(acceptor) => {
                let stream = acceptor
                    .accept(stream)
                    .await
                    .map_err(|e| CommError::Tls(format!("handshake with {peer} failed: {e}")))?;
                Ok(Connection::from_stream(stream, peer.to_string()))
            }
            None => Ok(Connection::from_stream(stream, peer.to_string())),
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.tcp.local_addr().ok())
            .finish_non_exhaustive()
    }
}
