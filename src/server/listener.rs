//! Plain and TLS listeners for the caster.
//!
//! Both listeners serve the same router and record the peer address, as
//! `ConnectInfo<SocketAddr>` for plain HTTP and `ConnectInfo<TlsConnectInfo>`
//! for TLS, so request logs can name the remote end.
//!
//! TLS handshakes run in their own tasks, bounded by the caster timeout, so a
//! client that stalls mid-handshake never holds up the accept loop.

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::connect_info::Connected;
use axum::serve::{IncomingStream, Listener};
use axum::Router;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

use super::routes::{create_router, RouterConfig};
use crate::error::ListenError;
use crate::relay::Caster;

/// Completed handshakes waiting for the server to pick them up.
const HANDSHAKE_BACKLOG: usize = 128;

/// Pause after a failed `accept` (usually fd exhaustion) before retrying.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

// =============================================================================
// TLS Configuration
// =============================================================================

/// Load a PEM certificate chain and private key into a rustls server config.
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>, ListenError> {
    let certs = CertificateDer::pem_file_iter(cert_path)
        .and_then(|certs| certs.collect::<Result<Vec<_>, _>>())
        .map_err(|e| {
            ListenError::Tls(format!(
                "cannot read certificate {}: {}",
                cert_path.display(),
                e
            ))
        })?;

    if certs.is_empty() {
        return Err(ListenError::Tls(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let key = PrivateKeyDer::from_pem_file(key_path).map_err(|e| {
        ListenError::Tls(format!(
            "cannot read private key {}: {}",
            key_path.display(),
            e
        ))
    })?;

    let config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ListenError::Tls(e.to_string()))?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .map_err(|e| ListenError::Tls(e.to_string()))?;

    Ok(Arc::new(config))
}

// =============================================================================
// TLS Listener
// =============================================================================

/// A TCP listener that yields connections only after their TLS handshake.
pub struct TlsListener {
    incoming: mpsc::Receiver<(TlsStream<TcpStream>, SocketAddr)>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl TlsListener {
    /// Wrap a bound TCP listener. Handshakes slower than `handshake_timeout`
    /// are dropped.
    pub fn new(
        tcp: TcpListener,
        config: Arc<ServerConfig>,
        handshake_timeout: Duration,
    ) -> Result<Self, ListenError> {
        let local_addr = tcp.local_addr()?;
        let (tx, incoming) = mpsc::channel(HANDSHAKE_BACKLOG);
        let acceptor = TlsAcceptor::from(config);

        let accept_task = tokio::spawn(accept_loop(tcp, acceptor, tx, handshake_timeout));

        Ok(Self {
            incoming,
            local_addr,
            accept_task,
        })
    }
}

impl Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.incoming.recv().await {
            Some(conn) => conn,
            // Accept loop is gone; stay idle like a listener with no clients.
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

/// Peer address of a TLS connection, recorded as `ConnectInfo<TlsConnectInfo>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsConnectInfo(pub SocketAddr);

impl Connected<IncomingStream<'_, TlsListener>> for TlsConnectInfo {
    fn connect_info(stream: IncomingStream<'_, TlsListener>) -> Self {
        Self(*stream.remote_addr())
    }
}

impl Drop for TlsListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(
    tcp: TcpListener,
    acceptor: TlsAcceptor,
    tx: mpsc::Sender<(TlsStream<TcpStream>, SocketAddr)>,
    handshake_timeout: Duration,
) {
    loop {
        let accepted = tokio::select! {
            _ = tx.closed() => return,
            accepted = tcp.accept() => accepted,
        };

        let (stream, addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "TLS listener accept failed");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
                Ok(Ok(tls)) => {
                    let _ = tx.send((tls, addr)).await;
                }
                Ok(Err(e)) => debug!(remote_addr = %addr, error = %e, "TLS handshake failed"),
                Err(_) => debug!(remote_addr = %addr, "TLS handshake timed out"),
            }
        });
    }
}

// =============================================================================
// Serving
// =============================================================================

/// Serve `router` over plain HTTP until the listener fails.
pub async fn serve_http(listener: TcpListener, router: Router) -> Result<(), ListenError> {
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Serve `router` over TLS until the listener fails.
pub async fn serve_https(listener: TlsListener, router: Router) -> Result<(), ListenError> {
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<TlsConnectInfo>(),
    )
    .await?;
    Ok(())
}

async fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<TcpListener, ListenError> {
    let label = addr.to_string();
    TcpListener::bind(addr)
        .await
        .map_err(|source| ListenError::Bind { addr: label, source })
}

impl Caster {
    /// Accept plain HTTP connections on `addr`. Runs until the listener fails.
    pub async fn listen_http(
        self: Arc<Self>,
        addr: impl ToSocketAddrs + std::fmt::Display,
        config: RouterConfig,
    ) -> Result<(), ListenError> {
        let listener = bind(addr).await?;
        info!(addr = %listener.local_addr()?, "HTTP listener started");
        serve_http(listener, create_router(self, config)).await
    }

    /// Accept TLS connections on `addr` using a PEM certificate chain and key.
    ///
    /// The certificate pair is loaded before binding, so a bad pair fails
    /// without touching the port.
    pub async fn listen_https(
        self: Arc<Self>,
        addr: impl ToSocketAddrs + std::fmt::Display,
        cert_path: &Path,
        key_path: &Path,
        config: RouterConfig,
    ) -> Result<(), ListenError> {
        let tls_config = load_tls_config(cert_path, key_path)?;
        let tcp = bind(addr).await?;
        let listener = TlsListener::new(tcp, tls_config, self.timeout())?;
        info!(addr = %listener.local_addr, "HTTPS listener started");
        serve_https(listener, create_router(self, config)).await
    }
}

// =============================================================================
// Tests
// =============================================================================
