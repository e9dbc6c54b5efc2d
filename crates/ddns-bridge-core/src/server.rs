//! TLS server lifecycle
//!
//! [`BridgeServer`] owns the TLS listener and moves through
//! `Starting -> Serving -> Draining -> Stopped`:
//!
//! ```text
//!                  ┌─────────────────┐
//!   bind() ──────▶ │    Starting     │
//!                  └────────┬────────┘
//!                           │ accept loop spawned
//!                           ▼
//!                  ┌─────────────────┐   listener error
//!                  │     Serving     │ ─────────────────────┐
//!                  └────────┬────────┘                      │
//!                           │ shutdown future resolves      │
//!                           ▼                               │
//!                  ┌─────────────────┐                      │
//!                  │    Draining     │ ── deadline ──▶ abort│
//!                  └────────┬────────┘                      │
//!                           ▼                               ▼
//!                  ┌─────────────────────────────────────────┐
//!                  │                 Stopped                 │
//!                  └─────────────────────────────────────────┘
//! ```
//!
//! The accept loop runs on its own task while the caller's task waits for
//! either the shutdown future or a listener failure. A listener failure is
//! returned as-is with no drain phase, and open connections are aborted.

use crate::error::{Error, Result};
use async_trait::async_trait;
use axum::Router;
use axum::http::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a [`BridgeServer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Listener bound, not yet accepting
    Starting,
    /// Accepting connections and handling requests
    Serving,
    /// No new connections; in-flight requests may finish
    Draining,
    /// All connections closed
    Stopped,
}

/// How a requested shutdown ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every connection finished within the drain deadline
    Graceful,
    /// The deadline elapsed and remaining connections were closed
    Forced,
}

/// HTTPS server for the update endpoint
pub struct BridgeServer {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    router: Router,
    drain_timeout: Duration,
    state_tx: watch::Sender<ServerState>,
}

impl BridgeServer {
    /// Bind the TLS listener
    ///
    /// # Parameters
    ///
    /// - `addr`: Address to listen on
    /// - `tls`: Server TLS configuration
    /// - `router`: Routes served on every connection
    /// - `drain_timeout`: Deadline for in-flight requests on shutdown
    pub async fn bind(
        addr: SocketAddr,
        tls: Arc<rustls::ServerConfig>,
        router: Router,
        drain_timeout: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::server(format!("failed to bind {addr}: {e}")))?;

        let (state_tx, _) = watch::channel(ServerState::Starting);

        Ok(Self {
            listener,
            acceptor: TlsAcceptor::from(tls),
            router,
            drain_timeout,
            state_tx,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Watch lifecycle state changes
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state_tx.subscribe()
    }

    /// Serve until `shutdown` resolves or the listener fails
    ///
    /// # Returns
    ///
    /// - `Ok(ShutdownOutcome)`: Shutdown was requested and connections were
    ///   drained or, past the deadline, forcibly closed
    /// - `Err(Error)`: The listener failed
    pub async fn run_until<F>(self, shutdown: F) -> Result<ShutdownOutcome>
    where
        F: Future<Output = ()>,
    {
        let Self {
            listener,
            acceptor,
            router,
            drain_timeout,
            state_tx,
        } = self;

        serve(listener, acceptor, router, drain_timeout, state_tx, shutdown).await
    }
}

/// Source of accepted TCP connections
#[async_trait]
trait Accept: Send + Sync + 'static {
    async fn accept_connection(&self) -> io::Result<(TcpStream, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl Accept for TcpListener {
    async fn accept_connection(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.accept().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

async fn serve<L, F>(
    listener: L,
    acceptor: TlsAcceptor,
    router: Router,
    drain_timeout: Duration,
    state_tx: watch::Sender<ServerState>,
    shutdown: F,
) -> Result<ShutdownOutcome>
where
    L: Accept,
    F: Future<Output = ()>,
{
    let addr = listener.local_addr()?;
    let (stop_tx, stop_rx) = oneshot::channel();
    let mut accept_task = tokio::spawn(accept_loop(listener, acceptor, router, stop_rx));

    state_tx.send_replace(ServerState::Serving);
    info!("starting https server on {}", addr);

    tokio::select! {
        _ = shutdown => {}
        joined = &mut accept_task => {
            state_tx.send_replace(ServerState::Stopped);
            return Err(listener_failure(joined));
        }
    }

    info!("shutting down gracefully");
    state_tx.send_replace(ServerState::Draining);
    let _ = stop_tx.send(());

    let in_flight = match accept_task.await {
        Ok(Ok(in_flight)) => in_flight,
        joined => {
            state_tx.send_replace(ServerState::Stopped);
            return Err(listener_failure(joined));
        }
    };

    let outcome = in_flight.drain(drain_timeout).await;
    state_tx.send_replace(ServerState::Stopped);
    Ok(outcome)
}

/// Connections still open when the accept loop stops
struct InFlight {
    connections: JoinSet<()>,
    drain_tx: watch::Sender<bool>,
}

impl InFlight {
    async fn drain(mut self, deadline: Duration) -> ShutdownOutcome {
        self.drain_tx.send_replace(true);
        debug!(
            "Draining {} connection(s) for up to {:?}",
            self.connections.len(),
            deadline
        );

        let connections = &mut self.connections;
        let drained = tokio::time::timeout(deadline, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        match drained {
            Ok(()) => {
                info!("All connections drained");
                ShutdownOutcome::Graceful
            }
            Err(_) => {
                error!(
                    "shutting down forcefully: drain deadline of {:?} exceeded, closing {} connection(s)",
                    deadline,
                    self.connections.len()
                );
                self.connections.shutdown().await;
                ShutdownOutcome::Forced
            }
        }
    }
}

fn listener_failure<T>(joined: std::result::Result<Result<T>, tokio::task::JoinError>) -> Error {
    match joined {
        Ok(Ok(_)) => Error::server("listener stopped unexpectedly"),
        Ok(Err(e)) => e,
        Err(e) => Error::server(format!("listener task failed: {e}")),
    }
}

async fn accept_loop<L: Accept>(
    listener: L,
    acceptor: TlsAcceptor,
    router: Router,
    mut stop_rx: oneshot::Receiver<()>,
) -> Result<InFlight> {
    let (drain_tx, drain_rx) = watch::channel(false);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            accepted = listener.accept_connection() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        acceptor.clone(),
                        router.clone(),
                        drain_rx.clone(),
                    ));
                }
                Err(e) if is_transient(&e) => {
                    warn!("Transient accept error: {}", e);
                }
                Err(e) => {
                    return Err(Error::server(format!("accept failed: {e}")));
                }
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined
                    && e.is_panic()
                {
                    error!("Connection task panicked: {}", e);
                }
            }
        }
    }

    Ok(InFlight {
        connections,
        drain_tx,
    })
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    router: Router,
    drain_rx: watch::Receiver<bool>,
) {
    let tls_stream = match acceptor.accept(stream).await {
        Ok(tls_stream) => tls_stream,
        Err(e) => {
            debug!("TLS handshake with {} failed: {}", peer, e);
            return;
        }
    };

    let service = service_fn(move |request: Request<Incoming>| router.clone().oneshot(request));
    let conn = http1::Builder::new().serve_connection(TokioIo::new(tls_stream), service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!("Connection from {} closed with error: {}", peer, e);
            }
        }
        _ = draining(drain_rx) => {
            // Finish the request in progress, then close
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.as_mut().await {
                debug!("Connection from {} closed with error while draining: {}", peer, e);
            }
        }
    }
}

async fn draining(mut drain_rx: watch::Receiver<bool>) {
    let _ = drain_rx.wait_for(|draining| *draining).await;
}
