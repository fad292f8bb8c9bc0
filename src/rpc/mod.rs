//! RPC server lifecycle.
//!
//! Owns the stopped/running state machine, the bound listener, and the
//! background accept loop. Every accepted connection is answered with a
//! fixed `501 Not Implemented`; request routing does not exist yet.
//!
//! ## Architecture
//!
//! - `transport`: URI prefix parsing, listener binding, and the accept loop
//! - `log_channel`: severity-tagged events delivered to registered observers
//!
//! ## Extensibility
//!
//! The architecture supports future enhancements:
//! - Middleware: per-connection handling can grow a request pipeline
//! - Dispatch: a method handler can replace the fixed 501 response

mod log_channel;
mod transport;

use std::net::SocketAddr;

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

pub use log_channel::{LogChannel, LogEvent, LogSeverity};

use transport::UriPrefix;

/// Errors surfaced by the server lifecycle API.
///
/// Per-connection faults never appear here; they are absorbed by the accept
/// loop and reported through the log channel.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The URI prefix could not be parsed.
    #[error("invalid URI prefix `{prefix}`: {reason}")]
    InvalidPrefix {
        prefix: String,
        reason: &'static str,
    },
    /// The listening address could not be acquired.
    #[error("failed to bind {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    /// `start` was called while the server was already running.
    #[error("server is already running")]
    AlreadyRunning,
}

/// Lifecycle state of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Running,
}

/// Receives and responds to RPCs.
///
/// Constructed bound to a URI prefix; [`start`](RpcServer::start) binds the
/// listener and launches the accept loop, [`stop`](RpcServer::stop) tears it
/// down. A stopped server may be started again.
pub struct RpcServer {
    prefix: UriPrefix,
    log_channel: LogChannel,
    inner: Mutex<Inner>,
}

/// State shared between `start`/`stop` callers.
///
/// Only `start` and `stop` mutate this; the accept loop never touches it and
/// observes shutdown through the broadcast channel instead.
struct Inner {
    state: ServerState,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    accept_task: Option<JoinHandle<()>>,
}

impl RpcServer {
    /// Create a new server bound to the given URI prefix.
    ///
    /// The prefix follows the `http://host:port/` convention; `+` or `*` as
    /// the host binds the unspecified address. The address is not acquired
    /// until [`start`](RpcServer::start).
    pub fn new(uri_prefix: &str) -> Result<Self, ServerError> {
        let prefix = UriPrefix::parse(uri_prefix)?;

        Ok(Self {
            prefix,
            log_channel: LogChannel::new(),
            inner: Mutex::new(Inner {
                state: ServerState::Stopped,
                local_addr: None,
                shutdown_tx: None,
                accept_task: None,
            }),
        })
    }

    /// Register an observer invoked synchronously, in the emitting context,
    /// for every log event the server produces.
    pub fn on_log_event(&self, observer: impl Fn(&LogEvent) + Send + Sync + 'static) {
        self.log_channel.subscribe(observer);
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ServerState {
        self.inner.lock().await.state
    }

    /// The bound local address while running, `None` when stopped.
    ///
    /// Useful with a port-0 prefix, where the kernel picks the port.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().await.local_addr
    }

    /// Start the RPC server.
    ///
    /// Binds the listener, emits the started event, and launches the accept
    /// loop on a background task. Returns once the loop is launched; it does
    /// not block for incoming connections.
    ///
    /// # Errors
    ///
    /// [`ServerError::AlreadyRunning`] if the server is already running,
    /// [`ServerError::Bind`] if the listening address cannot be acquired.
    pub async fn start(&self) -> Result<(), ServerError> {
        let mut inner = self.inner.lock().await;
        if inner.state == ServerState::Running {
            return Err(ServerError::AlreadyRunning);
        }

        let listener = self.prefix.bind().await?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: self.prefix.authority().to_string(),
            source,
        })?;

        // Emitted before the loop is spawned so the started event always
        // precedes per-connection events.
        self.log_channel
            .emit(LogSeverity::Information, "RPC server started.");

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let channel = self.log_channel.clone();
        let accept_task = tokio::spawn(transport::accept_loop(listener, channel, shutdown_rx));

        inner.state = ServerState::Running;
        inner.local_addr = Some(local_addr);
        inner.shutdown_tx = Some(shutdown_tx);
        inner.accept_task = Some(accept_task);

        Ok(())
    }

    /// Stop the RPC server.
    ///
    /// Signals the accept loop, then waits for it to exit; once this returns
    /// the listener is closed and no further connections are accepted. The
    /// loop emits the stopped event as it exits, exactly once per cycle.
    /// Stopping an already stopped server is a no-op.
    pub async fn stop(&self) {
        let (shutdown_tx, accept_task) = {
            let mut inner = self.inner.lock().await;
            if inner.state == ServerState::Stopped {
                return;
            }

            inner.state = ServerState::Stopped;
            inner.local_addr = None;
            (inner.shutdown_tx.take(), inner.accept_task.take())
        };

        if let Some(shutdown_tx) = shutdown_tx {
            let _ = shutdown_tx.send(());
        }
        if let Some(accept_task) = accept_task {
            let _ = accept_task.await;
        }
    }
}
