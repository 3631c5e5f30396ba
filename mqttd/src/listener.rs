//! Network listeners feeding the broker.
//!
//! A [`ListenerManager`] runs any number of named listeners, plain TCP or
//! TLS, against one [`Broker`]. Each listener runs in its own task and
//! moves through [`ListenerState`]s that callers can observe. A listener
//! that fails to start or dies later does not affect the others; its error
//! is reported on the optional error channel.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::broker::Broker;
use crate::error::{Error, Result};
use crate::tls;

/// Time a TLS client has to complete the handshake.
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest pause after a transient accept error.
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Transport of a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Plain TCP.
    Plain,
    /// TLS over TCP with a PEM certificate chain and private key.
    Tls { cert_file: PathBuf, key_file: PathBuf },
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Name used in logs, state queries and error reports.
    pub name: String,
    /// Address to bind, e.g. "0.0.0.0:1883".
    pub addr: String,
    pub transport: Transport,
}

impl ListenerConfig {
    /// Plain TCP listener.
    pub fn plain(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            transport: Transport::Plain,
        }
    }

    /// TLS listener.
    pub fn tls(
        name: impl Into<String>,
        addr: impl Into<String>,
        cert_file: impl Into<PathBuf>,
        key_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            transport: Transport::Tls {
                cert_file: cert_file.into(),
                key_file: key_file.into(),
            },
        }
    }
}

/// Lifecycle state of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl ListenerState {
    /// Reports whether the listener task has finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, ListenerState::Stopped | ListenerState::Failed)
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ListenerState::Created => "created",
            ListenerState::Starting => "starting",
            ListenerState::Running => "running",
            ListenerState::Stopping => "stopping",
            ListenerState::Stopped => "stopped",
            ListenerState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A listener failure, tagged with the listener's name.
#[derive(Debug, thiserror::Error)]
#[error("listener {listener}: {error}")]
pub struct ListenerError {
    pub listener: String,
    #[source]
    pub error: Error,
}

/// Sending half of the listener error channel.
pub type ErrorSender = mpsc::UnboundedSender<ListenerError>;

/// Runs named listeners for one broker.
pub struct ListenerManager {
    broker: Broker,
    errors: Option<ErrorSender>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    states: HashMap<String, watch::Receiver<ListenerState>>,
    bound: Arc<Mutex<HashMap<String, SocketAddr>>>,
    span: Span,
}

impl ListenerManager {
    /// Create a manager. Listeners stop when the broker closes or when
    /// [`ListenerManager::stop`] is called.
    pub fn new(broker: Broker) -> Self {
        let shutdown = broker.shutdown_token().child_token();
        Self {
            broker,
            errors: None,
            shutdown,
            tracker: TaskTracker::new(),
            states: HashMap::new(),
            bound: Arc::new(Mutex::new(HashMap::new())),
            span: info_span!("mqtt-listeners"),
        }
    }

    /// Report listener failures on `tx`.
    pub fn with_error_channel(mut self, tx: ErrorSender) -> Self {
        self.errors = Some(tx);
        self
    }

    /// Set the span listeners log under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Start every configured listener in its own task.
    ///
    /// Returns as soon as the tasks are spawned; use
    /// [`ListenerManager::state`] or [`ListenerManager::wait_for`] to learn
    /// whether a listener came up. Fails only for an unusable
    /// configuration, in which case nothing is started.
    pub fn start(&mut self, configs: Vec<ListenerConfig>) -> Result<()> {
        if !self.states.is_empty() || self.tracker.is_closed() {
            return Err(Error::AlreadyRunning);
        }
        let mut names = std::collections::HashSet::new();
        for config in &configs {
            if config.name.is_empty() || !names.insert(config.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "listener name {:?} is empty or repeated",
                    config.name
                )));
            }
        }

        for config in configs {
            let (state_tx, state_rx) = watch::channel(ListenerState::Created);
            self.states.insert(config.name.clone(), state_rx);

            let task = ListenerTask {
                span: info_span!(parent: &self.span, "listener", name = %config.name),
                config,
                broker: self.broker.clone(),
                shutdown: self.shutdown.clone(),
                tracker: self.tracker.clone(),
                state: state_tx,
                errors: self.errors.clone(),
                bound: Arc::clone(&self.bound),
            };
            let span = task.span.clone();
            self.tracker.spawn(task.run().instrument(span));
        }
        Ok(())
    }

    /// Current state of a listener.
    pub fn state(&self, name: &str) -> Option<ListenerState> {
        self.states.get(name).map(|rx| *rx.borrow())
    }

    /// Wait until a listener's state satisfies `pred` and return it.
    ///
    /// Returns the last state if the listener task ends first, or `None`
    /// for an unknown name.
    pub async fn wait_for<F>(&self, name: &str, pred: F) -> Option<ListenerState>
    where
        F: Fn(ListenerState) -> bool,
    {
        let mut rx = self.states.get(name)?.clone();
        let reached = rx.wait_for(|s| pred(*s)).await.map(|s| *s).ok();
        Some(reached.unwrap_or_else(|| *rx.borrow()))
    }

    /// Address a listener is bound to once running.
    pub fn local_addr(&self, name: &str) -> Option<SocketAddr> {
        self.bound.lock().get(name).copied()
    }

    /// Stop every listener and wait for the listener and connection tasks
    /// to exit. Calling it again is a no-op.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        debug!(parent: &self.span, "all listeners stopped");
    }
}

struct ListenerTask {
    config: ListenerConfig,
    broker: Broker,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    state: watch::Sender<ListenerState>,
    errors: Option<ErrorSender>,
    bound: Arc<Mutex<HashMap<String, SocketAddr>>>,
    span: Span,
}

impl ListenerTask {
    async fn run(self) {
        self.state.send_replace(ListenerState::Starting);

        let acceptor = match &self.config.transport {
            Transport::Plain => None,
            Transport::Tls { cert_file, key_file } => match tls::load_acceptor(cert_file, key_file) {
                Ok(acceptor) => Some(acceptor),
                Err(e) => return self.fail(e),
            },
        };

        let listener = match TcpListener::bind(&self.config.addr).await {
            Ok(listener) => listener,
            Err(source) => {
                return self.fail(Error::Bind {
                    listener: self.config.name.clone(),
                    addr: self.config.addr.clone(),
                    source,
                });
            }
        };
        let local = listener.local_addr().ok();
        if let Some(addr) = local {
            self.bound.lock().insert(self.config.name.clone(), addr);
        }

        self.state.send_replace(ListenerState::Running);
        info!(
            "listening on {} ({})",
            local.map_or_else(|| self.config.addr.clone(), |a| a.to_string()),
            if acceptor.is_some() { "tls" } else { "tcp" }
        );

        match self.accept_loop(&listener, acceptor).await {
            Ok(()) => {
                self.state.send_replace(ListenerState::Stopping);
                drop(listener);
                self.state.send_replace(ListenerState::Stopped);
                info!("stopped");
            }
            Err(e) => self.fail(e),
        }
    }

    async fn accept_loop(&self, listener: &TcpListener, acceptor: Option<TlsAcceptor>) -> Result<()> {
        let mut backoff = Duration::ZERO;
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(conn) => {
                    backoff = Duration::ZERO;
                    conn
                }
                Err(e) if is_transient(&e) => {
                    backoff = (backoff * 2).clamp(Duration::from_millis(5), MAX_ACCEPT_BACKOFF);
                    warn!("accept failed: {}; retrying in {:?}", e, backoff);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    continue;
                }
                Err(e) => return Err(Error::Io(e)),
            };
            debug!("accepted connection from {}", peer);

            let broker = self.broker.clone();
            let shutdown = self.shutdown.clone();
            let acceptor = acceptor.clone();
            self.tracker.spawn(
                async move {
                    let result = match acceptor {
                        None => broker.serve_connection(stream, peer, shutdown).await,
                        Some(acceptor) => {
                            let handshake = tokio::select! {
                                _ = shutdown.cancelled() => return,
                                r = tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream)) => r,
                            };
                            match handshake {
                                Ok(Ok(tls_stream)) => broker.serve_connection(tls_stream, peer, shutdown).await,
                                Ok(Err(e)) => Err(Error::Tls(e.to_string())),
                                Err(_) => Err(Error::Timeout("tls handshake".to_string())),
                            }
                        }
                    };
                    if let Err(e) = result {
                        debug!("connection from {} ended: {}", peer, e);
                    }
                }
                .in_current_span(),
            );
        }
    }

    fn fail(&self, error: Error) {
        self.state.send_replace(ListenerState::Failed);
        error!("listener failed: {}", error);
        if let Some(tx) = &self.errors {
            let report = ListenerError {
                listener: self.config.name.clone(),
                error,
            };
            if tx.send(report).is_err() {
                debug!("listener error channel closed");
            }
        }
    }
}

/// Accept errors that leave the listening socket usable.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || e.raw_os_error().is_some_and(|code| code == 23 || code == 24) // ENFILE, EMFILE
}
