//! MQTT 3.1.1 broker core.
//!
//! The broker owns the subscription trie, the retained store and the table
//! of connected clients. Network clients reach it through
//! [`Broker::serve_connection`], which the listener manager calls for every
//! accepted stream; in-process callers use [`Broker::publish`],
//! [`Broker::subscribe`] and [`Broker::unsubscribe`].
//!
//! All shared state sits behind `parking_lot` locks that are never held
//! across an await point or while a handler runs.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::MAX_PACKET_SIZE;
use crate::retained::RetainedStore;
use crate::session;
use crate::topic::{validate_filter, validate_topic};
use crate::trie::Trie;
use crate::types::{AllowAll, Authenticator, Handler, Message, QoS};

/// Default per-client outbound queue length.
pub const DEFAULT_MAX_QUEUED_MESSAGES: usize = 1000;

/// Default time a new connection has to send CONNECT.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Maximum packet size.
    pub max_packet_size: usize,
    /// Maximum number of messages queued per client before dropping.
    pub max_queued_messages: usize,
    /// Time a new connection has to send CONNECT.
    pub connect_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerConfig {
    /// Create a broker config with defaults.
    pub fn new() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
            max_queued_messages: DEFAULT_MAX_QUEUED_MESSAGES,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the maximum packet size.
    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Set the per-client outbound queue length.
    pub fn max_queued_messages(mut self, n: usize) -> Self {
        self.max_queued_messages = n.max(1);
        self
    }

    /// Set the CONNECT timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Builder for Broker.
pub struct BrokerBuilder {
    config: BrokerConfig,
    authenticator: Option<Arc<dyn Authenticator>>,
    span: Option<Span>,
}

impl BrokerBuilder {
    /// Create a new broker builder.
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            authenticator: None,
            span: None,
        }
    }

    /// Set the authenticator.
    pub fn authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(auth);
        self
    }

    /// Set the span the broker logs under.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Build the broker. The broker accepts publishes right away.
    pub fn build(self) -> Broker {
        Broker {
            inner: Arc::new(Inner {
                config: self.config,
                authenticator: self.authenticator.unwrap_or_else(|| Arc::new(AllowAll)),
                subscriptions: RwLock::new(Trie::new()),
                retained: RwLock::new(RetainedStore::new()),
                clients: RwLock::new(HashMap::new()),
                running: AtomicBool::new(true),
                shutdown: CancellationToken::new(),
                span: self.span.unwrap_or_else(|| info_span!("mqtt-broker")),
            }),
        }
    }
}

/// A subscription stored in the trie.
#[derive(Clone)]
pub(crate) enum Subscriber {
    Client {
        client_id: Arc<str>,
        tx: mpsc::Sender<Message>,
        qos: QoS,
    },
    Local {
        handler: Arc<dyn Handler>,
        qos: QoS,
    },
}

/// Connected client entry.
pub(crate) struct ClientEntry {
    pub(crate) tx: mpsc::Sender<Message>,
    pub(crate) cancel: CancellationToken,
}

pub(crate) struct Inner {
    pub(crate) config: BrokerConfig,
    pub(crate) authenticator: Arc<dyn Authenticator>,
    pub(crate) subscriptions: RwLock<Trie<Subscriber>>,
    pub(crate) retained: RwLock<RetainedStore>,
    pub(crate) clients: RwLock<HashMap<String, ClientEntry>>,
    running: AtomicBool,
    pub(crate) shutdown: CancellationToken,
    pub(crate) span: Span,
}

/// MQTT broker handle. Cloning is cheap; all clones share one broker.
#[derive(Clone)]
pub struct Broker {
    pub(crate) inner: Arc<Inner>,
}

impl Broker {
    /// Create a new broker with the given config.
    pub fn new(config: BrokerConfig) -> Self {
        BrokerBuilder::new(config).build()
    }

    /// Create a builder for this broker.
    pub fn builder(config: BrokerConfig) -> BrokerBuilder {
        BrokerBuilder::new(config)
    }

    /// Broker configuration.
    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Check if the broker is running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Stop accepting publishes and close every client session.
    pub fn close(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            let _enter = self.inner.span.enter();
            debug!("closing broker");
            self.inner.shutdown.cancel();
        }
    }

    /// Token cancelled when the broker closes.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.inner.clients.read().len()
    }

    /// Retained message for an exact topic.
    pub fn retained(&self, topic: &str) -> Option<Message> {
        self.inner.retained.read().get(topic).cloned()
    }

    /// Publish a message from inside the process.
    ///
    /// Matching subscribers receive the message asynchronously (network
    /// clients) or before this call returns (local handlers).
    pub fn publish(&self, msg: Message) -> Result<()> {
        if !self.is_running() {
            return Err(Error::NotRunning);
        }
        validate_topic(&msg.topic)?;
        let _enter = self.inner.span.enter();
        trace!("publishing {}: {:?}", msg.topic, String::from_utf8_lossy(&msg.payload));
        self.route(&msg);
        Ok(())
    }

    /// Register a local handler for `filter`.
    ///
    /// Retained messages matching the filter are handed to the handler
    /// before this call returns. Subscribing the same handler to the same
    /// filter again replaces the granted QoS.
    pub fn subscribe(&self, filter: &str, qos: QoS, handler: Arc<dyn Handler>) -> Result<()> {
        if !self.is_running() {
            return Err(Error::NotRunning);
        }
        let subscriber = Subscriber::Local {
            handler: Arc::clone(&handler),
            qos,
        };
        self.inner
            .subscriptions
            .write()
            .replace(filter, subscriber, |s| match s {
                Subscriber::Local { handler: h, .. } => same_handler(h, &handler),
                Subscriber::Client { .. } => false,
            })?;
        debug!(parent: &self.inner.span, "local handler subscribed to {}", filter);

        let retained = self.inner.retained.read().matching(filter);
        for msg in retained {
            let qos = msg.qos.min(qos);
            handler.handle(&msg.with_qos(qos).with_retain(true));
        }
        Ok(())
    }

    /// Remove a local handler from `filter`. Returns whether it was
    /// subscribed.
    pub fn unsubscribe(&self, filter: &str, handler: &Arc<dyn Handler>) -> Result<bool> {
        validate_filter(filter)?;
        let removed = self.inner.subscriptions.write().remove(filter, |s| match s {
            Subscriber::Local { handler: h, .. } => same_handler(h, handler),
            Subscriber::Client { .. } => false,
        });
        debug!(parent: &self.inner.span, "local handler unsubscribed from {}", filter);
        Ok(removed > 0)
    }

    /// Serve one client connection until it disconnects, fails, `shutdown`
    /// is cancelled or the broker closes.
    ///
    /// A session ended by `shutdown` runs its cleanup and publishes its last
    /// will like any other abnormal exit.
    pub async fn serve_connection<S>(&self, stream: S, peer: SocketAddr, shutdown: CancellationToken) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let span = info_span!(parent: &self.inner.span, "conn", %peer);
        session::serve(self, stream, peer, shutdown).instrument(span).await
    }

    /// Store (if retained) and fan out a message. Locks are released before
    /// any subscriber is called.
    pub(crate) fn route(&self, msg: &Message) {
        if msg.retain {
            self.inner.retained.write().apply(msg);
        }

        let targets: Vec<Subscriber> = self
            .inner
            .subscriptions
            .read()
            .matches(&msg.topic)
            .into_iter()
            .cloned()
            .collect();

        // one copy per subscriber, at the highest granted QoS
        let mut clients: HashMap<Arc<str>, (mpsc::Sender<Message>, QoS)> = HashMap::new();
        let mut locals: Vec<(Arc<dyn Handler>, QoS)> = Vec::new();
        for target in targets {
            match target {
                Subscriber::Client { client_id, tx, qos } => {
                    let entry = clients.entry(client_id).or_insert((tx, qos));
                    entry.1 = entry.1.max(qos);
                }
                Subscriber::Local { handler, qos } => {
                    match locals.iter_mut().find(|(h, _)| same_handler(h, &handler)) {
                        Some(entry) => entry.1 = entry.1.max(qos),
                        None => locals.push((handler, qos)),
                    }
                }
            }
        }

        let live = msg.clone().with_retain(false);
        for (client_id, (tx, granted)) in clients {
            let out = live.clone().with_qos(live.qos.min(granted));
            match tx.try_send(out) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(parent: &self.inner.span, "queue of client {} full, dropping message for {}", client_id, msg.topic);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(parent: &self.inner.span, "client {} gone, dropping message for {}", client_id, msg.topic);
                }
            }
        }
        for (handler, granted) in locals {
            handler.handle(&live.clone().with_qos(live.qos.min(granted)));
        }
    }

    /// Register a connected client, closing any session holding the same
    /// client id.
    pub(crate) fn register_client(&self, client_id: &str, entry: ClientEntry) {
        let previous = self.inner.clients.write().insert(client_id.to_string(), entry);
        if let Some(previous) = previous {
            info!(parent: &self.inner.span, "client {} taken over by a new connection", client_id);
            previous.cancel.cancel();
        }
    }

    /// Remove a client and all subscriptions made through `tx`.
    ///
    /// The client table entry is only removed if it still belongs to this
    /// session; a newer connection with the same id keeps its entry.
    pub(crate) fn cleanup_client<'a, I>(&self, client_id: &str, tx: &mpsc::Sender<Message>, filters: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        {
            let mut clients = self.inner.clients.write();
            if clients.get(client_id).is_some_and(|e| e.tx.same_channel(tx)) {
                clients.remove(client_id);
            }
        }

        let mut subs = self.inner.subscriptions.write();
        let mut count = 0;
        for filter in filters {
            count += subs.remove(filter, |s| matches!(s, Subscriber::Client { tx: t, .. } if t.same_channel(tx)));
        }
        debug!(parent: &self.inner.span, "cleaned up {} subscriptions for client {}", count, client_id);
    }
}

/// Compare handler identity by data pointer.
fn same_handler(a: &Arc<dyn Handler>, b: &Arc<dyn Handler>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
