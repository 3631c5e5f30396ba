//! MQTT server: the embedded broker plus its listeners.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ccugw_mqttd::{
    Broker, BrokerConfig, ErrorSender, Handler, ListenerConfig, ListenerManager, ListenerState, Message, QoS,
    StaticAuth,
};
use parking_lot::Mutex;
use tracing::{Span, debug, info, info_span, trace};

use crate::codec;
use crate::config::MqttConfig;
use crate::error::{Error, Result};
use crate::pv::ProcessValue;

/// Name of the plain listener.
pub const LISTENER_PLAIN: &str = "mqtt";

/// Name of the TLS listener.
pub const LISTENER_TLS: &str = "mqtts";

/// Something values can be published to.
pub trait Publisher: Send + Sync {
    /// Publish one message. `qos` must be 0, 1 or 2.
    fn publish(&self, topic: &str, payload: Bytes, qos: u8, retain: bool) -> Result<()>;

    /// Encode and publish a process value.
    fn publish_pv(&self, topic: &str, pv: &ProcessValue, qos: u8, retain: bool) -> Result<()> {
        let payload = codec::encode(pv)?;
        self.publish(topic, payload, qos, retain)
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Plain listener address, `None` disables it.
    pub addr: Option<String>,
    /// TLS listener address, `None` disables it.
    pub addr_tls: Option<String>,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub broker: BrokerConfig,
    /// Accepted credentials; empty allows every client.
    pub users: Vec<(String, String)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerConfig {
    /// No listeners, default broker settings.
    pub fn new() -> Self {
        Self {
            addr: None,
            addr_tls: None,
            cert_file: PathBuf::new(),
            key_file: PathBuf::new(),
            broker: BrokerConfig::new(),
            users: Vec::new(),
        }
    }

    /// Enable the plain listener.
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    /// Enable the TLS listener.
    pub fn with_tls(
        mut self,
        addr: impl Into<String>,
        cert_file: impl Into<PathBuf>,
        key_file: impl Into<PathBuf>,
    ) -> Self {
        self.addr_tls = Some(addr.into());
        self.cert_file = cert_file.into();
        self.key_file = key_file.into();
        self
    }

    pub fn with_broker_config(mut self, broker: BrokerConfig) -> Self {
        self.broker = broker;
        self
    }

    /// Accept `username`/`password`. Once a user is added, clients without
    /// valid credentials are refused.
    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.push((username.into(), password.into()));
        self
    }

    fn listeners(&self) -> Vec<ListenerConfig> {
        let mut listeners = Vec::new();
        if let Some(addr) = &self.addr {
            listeners.push(ListenerConfig::plain(LISTENER_PLAIN, addr.clone()));
        }
        if let Some(addr) = &self.addr_tls {
            listeners.push(ListenerConfig::tls(
                LISTENER_TLS,
                addr.clone(),
                self.cert_file.clone(),
                self.key_file.clone(),
            ));
        }
        listeners
    }
}

impl From<&MqttConfig> for ServerConfig {
    fn from(config: &MqttConfig) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            addr: non_empty(&config.addr),
            addr_tls: non_empty(&config.addr_tls),
            cert_file: config.cert_file.clone(),
            key_file: config.key_file.clone(),
            broker: BrokerConfig::new()
                .max_packet_size(config.max_packet_size)
                .max_queued_messages(config.max_queued_messages)
                .connect_timeout(Duration::from_millis(config.connect_timeout_ms)),
            users: config
                .users
                .iter()
                .map(|u| (u.username.clone(), u.password.clone()))
                .collect(),
        }
    }
}

/// Embedded MQTT server.
///
/// The broker accepts local publishes from construction until
/// [`Server::stop`]; [`Server::start`] brings up the network listeners.
pub struct Server {
    config: ServerConfig,
    broker: Broker,
    listeners: Mutex<Option<Arc<ListenerManager>>>,
    errors: Option<ErrorSender>,
    span: Span,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_span(config, info_span!("mqtt-server"))
    }

    /// Create a server logging under `span`.
    pub fn with_span(config: ServerConfig, span: Span) -> Self {
        let mut builder = Broker::builder(config.broker.clone()).span(info_span!(parent: &span, "broker"));
        if !config.users.is_empty() {
            let auth = config
                .users
                .iter()
                .fold(StaticAuth::new(), |auth, (user, pass)| auth.with_user(user.as_str(), pass.as_bytes()));
            builder = builder.authenticator(Arc::new(auth));
        }
        Self {
            broker: builder.build(),
            config,
            listeners: Mutex::new(None),
            errors: None,
            span,
        }
    }

    /// Report listener failures on `tx`.
    pub fn with_error_channel(mut self, tx: ErrorSender) -> Self {
        self.errors = Some(tx);
        self
    }

    /// Underlying broker.
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Start the configured listeners without waiting for them to bind.
    pub fn start(&self) -> Result<()> {
        let mut slot = self.listeners.lock();
        if slot.is_some() {
            return Err(Error::Listener(ccugw_mqttd::Error::AlreadyRunning));
        }
        if !self.broker.is_running() {
            return Err(Error::Listener(ccugw_mqttd::Error::NotRunning));
        }

        let mut manager =
            ListenerManager::new(self.broker.clone()).with_span(info_span!(parent: &self.span, "listeners"));
        if let Some(tx) = &self.errors {
            manager = manager.with_error_channel(tx.clone());
        }
        let configs = self.config.listeners();
        for config in &configs {
            info!(parent: &self.span, "starting listener {} on address {}", config.name, config.addr);
        }
        manager.start(configs).map_err(Error::Listener)?;
        *slot = Some(Arc::new(manager));
        Ok(())
    }

    /// Close the broker and wait until every listener and connection task
    /// has exited.
    pub async fn stop(&self) {
        debug!(parent: &self.span, "stopping MQTT server");
        self.broker.close();
        let manager = self.listeners.lock().clone();
        if let Some(manager) = manager {
            manager.stop().await;
        }
        debug!(parent: &self.span, "MQTT server stopped");
    }

    /// State of a listener, `None` before start or for unknown names.
    pub fn listener_state(&self, name: &str) -> Option<ListenerState> {
        self.manager()?.state(name)
    }

    /// Wait for a listener state; see [`ListenerManager::wait_for`].
    pub async fn wait_for_listener<F>(&self, name: &str, pred: F) -> Option<ListenerState>
    where
        F: Fn(ListenerState) -> bool,
    {
        let manager = self.manager()?;
        manager.wait_for(name, pred).await
    }

    /// Reports whether listeners were started and every one of them has
    /// failed, leaving nothing to accept network clients.
    pub fn all_listeners_failed(&self) -> bool {
        let Some(manager) = self.manager() else {
            return false;
        };
        let states: Vec<ListenerState> = [LISTENER_PLAIN, LISTENER_TLS]
            .into_iter()
            .filter_map(|name| manager.state(name))
            .collect();
        !states.is_empty() && states.iter().all(|s| *s == ListenerState::Failed)
    }

    /// Bound address of a running listener.
    pub fn local_addr(&self, name: &str) -> Option<SocketAddr> {
        self.manager()?.local_addr(name)
    }

    /// Register a local handler.
    pub fn subscribe(&self, filter: &str, qos: u8, handler: Arc<dyn Handler>) -> Result<()> {
        let qos = QoS::try_from(qos).map_err(Error::Broker)?;
        self.broker.subscribe(filter, qos, handler).map_err(Error::Broker)
    }

    /// Remove a local handler. Returns whether it was subscribed.
    pub fn unsubscribe(&self, filter: &str, handler: &Arc<dyn Handler>) -> Result<bool> {
        self.broker.unsubscribe(filter, handler).map_err(Error::Broker)
    }

    fn manager(&self) -> Option<Arc<ListenerManager>> {
        self.listeners.lock().clone()
    }
}

impl Publisher for Server {
    fn publish(&self, topic: &str, payload: Bytes, qos: u8, retain: bool) -> Result<()> {
        trace!(parent: &self.span, "publishing {}: {}", topic, String::from_utf8_lossy(&payload));
        let qos = QoS::try_from(qos).map_err(Error::Publish)?;
        let msg = Message::new(topic, payload).with_qos(qos).with_retain(retain);
        self.broker.publish(msg).map_err(Error::Publish)
    }
}
