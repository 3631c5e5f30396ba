//! Embedded MQTT 3.1.1 broker with plain TCP and TLS listeners.
//!
//! The broker keeps subscriptions in a topic trie, stores retained
//! messages and handles QoS 0, 1 and 2 for network clients. In-process
//! code publishes and subscribes through the same [`Broker`] handle, with
//! [`Handler`]s called synchronously on the publishing task.
//!
//! ## Components
//!
//! - [`Broker`]: routing core and client sessions
//! - [`ListenerManager`]: named TCP/TLS listeners with observable state
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ccugw_mqttd::{Broker, BrokerConfig, Handler, ListenerConfig, ListenerManager, Message, QoS};
//!
//! #[tokio::main]
//! async fn main() -> ccugw_mqttd::Result<()> {
//!     let broker = Broker::new(BrokerConfig::new());
//!     let mut listeners = ListenerManager::new(broker.clone());
//!     listeners.start(vec![ListenerConfig::plain("plain", "127.0.0.1:1883")])?;
//!
//!     let printer: Arc<dyn Handler> = Arc::new(|msg: &Message| println!("{}: {:?}", msg.topic, msg.payload));
//!     broker.subscribe("device/status/#", QoS::AtLeastOnce, printer)?;
//!     broker.publish(Message::new("device/status/ABC/1/LEVEL", "0.5").with_retain(true))?;
//!
//!     listeners.stop().await;
//!     broker.close();
//!     Ok(())
//! }
//! ```

mod broker;
mod error;
pub mod listener;
pub mod protocol;
mod retained;
mod session;
pub mod tls;
pub mod topic;
pub mod trie;
mod types;

pub use broker::{Broker, BrokerBuilder, BrokerConfig};
pub use error::{Error, Result};
pub use listener::{ErrorSender, ListenerConfig, ListenerError, ListenerManager, ListenerState, Transport};
pub use retained::RetainedStore;
pub use types::{AllowAll, Authenticator, Handler, Message, QoS, StaticAuth};
