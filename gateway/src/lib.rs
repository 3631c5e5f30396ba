//! Gateway between a home-automation controller and MQTT.
//!
//! Value-change notifications from the controller run through a
//! [`HandlerChain`]; the [`MqttTranslator`] link publishes them on the
//! embedded broker as `device/status/{serial}/{channel}/{parameter}` with
//! a QoS/retain decision from the [`PublishPolicy`]. Client writes on
//! `.../set/...` topics are decoded and handed to a [`ValueWriter`] by the
//! [`SetDispatcher`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ccugw::{HandlerChain, LogSink, MqttTranslator, Notification, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> ccugw::Result<()> {
//!     let server = Arc::new(Server::new(ServerConfig::new().with_addr("0.0.0.0:1883")));
//!     server.start()?;
//!
//!     let chain = HandlerChain::new()
//!         .with(Arc::new(MqttTranslator::new(server.clone())))
//!         .with(Arc::new(LogSink));
//!     let _ = chain.dispatch(&Notification::event("BidCos-RF", "ABC123:1", "LEVEL", 42.5));
//!
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

pub mod chain;
pub mod codec;
pub mod config;
mod error;
pub mod event;
pub mod policy;
pub mod pv;
pub mod server;
pub mod set;
pub mod topic;
pub mod translator;

pub use chain::{DispatchError, HandlerChain, LogSink, NotificationHandler};
pub use codec::{Tier, decode, decode_tiered, encode};
pub use config::{GatewayConfig, MqttConfig, PolicyConfig, UserConfig};
pub use error::{Error, Result};
pub use event::{DeviceDescription, Notification};
pub use policy::{PublishDecision, PublishPolicy, resolve_publish_decision};
pub use pv::{ProcessValue, Status, Value};
pub use server::{LISTENER_PLAIN, LISTENER_TLS, Publisher, Server, ServerConfig};
pub use set::{SET_FILTERS, SetDispatcher, SetRequest, ValueWriter, WriteError};
pub use topic::{Category, DeviceAddress, Service, Target, Topic, build_topic};
pub use translator::MqttTranslator;
