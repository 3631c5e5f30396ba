//! Common types for the broker.

use std::collections::HashMap;

use bytes::Bytes;
use rumqttc::mqttbytes::QoS as WireQoS;

use crate::error::Error;

/// Delivery guarantee of a message or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce]
            .get(usize::from(v))
            .copied()
            .ok_or(Error::InvalidQoS(v))
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos as u8
    }
}

impl From<QoS> for WireQoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => WireQoS::AtMostOnce,
            QoS::AtLeastOnce => WireQoS::AtLeastOnce,
            QoS::ExactlyOnce => WireQoS::ExactlyOnce,
        }
    }
}

impl From<WireQoS> for QoS {
    fn from(qos: WireQoS) -> Self {
        match qos {
            WireQoS::AtMostOnce => QoS::AtMostOnce,
            WireQoS::AtLeastOnce => QoS::AtLeastOnce,
            WireQoS::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// A publication as the broker routes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl Message {
    /// QoS 0, not retained.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Payload as UTF-8, `None` if it is not valid text.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Decides who may connect and, once connected, which topics a client may
/// touch.
pub trait Authenticator: Send + Sync {
    /// Checked once per CONNECT. `username` is empty and `password` is
    /// empty when the client sent no credentials.
    fn authenticate(&self, client_id: &str, username: &str, password: &[u8]) -> bool;

    /// Checked per publish (`write`) and per subscription filter
    /// (`!write`). Everything is allowed unless overridden.
    fn acl(&self, _client_id: &str, _topic: &str, _write: bool) -> bool {
        true
    }
}

/// Accepts every client.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Authenticator for AllowAll {
    fn authenticate(&self, _client_id: &str, _username: &str, _password: &[u8]) -> bool {
        true
    }
}

/// Username/password table. Every authenticated client may publish and
/// subscribe to every topic.
#[derive(Debug, Default, Clone)]
pub struct StaticAuth {
    users: HashMap<String, Vec<u8>>,
}

impl StaticAuth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user.
    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<Vec<u8>>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }
}

impl Authenticator for StaticAuth {
    fn authenticate(&self, _client_id: &str, username: &str, password: &[u8]) -> bool {
        self.users
            .get(username)
            .is_some_and(|expected| expected.as_slice() == password)
    }
}

/// In-process subscriber callback.
///
/// Handlers are invoked synchronously on the publishing task, outside of
/// any broker lock, so they may call back into the broker.
pub trait Handler: Send + Sync {
    /// Handle a message matching the handler's subscription.
    fn handle(&self, msg: &Message);
}

impl<F> Handler for F
where
    F: Fn(&Message) + Send + Sync,
{
    fn handle(&self, msg: &Message) {
        self(msg)
    }
}
