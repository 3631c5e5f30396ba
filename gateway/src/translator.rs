//! Publishes controller value changes to MQTT.

use std::sync::Arc;

use tracing::{Span, error, info_span, trace};

use crate::chain::NotificationHandler;
use crate::error::Result;
use crate::event::Notification;
use crate::policy::PublishPolicy;
use crate::pv::{ProcessValue, Value};
use crate::server::Publisher;
use crate::topic::build_topic;

/// Chain handler turning value-change events into retained or transient
/// status publications. Other notifications pass through untouched.
pub struct MqttTranslator {
    publisher: Arc<dyn Publisher>,
    policy: PublishPolicy,
    span: Span,
}

impl MqttTranslator {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            publisher,
            policy: PublishPolicy::default(),
            span: info_span!("mqtt-translator"),
        }
    }

    pub fn with_policy(mut self, policy: PublishPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the span failures are logged under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Publish one value change on `device/status/{serial}/{channel}/{key}`.
    pub fn publish_event(&self, address: &str, value_key: &str, value: &Value) -> Result<()> {
        let topic = build_topic(address, value_key)?.to_string();
        let pv = ProcessValue::now(value.clone());
        let decision = self.policy.decide(value_key);
        trace!(parent: &self.span, "event {} -> {} {:?}", address, topic, decision);
        self.publisher
            .publish_pv(&topic, &pv, decision.qos.into(), decision.retain)
    }
}

impl NotificationHandler for MqttTranslator {
    /// Malformed addresses are returned to the caller. Publish and encoding
    /// failures are logged and swallowed.
    fn handle(&self, notification: &Notification) -> Result<()> {
        let Notification::Event {
            address,
            value_key,
            value,
            ..
        } = notification
        else {
            return Ok(());
        };

        match self.publish_event(address, value_key, value) {
            Err(e) if e.is_publish_error() => {
                error!(parent: &self.span, "publish of event failed: {}", e);
                Ok(())
            }
            other => other,
        }
    }
}
