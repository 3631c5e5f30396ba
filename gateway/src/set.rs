//! Dispatch of client write requests (`.../set/...` topics).

use std::sync::Arc;

use ccugw_mqttd::{Handler, Message};
use tracing::{Span, debug, info_span, warn};

use crate::codec;
use crate::error::Result;
use crate::pv::ProcessValue;
use crate::server::Server;
use crate::topic::{Service, Target, Topic};

/// Filters the dispatcher subscribes to.
pub const SET_FILTERS: [&str; 3] = ["device/set/#", "sysvar/set/+", "program/set/+"];

/// Error type returned by value writers.
pub type WriteError = Box<dyn std::error::Error + Send + Sync>;

/// A decoded write request.
#[derive(Debug, Clone, PartialEq)]
pub struct SetRequest {
    pub target: Target,
    pub pv: ProcessValue,
}

/// Executes write requests against the controller.
pub trait ValueWriter: Send + Sync {
    fn write(&self, request: SetRequest) -> std::result::Result<(), WriteError>;
}

/// Broker handler forwarding set messages to a [`ValueWriter`].
pub struct SetDispatcher {
    writer: Arc<dyn ValueWriter>,
    span: Span,
}

impl SetDispatcher {
    pub fn new(writer: Arc<dyn ValueWriter>) -> Self {
        Self {
            writer,
            span: info_span!("mqtt-set"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Subscribe the dispatcher to every set filter at QoS 2.
    pub fn subscribe(self: Arc<Self>, server: &Server) -> Result<()> {
        let handler: Arc<dyn Handler> = self;
        for filter in SET_FILTERS {
            server.subscribe(filter, 2, Arc::clone(&handler))?;
        }
        Ok(())
    }

    /// Parse a set message into a request. `None` for topics that are not
    /// set requests.
    pub fn request(msg: &Message) -> Option<SetRequest> {
        let topic = Topic::parse(&msg.topic).ok()?;
        if topic.service != Service::Set {
            return None;
        }
        Some(SetRequest {
            target: topic.target,
            pv: codec::decode(&msg.payload),
        })
    }
}

impl Handler for SetDispatcher {
    fn handle(&self, msg: &Message) {
        let Some(request) = Self::request(msg) else {
            warn!(parent: &self.span, "ignoring set message on malformed topic {:?}", msg.topic);
            return;
        };
        debug!(parent: &self.span, "set {:?} = {}", request.target, request.pv.value);
        if let Err(e) = self.writer.write(request) {
            warn!(parent: &self.span, "writing {} failed: {}", msg.topic, e);
        }
    }
}
