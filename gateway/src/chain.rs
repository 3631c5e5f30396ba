//! Ordered chain of notification handlers.
//!
//! Every handler sees every notification, in order, whatever the handlers
//! before it returned.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::event::Notification;

/// A link in the notification chain.
pub trait NotificationHandler: Send + Sync {
    fn handle(&self, notification: &Notification) -> Result<()>;
}

impl<F> NotificationHandler for F
where
    F: Fn(&Notification) -> Result<()> + Send + Sync,
{
    fn handle(&self, notification: &Notification) -> Result<()> {
        self(notification)
    }
}

/// Handlers that failed while one notification was dispatched.
#[derive(Debug)]
pub struct DispatchError {
    /// Position in the chain and error of each failed handler.
    pub failures: Vec<(usize, Error)>,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} handler(s) failed", self.failures.len())?;
        for (position, error) in &self.failures {
            write!(f, "; #{}: {}", position, error)?;
        }
        Ok(())
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures.first().map(|(_, e)| e as _)
    }
}

/// Handlers composed at startup, called synchronously in order.
#[derive(Clone, Default)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn NotificationHandler>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler.
    pub fn with(mut self, handler: Arc<dyn NotificationHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Hand `notification` to every handler in order.
    pub fn dispatch(&self, notification: &Notification) -> std::result::Result<(), DispatchError> {
        let failures: Vec<(usize, Error)> = self
            .handlers
            .iter()
            .enumerate()
            .filter_map(|(i, h)| h.handle(notification).err().map(|e| (i, e)))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DispatchError { failures })
        }
    }
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerChain").field("len", &self.handlers.len()).finish()
    }
}

/// Terminal handler that logs every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationHandler for LogSink {
    fn handle(&self, notification: &Notification) -> Result<()> {
        debug!(kind = notification.kind(), interface = notification.interface_id(), "{:?}", notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<(usize, String)>>>, id: usize) -> Arc<dyn NotificationHandler> {
        let log = Arc::clone(log);
        Arc::new(move |n: &Notification| -> Result<()> {
            log.lock().push((id, n.kind().to_string()));
            Ok(())
        })
    }

    #[test]
    fn test_dispatch_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = HandlerChain::new().with(recorder(&log, 0)).with(recorder(&log, 1));

        chain.dispatch(&Notification::event("x", "A:1", "LEVEL", 1i64)).unwrap();
        chain
            .dispatch(&Notification::DeleteDevices {
                interface_id: "x".into(),
                addresses: vec!["A".into()],
            })
            .unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                (0, "event".to_string()),
                (1, "event".to_string()),
                (0, "delete_devices".to_string()),
                (1, "delete_devices".to_string()),
            ]
        );
    }

    #[test]
    fn test_failures_do_not_stop_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing: Arc<dyn NotificationHandler> =
            Arc::new(|n: &Notification| -> Result<()> { Err(Error::AddressFormat(n.interface_id().to_string())) });
        let chain = HandlerChain::new()
            .with(Arc::clone(&failing))
            .with(recorder(&log, 1))
            .with(failing)
            .with(Arc::new(LogSink));
        assert_eq!(chain.len(), 4);

        let err = chain.dispatch(&Notification::event("bad", "A", "LEVEL", 1i64)).unwrap_err();
        let positions: Vec<usize> = err.failures.iter().map(|(i, _)| *i).collect();
        assert_eq!(positions, vec![0, 2]);
        assert_eq!(log.lock().len(), 1);
        assert!(err.to_string().starts_with("2 handler(s) failed"));
    }
}
