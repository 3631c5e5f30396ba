//! Event translation through the handler chain.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use ccugw::{
    Error, HandlerChain, LogSink, MqttTranslator, Notification, NotificationHandler, PublishPolicy, Publisher, Result,
};
use parking_lot::Mutex;

/// Publisher that refuses everything.
#[derive(Default)]
struct RefusingPublisher {
    calls: AtomicUsize,
}

impl Publisher for RefusingPublisher {
    fn publish(&self, _topic: &str, _payload: Bytes, _qos: u8, _retain: bool) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::Publish(ccugw_mqttd::Error::NotRunning))
    }
}

/// Publisher that records what it was given.
#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<(String, Bytes, u8, bool)>>,
}

impl Publisher for RecordingPublisher {
    fn publish(&self, topic: &str, payload: Bytes, qos: u8, retain: bool) -> Result<()> {
        self.published.lock().push((topic.to_string(), payload, qos, retain));
        Ok(())
    }
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<Notification>>,
}

impl NotificationHandler for Recorder {
    fn handle(&self, notification: &Notification) -> Result<()> {
        self.seen.lock().push(notification.clone());
        Ok(())
    }
}

fn notifications() -> Vec<Notification> {
    vec![
        Notification::event("BidCos-RF", "ABC123:1", "LEVEL", 0.5),
        Notification::NewDevices {
            interface_id: "BidCos-RF".into(),
            devices: Vec::new(),
        },
        Notification::event("BidCos-RF", "ABC123:1", "PRESS_SHORT", true),
        Notification::DeleteDevices {
            interface_id: "BidCos-RF".into(),
            addresses: vec!["ABC123".into()],
        },
        Notification::UpdateDevice {
            interface_id: "BidCos-RF".into(),
            address: "ABC123".into(),
            hint: 0,
        },
        Notification::ReplaceDevice {
            interface_id: "BidCos-RF".into(),
            old_address: "ABC123".into(),
            new_address: "DEF456".into(),
        },
        Notification::ReaddedDevice {
            interface_id: "BidCos-RF".into(),
            addresses: vec!["ABC123".into()],
        },
        Notification::event("HmIP-RF", "XYZ:3", "INSTALL_TEST", true),
    ]
}

#[test]
fn test_every_handler_sees_every_notification_despite_publish_failures() {
    let publisher = Arc::new(RefusingPublisher::default());
    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());
    let chain = HandlerChain::new()
        .with(Arc::new(MqttTranslator::new(publisher.clone())))
        .with(first.clone())
        .with(second.clone())
        .with(Arc::new(LogSink));

    let input = notifications();
    for n in &input {
        assert!(chain.dispatch(n).is_ok(), "publish failures must not surface");
    }

    assert_eq!(publisher.calls.load(Ordering::SeqCst), 3);
    assert_eq!(*first.seen.lock(), input);
    assert_eq!(*second.seen.lock(), input);
}

#[test]
fn test_malformed_address_is_reported_and_forwarded() {
    let publisher = Arc::new(RecordingPublisher::default());
    let downstream = Arc::new(Recorder::default());
    let chain = HandlerChain::new()
        .with(Arc::new(MqttTranslator::new(publisher.clone())))
        .with(downstream.clone());

    let bad = Notification::event("BidCos-RF", "ABC123", "LEVEL", 1i64);
    let err = chain.dispatch(&bad).unwrap_err();
    assert_eq!(err.failures.len(), 1);
    assert_eq!(err.failures[0].0, 0);
    assert!(matches!(err.failures[0].1, Error::AddressFormat(_)));

    assert!(publisher.published.lock().is_empty());
    assert_eq!(*downstream.seen.lock(), vec![bad]);
}

#[test]
fn test_topic_and_policy() {
    let publisher = Arc::new(RecordingPublisher::default());
    let translator = MqttTranslator::new(publisher.clone());

    for n in notifications() {
        translator.handle(&n).unwrap();
    }

    let published = publisher.published.lock();
    let summary: Vec<(&str, u8, bool)> = published.iter().map(|(t, _, q, r)| (t.as_str(), *q, *r)).collect();
    assert_eq!(
        summary,
        vec![
            ("device/status/ABC123/1/LEVEL", 1, true),
            ("device/status/ABC123/1/PRESS_SHORT", 2, false),
            ("device/status/XYZ/3/INSTALL_TEST", 2, false),
        ]
    );
    let payload: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
    assert_eq!(payload["v"], serde_json::json!(0.5));
    assert_eq!(payload["s"], serde_json::json!(0));
}

#[test]
fn test_custom_policy() {
    let publisher = Arc::new(RecordingPublisher::default());
    let translator = MqttTranslator::new(publisher.clone()).with_policy(PublishPolicy::new(["LEVEL"], Vec::<String>::new()));

    translator.publish_event("A:1", "LEVEL", &1i64.into()).unwrap();
    translator.publish_event("A:1", "PRESS_SHORT", &true.into()).unwrap();

    let published = publisher.published.lock();
    assert_eq!((published[0].2, published[0].3), (2, false));
    assert_eq!((published[1].2, published[1].3), (1, true));
}

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_publish_failure_is_logged_under_injected_span() {
    let capture = Capture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let translator = MqttTranslator::new(Arc::new(RefusingPublisher::default()))
            .with_span(tracing::info_span!("test-translator"));
        translator
            .handle(&Notification::event("x", "ABC123:1", "LEVEL", 1i64))
            .unwrap();
    });

    let output = String::from_utf8(capture.0.lock().clone()).unwrap();
    assert!(output.contains("publish of event failed"), "output: {}", output);
    assert!(output.contains("test-translator"), "output: {}", output);
}
