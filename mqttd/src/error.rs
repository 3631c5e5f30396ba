//! Error types for the embedded broker.

use std::io;
use std::path::PathBuf;

/// Result type alias for the broker.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for broker operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Connection closed by peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// Unexpected packet received.
    #[error("unexpected packet: expected {expected}, got {got}")]
    UnexpectedPacket { expected: String, got: String },

    /// Authentication failed.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Topic name is not valid for publishing.
    #[error("invalid topic: {0:?}")]
    InvalidTopic(String),

    /// Topic filter is not valid for subscribing.
    #[error("invalid topic filter: {0:?}")]
    InvalidFilter(String),

    /// QoS value outside of 0, 1 and 2.
    #[error("invalid qos: {0}")]
    InvalidQoS(u8),

    /// Broker is not running.
    #[error("broker not running")]
    NotRunning,

    /// Broker or listener is already running.
    #[error("already running")]
    AlreadyRunning,

    /// Binding a listener address failed.
    #[error("listener {listener}: bind {addr} failed: {source}")]
    Bind {
        listener: String,
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Loading certificate or private key material failed.
    #[error("loading {}: {reason}", path.display())]
    Certificate { path: PathBuf, reason: String },

    /// TLS configuration or handshake error.
    #[error("tls error: {0}")]
    Tls(String),

    /// Timeout error.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Reports whether this error is one a publish call can return for a
    /// well-formed request that the broker refused.
    pub fn is_publish_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidTopic(_) | Error::InvalidQoS(_) | Error::NotRunning
        )
    }
}

impl From<rumqttc::mqttbytes::Error> for Error {
    fn from(e: rumqttc::mqttbytes::Error) -> Self {
        Error::Protocol(e.to_string())
    }
}
