//! Error types for the gateway.

use std::io;

/// Result type alias for the gateway.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Device address is not of the form `serial:channel`.
    #[error("unexpected event from a device: {0:?}")]
    AddressFormat(String),

    /// Topic does not follow `{category}/{service}/{identifier...}`.
    #[error("malformed topic: {0:?}")]
    TopicFormat(String),

    /// The broker refused a publish.
    #[error("publish failed: {0}")]
    Publish(#[source] ccugw_mqttd::Error),

    /// Value cannot be written as a wire message.
    #[error("conversion of PV to JSON failed: {0}")]
    Encoding(String),

    /// A listener could not be started.
    #[error("listener: {0}")]
    Listener(#[source] ccugw_mqttd::Error),

    /// Any other broker error, e.g. an invalid subscription filter.
    #[error("broker: {0}")]
    Broker(#[source] ccugw_mqttd::Error),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// YAML parsing error.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Reports whether the error came from the publish path (broker refusal
    /// or unencodable value). Such errors are logged and never stop event
    /// forwarding.
    pub fn is_publish_error(&self) -> bool {
        matches!(self, Error::Publish(_) | Error::Encoding(_))
    }
}
