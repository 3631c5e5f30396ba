//! Gateway configuration file.
//!
//! ```yaml
//! mqtt:
//!   addr: "0.0.0.0:1883"
//!   addr_tls: "0.0.0.0:8883"
//!   cert_file: "svrcert.pem"
//!   key_file: "svrcert.key"
//!   users:
//!     - { username: "ccu", password: "secret" }
//! policy:
//!   transient_prefixes: ["PRESS_", "EVENT_"]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::policy::{DEFAULT_TRANSIENT_PARAMETERS, DEFAULT_TRANSIENT_PREFIXES, PublishPolicy};

/// Top level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub mqtt: MqttConfig,
    pub policy: PolicyConfig,
}

/// Broker and listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MqttConfig {
    /// Plain listener address; empty disables it.
    pub addr: String,
    /// TLS listener address; empty disables it.
    pub addr_tls: String,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub max_packet_size: usize,
    /// Per-client outbound queue length.
    pub max_queued_messages: usize,
    pub connect_timeout_ms: u64,
    /// Accepted credentials; empty allows every client.
    pub users: Vec<UserConfig>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:1883".to_string(),
            addr_tls: String::new(),
            cert_file: PathBuf::from("svrcert.pem"),
            key_file: PathBuf::from("svrcert.key"),
            max_packet_size: ccugw_mqttd::protocol::MAX_PACKET_SIZE,
            max_queued_messages: 1000,
            connect_timeout_ms: 10_000,
            users: Vec::new(),
        }
    }
}

/// Broker credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    pub username: String,
    pub password: String,
}

/// Transient parameter names and prefixes; see [`PublishPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub transient_parameters: Vec<String>,
    pub transient_prefixes: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            transient_parameters: DEFAULT_TRANSIENT_PARAMETERS.iter().map(|s| s.to_string()).collect(),
            transient_prefixes: DEFAULT_TRANSIENT_PREFIXES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl From<&PolicyConfig> for PublishPolicy {
    fn from(config: &PolicyConfig) -> Self {
        PublishPolicy::new(
            config.transient_parameters.iter().cloned(),
            config.transient_prefixes.iter().cloned(),
        )
    }
}

impl GatewayConfig {
    /// Load and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&text)
    }

    /// Load `path` if given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        // an empty document is null, which serde_yaml will not default
        let config: Self = if text.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(text)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mqtt = &self.mqtt;
        if mqtt.addr.is_empty() && mqtt.addr_tls.is_empty() {
            return Err(Error::Config("no listener address configured".to_string()));
        }
        if mqtt.max_queued_messages == 0 {
            return Err(Error::Config("mqtt.max_queued_messages must be positive".to_string()));
        }
        if mqtt.max_packet_size == 0 {
            return Err(Error::Config("mqtt.max_packet_size must be positive".to_string()));
        }
        if mqtt.users.iter().any(|u| u.username.is_empty()) {
            return Err(Error::Config("mqtt.users entries need a username".to_string()));
        }
        Ok(())
    }
}
