//! Topic names and controller addresses.
//!
//! Topics have the form `{category}/{service}/{identifier...}`:
//!
//! - `device/{service}/{serial}/{channel}/{parameter}`
//! - `sysvar/{service}/{id}`
//! - `program/{service}/{id}`

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Top level topic segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Device,
    Sysvar,
    Program,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Device => "device",
            Category::Sysvar => "sysvar",
            Category::Program => "program",
        }
    }
}

/// Second topic segment: what the message does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Current value, published by the gateway.
    Status,
    /// Write request from a client.
    Set,
    /// Read request from a client.
    Get,
}

impl Service {
    pub fn as_str(self) -> &'static str {
        match self {
            Service::Status => "status",
            Service::Set => "set",
            Service::Get => "get",
        }
    }
}

impl FromStr for Service {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "status" => Ok(Service::Status),
            "set" => Ok(Service::Set),
            "get" => Ok(Service::Get),
            _ => Err(()),
        }
    }
}

/// Device channel address, `serial:channel`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    pub serial: String,
    pub channel: String,
}

impl FromStr for DeviceAddress {
    type Err = Error;

    /// Exactly one `:` separating two non-empty parts is required.
    fn from_str(address: &str) -> Result<Self> {
        let mut parts = address.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(serial), Some(channel), None) if !serial.is_empty() && !channel.is_empty() => Ok(Self {
                serial: serial.to_string(),
                channel: channel.to_string(),
            }),
            _ => Err(Error::AddressFormat(address.to_string())),
        }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.serial, self.channel)
    }
}

/// What a topic refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// A parameter of a device channel.
    Device { address: DeviceAddress, parameter: String },
    /// A system variable.
    Sysvar(u64),
    /// A program.
    Program(u64),
}

impl Target {
    pub fn category(&self) -> Category {
        match self {
            Target::Device { .. } => Category::Device,
            Target::Sysvar(_) => Category::Sysvar,
            Target::Program(_) => Category::Program,
        }
    }
}

/// A parsed topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub service: Service,
    pub target: Target,
}

impl Topic {
    /// Status topic of a device parameter.
    pub fn device_status(address: DeviceAddress, parameter: impl Into<String>) -> Self {
        Self {
            service: Service::Status,
            target: Target::Device {
                address,
                parameter: parameter.into(),
            },
        }
    }

    /// Topic of a system variable.
    pub fn sysvar(service: Service, id: u64) -> Self {
        Self {
            service,
            target: Target::Sysvar(id),
        }
    }

    /// Topic of a program.
    pub fn program(service: Service, id: u64) -> Self {
        Self {
            service,
            target: Target::Program(id),
        }
    }

    pub fn category(&self) -> Category {
        self.target.category()
    }

    /// Parse a topic name.
    pub fn parse(topic: &str) -> Result<Self> {
        let malformed = || Error::TopicFormat(topic.to_string());
        let segments: Vec<&str> = topic.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(malformed());
        }
        let service: Service = match segments.get(1) {
            Some(s) => s.parse().map_err(|_| malformed())?,
            None => return Err(malformed()),
        };
        let numeric = |s: &str| {
            if s.bytes().all(|b| b.is_ascii_digit()) {
                s.parse::<u64>().map_err(|_| malformed())
            } else {
                Err(malformed())
            }
        };

        let target = match segments.as_slice() {
            ["device", _, serial, channel, parameter] => Target::Device {
                address: DeviceAddress {
                    serial: serial.to_string(),
                    channel: channel.to_string(),
                },
                parameter: parameter.to_string(),
            },
            ["sysvar", _, id] => Target::Sysvar(numeric(*id)?),
            ["program", _, id] => Target::Program(numeric(*id)?),
            _ => return Err(malformed()),
        };
        Ok(Self { service, target })
    }
}

impl FromStr for Topic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Topic::parse(s)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let category = self.category().as_str();
        let service = self.service.as_str();
        match &self.target {
            Target::Device { address, parameter } => write!(
                f,
                "{}/{}/{}/{}/{}",
                category, service, address.serial, address.channel, parameter
            ),
            Target::Sysvar(id) | Target::Program(id) => write!(f, "{}/{}/{}", category, service, id),
        }
    }
}

/// Status topic for a device event: `device/status/{serial}/{channel}/{parameter}`.
pub fn build_topic(address: &str, parameter: &str) -> Result<Topic> {
    let address: DeviceAddress = address.parse()?;
    Ok(Topic::device_status(address, parameter))
}
