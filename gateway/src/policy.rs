//! QoS and retain policy for published values.
//!
//! Steady-state values are published retained at QoS 1 so late subscribers
//! see the last value. Transient signals (button presses, install test) are
//! published at QoS 2 without retain so they never linger.

use ccugw_mqttd::QoS;

/// Default parameter names treated as transient.
pub const DEFAULT_TRANSIENT_PARAMETERS: &[&str] = &["INSTALL_TEST"];

/// Default parameter name prefixes treated as transient.
pub const DEFAULT_TRANSIENT_PREFIXES: &[&str] = &["PRESS_"];

/// How a value is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublishDecision {
    pub qos: QoS,
    pub retain: bool,
}

impl PublishDecision {
    /// Retained, at least once.
    pub const STEADY: Self = Self {
        qos: QoS::AtLeastOnce,
        retain: true,
    };

    /// Not retained, exactly once.
    pub const TRANSIENT: Self = Self {
        qos: QoS::ExactlyOnce,
        retain: false,
    };
}

/// Decision for `parameter` under the default policy.
pub fn resolve_publish_decision(parameter: &str) -> PublishDecision {
    let transient = DEFAULT_TRANSIENT_PARAMETERS.iter().any(|p| *p == parameter)
        || DEFAULT_TRANSIENT_PREFIXES.iter().any(|p| parameter.starts_with(p));
    if transient {
        PublishDecision::TRANSIENT
    } else {
        PublishDecision::STEADY
    }
}

/// Configurable set of transient parameter names and prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPolicy {
    transient_parameters: Vec<String>,
    transient_prefixes: Vec<String>,
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_TRANSIENT_PARAMETERS.iter().copied(),
            DEFAULT_TRANSIENT_PREFIXES.iter().copied(),
        )
    }
}

impl PublishPolicy {
    pub fn new<P, Q>(parameters: P, prefixes: Q) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        Q: IntoIterator,
        Q::Item: Into<String>,
    {
        Self {
            transient_parameters: parameters.into_iter().map(Into::into).collect(),
            transient_prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Decision for `parameter`.
    pub fn decide(&self, parameter: &str) -> PublishDecision {
        if self.is_transient(parameter) {
            PublishDecision::TRANSIENT
        } else {
            PublishDecision::STEADY
        }
    }

    pub fn is_transient(&self, parameter: &str) -> bool {
        self.transient_parameters.iter().any(|p| p == parameter)
            || self.transient_prefixes.iter().any(|p| parameter.starts_with(p.as_str()))
    }
}
