//! Topic name and topic filter rules.

use crate::error::{Error, Result};

/// Longest topic the MQTT string encoding can carry.
const MAX_TOPIC_LEN: usize = 65535;

/// Validate a topic name used in a PUBLISH.
///
/// A topic name is non-empty, carries no wildcard and no NUL character.
pub fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty()
        || topic.len() > MAX_TOPIC_LEN
        || topic.contains(['+', '#', '\0'])
    {
        return Err(Error::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

/// Validate a topic filter used in a SUBSCRIBE.
///
/// `+` must occupy a whole level, `#` must occupy the whole last level.
pub fn validate_filter(filter: &str) -> Result<()> {
    if filter.is_empty() || filter.len() > MAX_TOPIC_LEN || filter.contains('\0') {
        return Err(Error::InvalidFilter(filter.to_string()));
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (i, level) in levels.iter().enumerate() {
        let valid = match *level {
            "+" => true,
            "#" => i == last,
            other => !other.contains(['+', '#']),
        };
        if !valid {
            return Err(Error::InvalidFilter(filter.to_string()));
        }
    }
    Ok(())
}

/// Check if a subscription filter matches a topic.
/// Supports MQTT wildcards: + (single level) and # (multi level).
///
/// Wildcards at the beginning of a filter never match topics starting
/// with `$`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let filter_parts: Vec<&str> = filter.split('/').collect();
    let topic_parts: Vec<&str> = topic.split('/').collect();

    if topic.starts_with('$') && matches!(filter_parts[0], "#" | "+") {
        return false;
    }

    let mut t_idx = 0;
    for part in &filter_parts {
        if *part == "#" {
            // also matches the parent level: "a/#" matches "a"
            return true;
        }
        if t_idx >= topic_parts.len() {
            return false;
        }
        if *part != "+" && *part != topic_parts[t_idx] {
            return false;
        }
        t_idx += 1;
    }

    t_idx == topic_parts.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_topic() {
        assert!(validate_topic("device/status/ABC123/1/LEVEL").is_ok());
        assert!(validate_topic("a//b").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("device/+/x").is_err());
        assert!(validate_topic("device/#").is_err());
        assert!(validate_topic("nul\0byte").is_err());
    }

    #[test]
    fn test_validate_filter() {
        assert!(validate_filter("device/set/#").is_ok());
        assert!(validate_filter("sysvar/set/+").is_ok());
        assert!(validate_filter("#").is_ok());
        assert!(validate_filter("+/+/x").is_ok());
        assert!(validate_filter("a/#/b").is_err());
        assert!(validate_filter("a/b#").is_err());
        assert!(validate_filter("a+/b").is_err());
        assert!(validate_filter("").is_err());
    }

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("device/status/+/+/STATE", "device/status/A1/3/STATE"));
        assert!(topic_matches("device/#", "device/status/A1/3/STATE"));
        assert!(topic_matches("device/#", "device"));
        assert!(topic_matches("#", "sysvar/status/1234"));
        assert!(!topic_matches("device/+", "device/status/A1"));
        assert!(!topic_matches("device/status", "device/status/A1"));
        assert!(!topic_matches("#", "$SYS/broker/uptime"));
        assert!(!topic_matches("+/broker/uptime", "$SYS/broker/uptime"));
        assert!(topic_matches("$SYS/#", "$SYS/broker/uptime"));
    }
}
