//! Controller notifications.

use serde::{Deserialize, Serialize};

use crate::pv::Value;

/// Description of a device or channel as reported by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DeviceDescription {
    pub address: String,
    #[serde(rename = "TYPE")]
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_type: Option<String>,
    pub index: i32,
    pub version: i32,
    pub flags: i32,
    pub children: Vec<String>,
    pub paramsets: Vec<String>,
}

/// A notification from the controller.
///
/// Serialized as an object tagged by `kind`, e.g.
/// `{"kind":"event","interface_id":"BidCos-RF","address":"ABC123:1","value_key":"LEVEL","value":0.5}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// A parameter value changed.
    Event {
        interface_id: String,
        address: String,
        value_key: String,
        #[serde(default)]
        value: Value,
    },
    /// Devices were added.
    NewDevices {
        interface_id: String,
        devices: Vec<DeviceDescription>,
    },
    /// Devices were removed.
    DeleteDevices {
        interface_id: String,
        addresses: Vec<String>,
    },
    /// A device changed.
    UpdateDevice {
        interface_id: String,
        address: String,
        hint: i32,
    },
    /// A device was replaced by another one.
    ReplaceDevice {
        interface_id: String,
        old_address: String,
        new_address: String,
    },
    /// Previously deleted devices were added again.
    ReaddedDevice {
        interface_id: String,
        addresses: Vec<String>,
    },
}

impl Notification {
    /// Value-change notification.
    pub fn event(
        interface_id: impl Into<String>,
        address: impl Into<String>,
        value_key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Notification::Event {
            interface_id: interface_id.into(),
            address: address.into(),
            value_key: value_key.into(),
            value: value.into(),
        }
    }

    /// Short name of the notification kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Event { .. } => "event",
            Notification::NewDevices { .. } => "new_devices",
            Notification::DeleteDevices { .. } => "delete_devices",
            Notification::UpdateDevice { .. } => "update_device",
            Notification::ReplaceDevice { .. } => "replace_device",
            Notification::ReaddedDevice { .. } => "readded_device",
        }
    }

    pub fn interface_id(&self) -> &str {
        match self {
            Notification::Event { interface_id, .. }
            | Notification::NewDevices { interface_id, .. }
            | Notification::DeleteDevices { interface_id, .. }
            | Notification::UpdateDevice { interface_id, .. }
            | Notification::ReplaceDevice { interface_id, .. }
            | Notification::ReaddedDevice { interface_id, .. } => interface_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json() {
        let json = r#"{"kind":"event","interface_id":"BidCos-RF","address":"ABC123:1","value_key":"LEVEL","value":42.5}"#;
        let n: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(n, Notification::event("BidCos-RF", "ABC123:1", "LEVEL", 42.5));
        assert_eq!(n.kind(), "event");
        assert_eq!(n.interface_id(), "BidCos-RF");
        assert_eq!(serde_json::to_string(&n).unwrap(), json);
    }

    #[test]
    fn test_device_notifications_json() {
        let n: Notification = serde_json::from_str(
            r#"{"kind":"new_devices","interface_id":"HmIP-RF","devices":[{"ADDRESS":"ABC123","TYPE":"HmIP-BROLL","VERSION":3,"CHILDREN":["ABC123:0","ABC123:1"]}]}"#,
        )
        .unwrap();
        match n {
            Notification::NewDevices { devices, .. } => {
                assert_eq!(devices[0].type_name, "HmIP-BROLL");
                assert_eq!(devices[0].children.len(), 2);
                assert_eq!(devices[0].parent, None);
            }
            other => panic!("unexpected notification {:?}", other),
        }

        let n: Notification = serde_json::from_str(
            r#"{"kind":"replace_device","interface_id":"x","old_address":"A","new_address":"B"}"#,
        )
        .unwrap();
        assert_eq!(n.kind(), "replace_device");
        assert!(serde_json::from_str::<Notification>(r#"{"kind":"reboot","interface_id":"x"}"#).is_err());
    }
}
