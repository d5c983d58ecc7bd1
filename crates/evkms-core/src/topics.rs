//! Topic grammar for the EVKMS pub/sub network
//!
//! All routing addresses are rooted at `iot_network`. Per-device addresses
//! are wildcarded by gateway identity on the subscribe side (`+` matches any
//! single segment) because the gateway GUID is not known until the first
//! provisioning message arrives; it is then recovered from the config
//! topic's second segment.

use crate::types::DeviceGuid;

/// Root segment of every topic in the network
pub const TOPIC_ROOT: &str = "iot_network";

/// Subscribe filter for provisioning payloads from any gateway
pub fn config_filter(device: &DeviceGuid) -> String {
    format!("{}/+/devices/{}/config", TOPIC_ROOT, device)
}

/// Subscribe filter for gateway commands addressed to this device
pub fn command_filter(device: &DeviceGuid) -> String {
    format!("{}/+/devices/{}/commands", TOPIC_ROOT, device)
}

/// Targeted key-response address for a device
pub fn key_response_topic(target: &DeviceGuid) -> String {
    format!("{}/devices/{}/key_response", TOPIC_ROOT, target)
}

/// Subset-scoped discovery broadcast address
pub fn discovery_topic(subset: &str) -> String {
    format!("{}/subsets/{}/discovery", TOPIC_ROOT, subset)
}

/// Subset-scoped broadcast-alerts address (revocations, scheduled refreshes)
pub fn alert_topic(subset: &str) -> String {
    format!("{}/subsets/{}/broadcast_alerts", TOPIC_ROOT, subset)
}

/// Status address parameterized by gateway and device identity
pub fn status_topic(gateway: &str, device: &DeviceGuid) -> String {
    format!("{}/{}/devices/{}/status", TOPIC_ROOT, gateway, device)
}

/// Extract the gateway GUID from a config topic
///
/// Topic shape: `iot_network/<gateway>/devices/<device>/config`. Returns
/// None if the topic has too few segments.
pub fn gateway_from_config_topic(topic: &str) -> Option<&str> {
    let mut parts = topic.split('/');
    let _root = parts.next()?;
    let gateway = parts.next()?;
    if gateway.is_empty() {
        None
    } else {
        Some(gateway)
    }
}

/// Segment-wise topic filter matching with the single-level `+` wildcard
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');
    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (None, None) => return true,
            (Some(f), Some(t)) if f == "+" || f == t => continue,
            _ => return false,
        }
    }
}

/// Classification of an inbound topic relative to one device's identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Provisioning payload on the config address
    Provisioning,
    /// Gateway command on the per-device command address
    Command,
    /// Targeted key response addressed to this device
    KeyResponse,
    /// Subset discovery broadcast
    Discovery,
    /// Subset broadcast alert
    Alert,
}

/// Classify an inbound topic against the addresses this device listens on
pub fn classify(topic: &str, device: &DeviceGuid, subset: &str) -> Option<Inbound> {
    if matches(&config_filter(device), topic) {
        Some(Inbound::Provisioning)
    } else if matches(&command_filter(device), topic) {
        Some(Inbound::Command)
    } else if topic == key_response_topic(device) {
        Some(Inbound::KeyResponse)
    } else if topic == discovery_topic(subset) {
        Some(Inbound::Discovery)
    } else if topic == alert_topic(subset) {
        Some(Inbound::Alert)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceGuid {
        DeviceGuid::new("subset1_device@1")
    }

    #[test]
    fn test_topic_shapes() {
        assert_eq!(
            config_filter(&device()),
            "iot_network/+/devices/subset1_device@1/config"
        );
        assert_eq!(discovery_topic("LR01"), "iot_network/subsets/LR01/discovery");
        assert_eq!(
            status_topic("gw-01", &device()),
            "iot_network/gw-01/devices/subset1_device@1/status"
        );
    }

    #[test]
    fn test_wildcard_matching() {
        let filter = config_filter(&device());
        assert!(matches(
            &filter,
            "iot_network/gw-01/devices/subset1_device@1/config"
        ));
        assert!(matches(
            &filter,
            "iot_network/other-gateway/devices/subset1_device@1/config"
        ));
        // Wrong device
        assert!(!matches(
            &filter,
            "iot_network/gw-01/devices/subset1_device@2/config"
        ));
        // `+` spans exactly one segment
        assert!(!matches(
            &filter,
            "iot_network/a/b/devices/subset1_device@1/config"
        ));
    }

    #[test]
    fn test_exact_matching_without_wildcard() {
        assert!(matches("a/b/c", "a/b/c"));
        assert!(!matches("a/b/c", "a/b"));
        assert!(!matches("a/b", "a/b/c"));
    }

    #[test]
    fn test_gateway_extraction() {
        assert_eq!(
            gateway_from_config_topic("iot_network/gw-01/devices/subset1_device@1/config"),
            Some("gw-01")
        );
        assert_eq!(gateway_from_config_topic("iot_network"), None);
    }

    #[test]
    fn test_classify() {
        let d = device();
        assert_eq!(
            classify("iot_network/gw-01/devices/subset1_device@1/config", &d, "LR01"),
            Some(Inbound::Provisioning)
        );
        assert_eq!(
            classify("iot_network/gw-01/devices/subset1_device@1/commands", &d, "LR01"),
            Some(Inbound::Command)
        );
        assert_eq!(
            classify("iot_network/devices/subset1_device@1/key_response", &d, "LR01"),
            Some(Inbound::KeyResponse)
        );
        assert_eq!(
            classify("iot_network/subsets/LR01/discovery", &d, "LR01"),
            Some(Inbound::Discovery)
        );
        assert_eq!(
            classify("iot_network/subsets/LR01/broadcast_alerts", &d, "LR01"),
            Some(Inbound::Alert)
        );
        // Another device's key response is not ours
        assert_eq!(
            classify("iot_network/devices/subset1_device@2/key_response", &d, "LR01"),
            None
        );
    }
}
