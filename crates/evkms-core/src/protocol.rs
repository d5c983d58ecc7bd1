//! Wire messages for the EVKMS protocol
//!
//! All payloads are UTF-8 JSON. Field names match the deployed gateway's
//! expectations exactly (including the `Vectore_*` spelling in provisioning
//! payloads), so every struct carries explicit serde renames.
//!
//! Commands and alerts arrive with a `type` discriminator; parsing peeks at
//! it explicitly so that an unrecognized kind surfaces as
//! [`EvkmsError::UnknownMessageType`] rather than a generic parse failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EvkmsError, EvkmsResult};
use crate::types::DeviceGuid;

/// Command discriminator: refresh every pairwise key this device holds
pub const CMD_REFRESH_ALL: &str = "REFRESH_ALL_RELATED_PAIRWISE_KEYS";
/// Command discriminator: refresh the key shared with one named peer
pub const CMD_REFRESH_SPECIFIC: &str = "REFRESH_SPECIFIC_PAIRWISE_KEY";
/// Alert discriminator: a peer has been revoked subset-wide
pub const ALERT_REVOCATION: &str = "REVOCATION_ALERT";
/// Alert discriminator: gateway-scheduled refresh of all pairwise keys
pub const ALERT_SCHEDULED_REFRESH: &str = "SCHEDULED_KEY_REFRESH";

/// Authenticated presence announcement broadcast on the subset discovery topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryAnnouncement {
    /// Announcing device
    pub guid: DeviceGuid,
    /// Subset the announcement is scoped to
    pub subset: String,
    /// Fresh nonce binding responses to this broadcast
    pub nonce: String,
    /// `discovery_digest(secret_i, guid, nonce)`
    pub digest: String,
}

/// Targeted acknowledgment completing a pairwise key agreement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyResponse {
    /// Responding device (the one that received the discovery)
    pub source_guid: DeviceGuid,
    /// The device whose discovery is being answered
    pub target_guid: DeviceGuid,
    /// The nonce from the original discovery broadcast
    pub original_nonce: String,
    /// `pairwise_digest(key, guid_a ‖ guid_b ‖ nonce)` proving key possession
    pub digest: String,
    /// Unix seconds
    pub timestamp: i64,
}

/// Secret vector material delivered by the gateway on the config address
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisioningPayload {
    /// This device's own secret
    pub secret_i: String,
    /// Previous subset secret vector
    #[serde(rename = "Vectore_p")]
    pub vector_prev: Vec<String>,
    /// Current subset secret vector
    #[serde(rename = "Vectore_c")]
    pub vector_cur: Vec<String>,
    /// Next subset secret vector
    #[serde(rename = "Vectore_n")]
    pub vector_next: Vec<String>,
    /// Security parameter alpha
    pub alpha: u32,
    /// Gateway task correlator, echoed in the provisioning ack
    #[serde(rename = "taskId", default)]
    pub task_id: Option<String>,
}

/// Gateway command delivered on the per-device command address
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    /// Refresh every pairwise key with the given nonce
    RefreshAll {
        refresh_nonce: String,
        issuer: Option<String>,
        task_id: Option<String>,
    },
    /// Refresh the key shared with exactly one peer
    RefreshSpecific {
        refresh_nonce: String,
        issuer: Option<String>,
        task_id: Option<String>,
        target_peer_guid: DeviceGuid,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCommandFields {
    refresh_nonce: String,
    #[serde(default)]
    issuer: Option<String>,
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    target_peer_guid: Option<DeviceGuid>,
}

impl DeviceCommand {
    /// Parse a command payload, classifying its `type` discriminator
    pub fn from_slice(bytes: &[u8]) -> EvkmsResult<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| EvkmsError::MalformedPayload(e.to_string()))?;
        Self::from_value(value)
    }

    fn from_value(value: Value) -> EvkmsResult<Self> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| EvkmsError::MalformedPayload("missing command type".to_string()))?
            .to_string();
        if kind != CMD_REFRESH_ALL && kind != CMD_REFRESH_SPECIFIC {
            return Err(EvkmsError::UnknownMessageType(kind));
        }

        let fields: RawCommandFields = serde_json::from_value(value)
            .map_err(|e| EvkmsError::MalformedPayload(e.to_string()))?;

        if kind == CMD_REFRESH_ALL {
            Ok(DeviceCommand::RefreshAll {
                refresh_nonce: fields.refresh_nonce,
                issuer: fields.issuer,
                task_id: fields.task_id,
            })
        } else {
            let target_peer_guid = fields.target_peer_guid.ok_or_else(|| {
                EvkmsError::MalformedPayload("specific refresh without targetPeerGuid".to_string())
            })?;
            Ok(DeviceCommand::RefreshSpecific {
                refresh_nonce: fields.refresh_nonce,
                issuer: fields.issuer,
                task_id: fields.task_id,
                target_peer_guid,
            })
        }
    }
}

/// Subset-wide broadcast alert
#[derive(Debug, Clone, PartialEq)]
pub enum SubsetAlert {
    /// A device has been excluded from the network
    Revocation {
        revoked_guid: DeviceGuid,
        issuer: Option<String>,
    },
    /// Scheduled refresh of all pairwise keys
    ScheduledRefresh {
        refresh_nonce: String,
        issuer: Option<String>,
        task_id: Option<String>,
    },
}

impl SubsetAlert {
    /// Parse an alert payload, classifying its `type` discriminator
    pub fn from_slice(bytes: &[u8]) -> EvkmsResult<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| EvkmsError::MalformedPayload(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| EvkmsError::MalformedAlert("missing alert type".to_string()))?;

        match kind {
            ALERT_REVOCATION => {
                let revoked_guid = value
                    .get("revokedGuid")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        EvkmsError::MalformedAlert("revocation without revokedGuid".to_string())
                    })?;
                Ok(SubsetAlert::Revocation {
                    revoked_guid: DeviceGuid::new(revoked_guid),
                    issuer: value
                        .get("issuer")
                        .and_then(Value::as_str)
                        .map(String::from),
                })
            }
            ALERT_SCHEDULED_REFRESH => {
                let refresh_nonce = value
                    .get("refreshNonce")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        EvkmsError::MalformedAlert(
                            "scheduled refresh without refreshNonce".to_string(),
                        )
                    })?;
                Ok(SubsetAlert::ScheduledRefresh {
                    refresh_nonce: refresh_nonce.to_string(),
                    issuer: value
                        .get("issuer")
                        .and_then(Value::as_str)
                        .map(String::from),
                    task_id: value
                        .get("taskId")
                        .and_then(Value::as_str)
                        .map(String::from),
                })
            }
            other => Err(EvkmsError::UnknownMessageType(other.to_string())),
        }
    }
}

/// Status reports published to the gateway's status address
///
/// Discriminated by `status_type`; each carries a timestamp and, where the
/// triggering message had one, the gateway's `taskId` correlator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status_type")]
pub enum StatusReport {
    /// Provisioning payload received and loaded
    #[serde(rename = "provisioned")]
    Provisioned {
        #[serde(rename = "deviceGuid")]
        device_guid: DeviceGuid,
        #[serde(rename = "taskId")]
        task_id: Option<String>,
        timestamp: i64,
    },

    /// A pairwise key reached the Established state (sent once per peer)
    #[serde(rename = "pairwise_key_established")]
    KeyEstablished {
        #[serde(rename = "deviceGuid")]
        device_guid: DeviceGuid,
        #[serde(rename = "peerDeviceGuid")]
        peer_device_guid: DeviceGuid,
        #[serde(rename = "keyContextNonce")]
        key_context_nonce: String,
        /// Fingerprint only; the raw key never leaves the device
        #[serde(rename = "keyHash")]
        key_hash: String,
        timestamp: i64,
    },

    /// A refresh command was processed
    #[serde(rename = "pairwise_key_refresh_processed")]
    RefreshProcessed {
        #[serde(rename = "deviceGuid")]
        device_guid: DeviceGuid,
        #[serde(rename = "taskId")]
        task_id: Option<String>,
        timestamp: i64,
        #[serde(rename = "peerKeysRefreshedCount")]
        peer_keys_refreshed_count: usize,
        #[serde(rename = "refreshedPeerGuid")]
        refreshed_peer_guid: Option<DeviceGuid>,
        #[serde(rename = "wasCentralRefresh")]
        was_central_refresh: bool,
    },

    /// A scheduled subset-wide refresh broadcast was processed
    #[serde(rename = "scheduled_key_refresh_completed")]
    ScheduledRefreshCompleted {
        #[serde(rename = "deviceGuid")]
        device_guid: DeviceGuid,
        #[serde(rename = "taskId")]
        task_id: Option<String>,
        timestamp: i64,
        #[serde(rename = "keysRefreshedCount")]
        keys_refreshed_count: usize,
        issuer: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisioning_parse_deployed_field_names() {
        let json = r#"{
            "secret_i": "s-self",
            "Vectore_p": ["p1", "p2"],
            "Vectore_c": ["c1", "c2"],
            "Vectore_n": ["n1", "n2"],
            "alpha": 5,
            "taskId": "task-42"
        }"#;
        let payload: ProvisioningPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.secret_i, "s-self");
        assert_eq!(payload.vector_cur, vec!["c1", "c2"]);
        assert_eq!(payload.alpha, 5);
        assert_eq!(payload.task_id.as_deref(), Some("task-42"));
    }

    #[test]
    fn test_provisioning_task_id_optional() {
        let json = r#"{
            "secret_i": "s",
            "Vectore_p": [],
            "Vectore_c": [],
            "Vectore_n": [],
            "alpha": 5
        }"#;
        let payload: ProvisioningPayload = serde_json::from_str(json).unwrap();
        assert!(payload.task_id.is_none());
    }

    #[test]
    fn test_provisioning_missing_vector_fails() {
        let json = r#"{"secret_i": "s", "Vectore_p": [], "Vectore_c": [], "alpha": 5}"#;
        assert!(serde_json::from_str::<ProvisioningPayload>(json).is_err());
    }

    #[test]
    fn test_command_refresh_all() {
        let json = br#"{
            "type": "REFRESH_ALL_RELATED_PAIRWISE_KEYS",
            "refreshNonce": "NONCE_r",
            "issuer": "gw-01",
            "taskId": "t1"
        }"#;
        let cmd = DeviceCommand::from_slice(json).unwrap();
        assert_eq!(
            cmd,
            DeviceCommand::RefreshAll {
                refresh_nonce: "NONCE_r".to_string(),
                issuer: Some("gw-01".to_string()),
                task_id: Some("t1".to_string()),
            }
        );
    }

    #[test]
    fn test_command_refresh_specific_requires_target() {
        let json = br#"{
            "type": "REFRESH_SPECIFIC_PAIRWISE_KEY",
            "refreshNonce": "NONCE_r",
            "issuer": "gw-01",
            "taskId": "t2"
        }"#;
        let err = DeviceCommand::from_slice(json).unwrap_err();
        assert!(matches!(err, EvkmsError::MalformedPayload(_)));
    }

    #[test]
    fn test_command_unknown_type() {
        let json = br#"{"type": "ROTATE_EVERYTHING", "refreshNonce": "NONCE_r"}"#;
        let err = DeviceCommand::from_slice(json).unwrap_err();
        assert!(matches!(err, EvkmsError::UnknownMessageType(t) if t == "ROTATE_EVERYTHING"));
    }

    #[test]
    fn test_command_not_json() {
        let err = DeviceCommand::from_slice(b"{nope").unwrap_err();
        assert!(matches!(err, EvkmsError::MalformedPayload(_)));
    }

    #[test]
    fn test_alert_revocation() {
        let json = br#"{"type": "REVOCATION_ALERT", "revokedGuid": "subset1_device@3", "issuer": "gw-01"}"#;
        let alert = SubsetAlert::from_slice(json).unwrap();
        assert_eq!(
            alert,
            SubsetAlert::Revocation {
                revoked_guid: DeviceGuid::new("subset1_device@3"),
                issuer: Some("gw-01".to_string()),
            }
        );
    }

    #[test]
    fn test_alert_revocation_missing_guid() {
        let json = br#"{"type": "REVOCATION_ALERT", "issuer": "gw-01"}"#;
        let err = SubsetAlert::from_slice(json).unwrap_err();
        assert!(matches!(err, EvkmsError::MalformedAlert(_)));
    }

    #[test]
    fn test_alert_scheduled_refresh_missing_nonce() {
        let json = br#"{"type": "SCHEDULED_KEY_REFRESH", "issuer": "gw-01"}"#;
        let err = SubsetAlert::from_slice(json).unwrap_err();
        assert!(matches!(err, EvkmsError::MalformedAlert(_)));
    }

    #[test]
    fn test_alert_unknown_type() {
        let json = br#"{"type": "WEATHER_REPORT"}"#;
        let err = SubsetAlert::from_slice(json).unwrap_err();
        assert!(matches!(err, EvkmsError::UnknownMessageType(_)));
    }

    #[test]
    fn test_status_report_field_names() {
        let report = StatusReport::KeyEstablished {
            device_guid: DeviceGuid::new("subset1_device@1"),
            peer_device_guid: DeviceGuid::new("subset1_device@2"),
            key_context_nonce: "NONCE_x".to_string(),
            key_hash: "ff".repeat(32),
            timestamp: 1_700_000_000,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status_type"], "pairwise_key_established");
        assert_eq!(value["deviceGuid"], "subset1_device@1");
        assert_eq!(value["peerDeviceGuid"], "subset1_device@2");
        assert_eq!(value["keyContextNonce"], "NONCE_x");
        assert!(value["keyHash"].is_string());
    }

    #[test]
    fn test_refresh_ack_field_names() {
        let report = StatusReport::RefreshProcessed {
            device_guid: DeviceGuid::new("subset1_device@1"),
            task_id: Some("t9".to_string()),
            timestamp: 1_700_000_000,
            peer_keys_refreshed_count: 3,
            refreshed_peer_guid: None,
            was_central_refresh: true,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status_type"], "pairwise_key_refresh_processed");
        assert_eq!(value["peerKeysRefreshedCount"], 3);
        assert_eq!(value["wasCentralRefresh"], true);
        assert_eq!(value["taskId"], "t9");
    }

    #[test]
    fn test_discovery_announcement_roundtrip() {
        let msg = DiscoveryAnnouncement {
            guid: DeviceGuid::new("subset1_device@1"),
            subset: "LR01".to_string(),
            nonce: "NONCE_0011223344556677".to_string(),
            digest: "aa".repeat(32),
        };
        let bytes = serde_json::to_vec(&msg).unwrap();
        let back: DiscoveryAnnouncement = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.guid, msg.guid);
        assert_eq!(back.nonce, msg.nonce);
    }
}
