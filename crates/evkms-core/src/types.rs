//! Core types for the EVKMS device protocol

use serde::{Deserialize, Serialize};

/// Globally unique device identifier
///
/// Encodes a subset prefix and a numeric local position, e.g.
/// `subset1_device@5`. The local id is the segment after the final `@` and
/// indexes the device's entry in the subset secret vectors (1-based).
/// Immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceGuid(pub String);

impl DeviceGuid {
    /// Create a DeviceGuid from any string-like value
    pub fn new(guid: impl Into<String>) -> Self {
        Self(guid.into())
    }

    /// Get the GUID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The local-id segment: text after the final `@`, if any
    pub fn local_id(&self) -> Option<&str> {
        self.0.rsplit_once('@').map(|(_, id)| id)
    }

    /// The numeric local position, parsed from the local-id segment
    ///
    /// Returns None for GUIDs without an `@` marker or with a non-numeric
    /// trailing segment; callers fall back to lexicographic ordering or
    /// treat the peer as outside the current vector.
    pub fn local_position(&self) -> Option<u64> {
        self.local_id().and_then(|id| id.parse().ok())
    }
}

impl std::fmt::Display for DeviceGuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceGuid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a pairwise key
///
/// Tentative after responding to a peer's discovery (our response is out but
/// the peer's verifying round has not been observed); Established once the
/// acknowledgment digest has been verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyState {
    /// Response sent, peer's verification not yet observed
    Tentative,
    /// Acknowledgment digest verified
    Established,
}

/// Per-peer pairwise key material
///
/// One record per peer, keyed by peer GUID in the [`KeyStore`]. The key is
/// the 32-byte derived value, hex-encoded. A record may be refreshed in
/// place (key replaced, timestamp bumped, state unchanged) or deleted when
/// the peer is revoked.
///
/// [`KeyStore`]: crate::keystore::KeyStore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseKeyRecord {
    /// The peer this key is shared with
    pub peer_guid: DeviceGuid,
    /// Hex-encoded 32-byte key value
    pub key: String,
    /// The discovery nonce that led to this key
    pub establishing_nonce: String,
    /// Unix timestamp of the last creation or refresh
    pub last_updated: i64,
    /// Tentative or Established
    pub state: KeyState,
}

impl PairwiseKeyRecord {
    /// Create a record with the current timestamp
    pub fn new(
        peer_guid: DeviceGuid,
        key: impl Into<String>,
        nonce: impl Into<String>,
        state: KeyState,
    ) -> Self {
        Self {
            peer_guid,
            key: key.into(),
            establishing_nonce: nonce.into(),
            last_updated: chrono::Utc::now().timestamp(),
            state,
        }
    }
}

/// Secret vector material received from the gateway
///
/// Created exactly once, on receipt of a provisioning payload; immutable
/// thereafter. Absence means "unprovisioned", which gates all discovery and
/// key-establishment activity.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningVectors {
    /// This device's own secret
    pub secret_i: String,
    /// Previous subset secrets
    pub vector_prev: Vec<String>,
    /// Current subset secrets; peer local id N maps to index N-1
    pub vector_cur: Vec<String>,
    /// Next subset secrets
    pub vector_next: Vec<String>,
    /// Security parameter alpha
    pub alpha: u32,
    /// This device's local id within the subset
    pub local_id: String,
}
