//! Provisioning store: the device's secret vector material
//!
//! Holds the [`ProvisioningVectors`] once received from the gateway and maps
//! peer local positions to their entries in the current vector. Until a
//! payload has been loaded the device is unprovisioned, which gates all
//! discovery and key-establishment activity.

use tracing::debug;

use crate::error::{EvkmsError, EvkmsResult};
use crate::protocol::ProvisioningPayload;
use crate::types::{DeviceGuid, ProvisioningVectors};

/// Secret material store, populated at most once per process lifetime
#[derive(Debug, Default)]
pub struct ProvisioningStore {
    vectors: Option<ProvisioningVectors>,
}

impl ProvisioningStore {
    /// Create an empty (unprovisioned) store
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether provisioning material has been loaded
    pub fn is_provisioned(&self) -> bool {
        self.vectors.is_some()
    }

    /// This device's own secret, if provisioned
    pub fn secret_i(&self) -> Option<&str> {
        self.vectors.as_ref().map(|v| v.secret_i.as_str())
    }

    /// The loaded vector material, if any
    pub fn vectors(&self) -> Option<&ProvisioningVectors> {
        self.vectors.as_ref()
    }

    /// Load a provisioning payload
    ///
    /// Validates the payload and derives this device's local id from its own
    /// GUID before applying anything: a malformed payload leaves the store
    /// exactly as it was. Material is immutable once set; a repeat delivery
    /// (the transport is at-least-once) is ignored without overwriting.
    pub fn load(&mut self, payload: ProvisioningPayload, own_guid: &DeviceGuid) -> EvkmsResult<()> {
        if payload.secret_i.is_empty() {
            return Err(EvkmsError::MalformedProvisioning(
                "empty secret_i".to_string(),
            ));
        }
        let local_id = own_guid.local_id().ok_or_else(|| {
            EvkmsError::MalformedProvisioning(format!(
                "device GUID {} has no @<position> marker",
                own_guid
            ))
        })?;

        if self.vectors.is_some() {
            debug!("Already provisioned, keeping existing vector material");
            return Ok(());
        }

        self.vectors = Some(ProvisioningVectors {
            secret_i: payload.secret_i,
            vector_prev: payload.vector_prev,
            vector_cur: payload.vector_cur,
            vector_next: payload.vector_next,
            alpha: payload.alpha,
            local_id: local_id.to_string(),
        });
        Ok(())
    }

    /// Look up a peer's secret by its 1-based local position
    ///
    /// Returns None when the id is non-numeric, zero, or beyond the current
    /// vector. That is a normal outcome (peer not covered by the current
    /// vector), not a fault.
    pub fn secret_for_local_id(&self, local_id: &str) -> Option<&str> {
        let vectors = self.vectors.as_ref()?;
        let position: usize = local_id.parse().ok()?;
        let index = position.checked_sub(1)?;
        vectors.vector_cur.get(index).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> ProvisioningPayload {
        serde_json::from_value(serde_json::json!({
            "secret_i": "s-self",
            "Vectore_p": ["p1", "p2", "p3"],
            "Vectore_c": ["c1", "c2", "c3"],
            "Vectore_n": ["n1", "n2", "n3"],
            "alpha": 5,
        }))
        .unwrap()
    }

    #[test]
    fn test_load_and_lookup() {
        let mut store = ProvisioningStore::new();
        assert!(!store.is_provisioned());

        store
            .load(payload(), &DeviceGuid::new("subset1_device@1"))
            .unwrap();

        assert!(store.is_provisioned());
        assert_eq!(store.secret_i(), Some("s-self"));
        assert_eq!(store.vectors().unwrap().local_id, "1");
        assert_eq!(store.secret_for_local_id("1"), Some("c1"));
        assert_eq!(store.secret_for_local_id("3"), Some("c3"));
    }

    #[test]
    fn test_lookup_out_of_range_is_none() {
        let mut store = ProvisioningStore::new();
        store
            .load(payload(), &DeviceGuid::new("subset1_device@1"))
            .unwrap();

        assert_eq!(store.secret_for_local_id("4"), None);
        assert_eq!(store.secret_for_local_id("0"), None);
        assert_eq!(store.secret_for_local_id("seven"), None);
    }

    #[test]
    fn test_lookup_while_unprovisioned() {
        let store = ProvisioningStore::new();
        assert_eq!(store.secret_for_local_id("1"), None);
    }

    #[test]
    fn test_load_empty_secret_rejected_atomically() {
        let mut store = ProvisioningStore::new();
        let mut bad = payload();
        bad.secret_i = String::new();

        let err = store
            .load(bad, &DeviceGuid::new("subset1_device@1"))
            .unwrap_err();
        assert!(matches!(err, EvkmsError::MalformedProvisioning(_)));
        assert!(!store.is_provisioned());
    }

    #[test]
    fn test_load_guid_without_marker_rejected() {
        let mut store = ProvisioningStore::new();
        let err = store
            .load(payload(), &DeviceGuid::new("no-marker"))
            .unwrap_err();
        assert!(matches!(err, EvkmsError::MalformedProvisioning(_)));
        assert!(!store.is_provisioned());
    }

    #[test]
    fn test_repeat_load_keeps_first_material() {
        let mut store = ProvisioningStore::new();
        store
            .load(payload(), &DeviceGuid::new("subset1_device@1"))
            .unwrap();

        let mut second = payload();
        second.secret_i = "different".to_string();
        store
            .load(second, &DeviceGuid::new("subset1_device@1"))
            .unwrap();

        assert_eq!(store.secret_i(), Some("s-self"));
    }
}
