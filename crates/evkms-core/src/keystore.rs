//! Per-peer pairwise key records
//!
//! Single source of truth for pairwise key material, keyed by peer GUID.
//! Consulted and mutated by discovery, key agreement, revocation and refresh
//! handling; all access is serialized by the session's lock.

use std::collections::HashMap;

use crate::crypto;
use crate::types::{DeviceGuid, PairwiseKeyRecord};

/// In-memory store of pairwise key records
#[derive(Debug, Default)]
pub struct KeyStore {
    records: HashMap<DeviceGuid, PairwiseKeyRecord>,
}

impl KeyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a record exists for the peer
    pub fn contains(&self, peer: &DeviceGuid) -> bool {
        self.records.contains_key(peer)
    }

    /// Get the record for a peer
    pub fn get(&self, peer: &DeviceGuid) -> Option<&PairwiseKeyRecord> {
        self.records.get(peer)
    }

    /// Insert or overwrite the record for a peer
    pub fn insert(&mut self, record: PairwiseKeyRecord) {
        self.records.insert(record.peer_guid.clone(), record);
    }

    /// Delete the record for a peer, returning it if present
    pub fn remove(&mut self, peer: &DeviceGuid) -> Option<PairwiseKeyRecord> {
        self.records.remove(peer)
    }

    /// Refresh one peer's key in place: `new_key = hash(old_key ‖ nonce)`
    ///
    /// Bumps the timestamp and leaves the state unchanged. Returns false if
    /// no record exists for the peer (a no-op, not a fault).
    pub fn refresh(&mut self, peer: &DeviceGuid, refresh_nonce: &str) -> bool {
        match self.records.get_mut(peer) {
            Some(record) => {
                record.key = crypto::refreshed_key(&record.key, refresh_nonce);
                record.last_updated = chrono::Utc::now().timestamp();
                true
            }
            None => false,
        }
    }

    /// Refresh every stored key with the same nonce, returning the count
    pub fn refresh_all(&mut self, refresh_nonce: &str) -> usize {
        let ts = chrono::Utc::now().timestamp();
        for record in self.records.values_mut() {
            record.key = crypto::refreshed_key(&record.key, refresh_nonce);
            record.last_updated = ts;
        }
        self.records.len()
    }

    /// All peers with a stored record
    pub fn peers(&self) -> Vec<DeviceGuid> {
        self.records.keys().cloned().collect()
    }

    /// Iterate all records
    pub fn iter(&self) -> impl Iterator<Item = &PairwiseKeyRecord> {
        self.records.values()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
