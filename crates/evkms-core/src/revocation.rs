//! Revocation tracking and alert handling
//!
//! The registry records peers known to be revoked (monotonically growing,
//! never shrinks) and this device's own revoked status. Self-revocation is
//! terminal: once set it never reverts and gates off discovery, key
//! agreement and command handling for the rest of the process lifetime.
//!
//! Alerts are accepted from any publisher on the subset alert address; no
//! sender authorization is performed. That is a deliberate simplification of
//! this design, not an oversight.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::error::EvkmsResult;
use crate::session::{DeviceSession, SessionState};
use crate::types::DeviceGuid;

/// Set of revoked peers plus this device's own terminal revoked flag
#[derive(Debug, Default)]
pub struct RevocationRegistry {
    revoked: HashSet<DeviceGuid>,
    self_revoked: bool,
}

impl RevocationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a peer is known to be revoked
    pub fn is_revoked(&self, peer: &DeviceGuid) -> bool {
        self.revoked.contains(peer)
    }

    /// Record a peer as revoked; idempotent
    ///
    /// Returns true if the peer was newly added.
    pub fn revoke(&mut self, peer: DeviceGuid) -> bool {
        self.revoked.insert(peer)
    }

    /// Mark this device itself as revoked; irreversible
    pub fn mark_self_revoked(&mut self) {
        self.self_revoked = true;
    }

    /// Whether this device has been revoked
    pub fn is_self_revoked(&self) -> bool {
        self.self_revoked
    }

    /// Number of known revoked peers
    pub fn len(&self) -> usize {
        self.revoked.len()
    }

    /// Whether no peer has been revoked yet
    pub fn is_empty(&self) -> bool {
        self.revoked.is_empty()
    }
}

impl DeviceSession {
    /// Process a revocation alert
    ///
    /// Adds the GUID to the revoked set unconditionally. If the revoked GUID
    /// is this device's own identity, sets the terminal self-revoked flag.
    /// Otherwise purges the peer's pairwise key record and reporting-ledger
    /// entry so any future re-establishment attempt starts clean.
    pub(crate) fn handle_revocation(
        &self,
        state: &mut SessionState,
        revoked_guid: DeviceGuid,
        issuer: Option<String>,
    ) -> EvkmsResult<()> {
        state.revocation.revoke(revoked_guid.clone());
        info!(revoked = %revoked_guid, issuer = ?issuer, "Peer revoked");

        if revoked_guid == *self.identity() {
            state.revocation.mark_self_revoked();
            warn!("THIS DEVICE has been revoked; all protocol activity is now disabled");
            return Ok(());
        }

        if state.keys.remove(&revoked_guid).is_some() {
            info!(peer = %revoked_guid, "Deleted pairwise key for revoked peer");
            if state.reports.clear(&revoked_guid) {
                info!(peer = %revoked_guid, "Cleared reporting status for revoked peer");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revoke_is_idempotent_and_monotonic() {
        let mut registry = RevocationRegistry::new();
        let peer = DeviceGuid::new("subset1_device@3");

        assert!(registry.revoke(peer.clone()));
        assert!(!registry.revoke(peer.clone()));
        assert!(registry.is_revoked(&peer));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_self_revocation_is_terminal() {
        let mut registry = RevocationRegistry::new();
        assert!(!registry.is_self_revoked());

        registry.mark_self_revoked();
        assert!(registry.is_self_revoked());
        // There is no API to clear the flag; revoking more peers does not
        // touch it either.
        registry.revoke(DeviceGuid::new("subset1_device@9"));
        assert!(registry.is_self_revoked());
    }

    #[test]
    fn test_unknown_peer_not_revoked() {
        let registry = RevocationRegistry::new();
        assert!(!registry.is_revoked(&DeviceGuid::new("subset1_device@1")));
    }
}
