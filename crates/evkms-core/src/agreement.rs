//! Pairwise key agreement: responder and initiator paths
//!
//! Both sides derive the same key independently from their vector material
//! and the discovery nonce, so the key never traverses the network. The
//! responder proves possession by sending an HMAC over material both sides
//! can reconstruct; the initiator verifies that digest before promoting the
//! key to Established.
//!
//! ## Message flow
//!
//! ```text
//! Initiator (A)                         Responder (B)
//!   |                                        |
//!   |-- discovery {guid, nonce, digest} ---->|
//!   |                                        | verify digest against V_c
//!   |                                        | derive K_ab, store Tentative
//!   |<-- key response {nonce, ack digest} ---|
//!   | verify ack digest                      |
//!   | derive K_ab, store Established         |
//!   | report fingerprint to gateway (once)   |
//! ```

use tracing::{debug, info};

use crate::crypto;
use crate::error::{EvkmsError, EvkmsResult};
use crate::protocol::{DiscoveryAnnouncement, KeyResponse, StatusReport};
use crate::session::{DeviceSession, SessionState};
use crate::topics;
use crate::types::{KeyState, PairwiseKeyRecord};

impl DeviceSession {
    /// Responder path: answer a verified discovery with a key response
    ///
    /// Resolves the announcing peer's secret from the current vector,
    /// recomputes the discovery digest, and only then derives the pairwise
    /// key. The acknowledgment digest proves possession of the derived key
    /// without revealing it. The key is stored Tentative until the peer's
    /// verifying round would complete on its side.
    pub(crate) fn respond_to_discovery(
        &self,
        state: &mut SessionState,
        announcement: &DiscoveryAnnouncement,
    ) -> EvkmsResult<()> {
        let peer = &announcement.guid;

        let peer_secret = peer
            .local_id()
            .and_then(|id| state.provisioning.secret_for_local_id(id))
            .ok_or_else(|| EvkmsError::UnknownPeerSecret(peer.to_string()))?
            .to_string();

        let expected =
            crypto::discovery_digest(&peer_secret, peer.as_str(), &announcement.nonce);
        if expected != announcement.digest {
            return Err(EvkmsError::DigestMismatch(peer.to_string()));
        }

        let own_secret = state
            .provisioning
            .secret_i()
            .ok_or(EvkmsError::NotProvisioned)?
            .to_string();

        let key = crypto::derive_pairwise_key(
            self.identity(),
            peer,
            &own_secret,
            &peer_secret,
            &announcement.nonce,
        );
        let material =
            crypto::acknowledgment_material(self.identity(), peer, &announcement.nonce);

        let response = KeyResponse {
            source_guid: self.identity().clone(),
            target_guid: peer.clone(),
            original_nonce: announcement.nonce.clone(),
            digest: crypto::pairwise_digest(&key, &material),
            timestamp: chrono::Utc::now().timestamp(),
        };
        let bytes = serde_json::to_vec(&response)?;
        self.publisher().publish(&topics::key_response_topic(peer), bytes);

        state.keys.insert(PairwiseKeyRecord::new(
            peer.clone(),
            key,
            announcement.nonce.clone(),
            KeyState::Tentative,
        ));
        info!(peer = %peer, "Sent key response and stored tentative key");
        Ok(())
    }

    /// Initiator path: verify a key response to one of our own discoveries
    ///
    /// The referenced nonce must still be outstanding; a stale or replayed
    /// response is dropped without touching any state. On a verified digest
    /// the key is stored Established, the nonce is consumed, and — at most
    /// once per peer, and only once a gateway is known — a fingerprint-only
    /// establishment report is published.
    pub(crate) fn handle_key_response(&self, payload: &[u8]) -> EvkmsResult<()> {
        let mut state = self.state_mut();
        if state.revocation.is_self_revoked() {
            return Err(EvkmsError::SelfRevoked);
        }
        if !state.provisioning.is_provisioned() {
            return Err(EvkmsError::NotProvisioned);
        }

        let response: KeyResponse = serde_json::from_slice(payload)
            .map_err(|e| EvkmsError::MalformedPayload(e.to_string()))?;

        if response.target_guid != *self.identity() {
            return Ok(());
        }

        let responder = response.source_guid.clone();
        let nonce = response.original_nonce.clone();

        if !state.nonces.contains(&nonce) {
            return Err(EvkmsError::UnknownNonce(nonce));
        }
        // A revoked peer must never (re-)enter the key store. The nonce stays
        // outstanding so a legitimate responder to the same broadcast can
        // still be processed.
        if state.revocation.is_revoked(&responder) {
            debug!(peer = %responder, "Ignoring key response from revoked peer");
            return Ok(());
        }

        let Some(peer_secret) = responder
            .local_id()
            .and_then(|id| state.provisioning.secret_for_local_id(id))
            .map(String::from)
        else {
            state.nonces.consume(&nonce);
            return Err(EvkmsError::UnknownPeerSecret(responder.to_string()));
        };

        let own_secret = state
            .provisioning
            .secret_i()
            .ok_or(EvkmsError::NotProvisioned)?
            .to_string();

        let key = crypto::derive_pairwise_key(
            self.identity(),
            &responder,
            &own_secret,
            &peer_secret,
            &nonce,
        );
        let material = crypto::acknowledgment_material(self.identity(), &responder, &nonce);
        let expected = crypto::pairwise_digest(&key, &material);

        if expected != response.digest {
            state.nonces.consume(&nonce);
            return Err(EvkmsError::DigestMismatch(responder.to_string()));
        }

        state.keys.insert(PairwiseKeyRecord::new(
            responder.clone(),
            key.clone(),
            nonce.clone(),
            KeyState::Established,
        ));
        state.nonces.consume(&nonce);
        info!(peer = %responder, "Established verified pairwise key");

        if state.reports.is_reported(&responder) {
            debug!(peer = %responder, "Key already reported, skipping gateway report");
            return Ok(());
        }
        let report = StatusReport::KeyEstablished {
            device_guid: self.identity().clone(),
            peer_device_guid: responder.clone(),
            key_context_nonce: nonce,
            key_hash: crypto::key_fingerprint(&key),
            timestamp: chrono::Utc::now().timestamp(),
        };
        if self.send_status(&state, report)? {
            state.reports.mark_reported(responder.clone());
            info!(peer = %responder, "Reported key establishment to gateway");
        }
        Ok(())
    }
}
