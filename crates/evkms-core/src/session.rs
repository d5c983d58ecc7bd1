//! Device session: the protocol driver and owner of all shared state
//!
//! `DeviceSession` is the single explicit context object for one device.
//! It owns the provisioning store, key store, revocation registry, nonce
//! ledger, reporting ledger and gateway binding behind one mutex, and it is
//! what both activity sources drive: the periodic discovery timer and the
//! inbound-message dispatch. Handlers never block on I/O; every outbound
//! send is a fire-and-forget publish through the session's [`Publisher`].
//!
//! Every inbound handler returns an [`EvkmsResult`]; `on_message` is the
//! single place that turns a handler error into log-and-drop. Nothing
//! propagates to the transport and nothing terminates the process.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::discovery::NonceLedger;
use crate::error::{EvkmsError, EvkmsResult};
use crate::keystore::KeyStore;
use crate::protocol::{ProvisioningPayload, StatusReport, SubsetAlert};
use crate::provisioning::ProvisioningStore;
use crate::reporting::ReportingLedger;
use crate::revocation::RevocationRegistry;
use crate::topics::{self, Inbound};
use crate::transport::Publisher;
use crate::types::{DeviceGuid, PairwiseKeyRecord};

/// All mutable protocol state, serialized behind the session's mutex
pub(crate) struct SessionState {
    pub(crate) provisioning: ProvisioningStore,
    pub(crate) keys: KeyStore,
    pub(crate) revocation: RevocationRegistry,
    pub(crate) nonces: NonceLedger,
    pub(crate) reports: ReportingLedger,
    /// Gateway GUID recovered from the most recent provisioning topic
    pub(crate) gateway: Option<String>,
}

/// One device's half of the EVKMS protocol
pub struct DeviceSession {
    identity: DeviceGuid,
    subset: String,
    publisher: Arc<dyn Publisher>,
    state: Mutex<SessionState>,
}

impl DeviceSession {
    /// Create a session for a device identity within a subset
    pub fn new(
        identity: DeviceGuid,
        subset: impl Into<String>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            identity,
            subset: subset.into(),
            publisher,
            state: Mutex::new(SessionState {
                provisioning: ProvisioningStore::new(),
                keys: KeyStore::new(),
                revocation: RevocationRegistry::new(),
                nonces: NonceLedger::new(),
                reports: ReportingLedger::new(),
                gateway: None,
            }),
        }
    }

    /// This device's identity
    pub fn identity(&self) -> &DeviceGuid {
        &self.identity
    }

    /// The subset this device belongs to
    pub fn subset(&self) -> &str {
        &self.subset
    }

    pub(crate) fn publisher(&self) -> &dyn Publisher {
        &*self.publisher
    }

    pub(crate) fn state_mut(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }

    /// The topic filters this device must be subscribed to
    pub fn subscriptions(&self) -> Vec<String> {
        vec![
            topics::config_filter(&self.identity),
            topics::command_filter(&self.identity),
            topics::key_response_topic(&self.identity),
            topics::discovery_topic(&self.subset),
            topics::alert_topic(&self.subset),
        ]
    }

    /// Dispatch one inbound message
    ///
    /// Classifies the topic against this device's addresses and routes to
    /// the matching handler. All handler failures are logged and the
    /// message dropped; gating conditions (revoked, unprovisioned) log at
    /// debug, real faults at warn.
    pub fn on_message(&self, topic: &str, payload: &[u8]) {
        let result = match topics::classify(topic, &self.identity, &self.subset) {
            Some(Inbound::Provisioning) => self.handle_provisioning(topic, payload),
            Some(Inbound::Command) => self.handle_command(payload),
            Some(Inbound::KeyResponse) => self.handle_key_response(payload),
            Some(Inbound::Discovery) => self.handle_discovery(payload),
            Some(Inbound::Alert) => self.handle_alert(payload),
            None => {
                debug!(%topic, "Ignoring message on unrecognized topic");
                Ok(())
            }
        };

        match result {
            Ok(()) => {}
            Err(e @ (EvkmsError::SelfRevoked | EvkmsError::NotProvisioned)) => {
                debug!(%topic, reason = %e, "Dropped message")
            }
            Err(e) => warn!(%topic, error = %e, "Dropped message"),
        }
    }

    /// Load a provisioning payload and acknowledge it to the gateway
    ///
    /// The gateway GUID comes from the config topic itself and is cached as
    /// the session's gateway binding. A malformed payload changes nothing:
    /// neither the vectors nor the binding.
    fn handle_provisioning(&self, topic: &str, payload: &[u8]) -> EvkmsResult<()> {
        let parsed: ProvisioningPayload = serde_json::from_slice(payload)
            .map_err(|e| EvkmsError::MalformedProvisioning(e.to_string()))?;
        let gateway = topics::gateway_from_config_topic(topic)
            .ok_or_else(|| {
                EvkmsError::MalformedPayload("config topic without gateway segment".to_string())
            })?
            .to_string();
        let task_id = parsed.task_id.clone();

        let mut state = self.state_mut();
        state.provisioning.load(parsed, &self.identity)?;
        state.gateway = Some(gateway.clone());
        info!(%gateway, "Received and loaded provisioning config");

        let report = StatusReport::Provisioned {
            device_guid: self.identity.clone(),
            task_id,
            timestamp: chrono::Utc::now().timestamp(),
        };
        if self.send_status(&state, report)? {
            info!("Sent provisioning acknowledgment to gateway");
        }
        Ok(())
    }

    /// Route a subset broadcast alert by its type discriminator
    fn handle_alert(&self, payload: &[u8]) -> EvkmsResult<()> {
        let alert = SubsetAlert::from_slice(payload)?;
        let mut state = self.state_mut();
        match alert {
            SubsetAlert::Revocation {
                revoked_guid,
                issuer,
            } => self.handle_revocation(&mut state, revoked_guid, issuer),
            SubsetAlert::ScheduledRefresh {
                refresh_nonce,
                issuer,
                task_id,
            } => self.handle_scheduled_refresh(&mut state, &refresh_nonce, issuer, task_id),
        }
    }

    /// Publish a status report to the bound gateway
    ///
    /// Returns Ok(false) when no gateway is known yet; the triggering
    /// operation has still happened, only the report is skipped.
    pub(crate) fn send_status(
        &self,
        state: &SessionState,
        report: StatusReport,
    ) -> EvkmsResult<bool> {
        let Some(gateway) = state.gateway.as_deref() else {
            warn!("Discovered gateway GUID not set, cannot send status report");
            return Ok(false);
        };
        let bytes = serde_json::to_vec(&report)?;
        self.publisher
            .publish(&topics::status_topic(gateway, &self.identity), bytes);
        Ok(true)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Observers
    // ═══════════════════════════════════════════════════════════════════

    /// Whether provisioning material has been loaded
    pub fn is_provisioned(&self) -> bool {
        self.state.lock().provisioning.is_provisioned()
    }

    /// Whether this device has been revoked (terminal)
    pub fn is_self_revoked(&self) -> bool {
        self.state.lock().revocation.is_self_revoked()
    }

    /// Whether a peer is known to be revoked
    pub fn is_peer_revoked(&self, peer: &DeviceGuid) -> bool {
        self.state.lock().revocation.is_revoked(peer)
    }

    /// The pairwise key record for a peer, if any
    pub fn pairwise_key(&self, peer: &DeviceGuid) -> Option<PairwiseKeyRecord> {
        self.state.lock().keys.get(peer).cloned()
    }

    /// Number of peers with a stored pairwise key
    pub fn pairwise_key_count(&self) -> usize {
        self.state.lock().keys.len()
    }

    /// All peers with a stored pairwise key
    pub fn pairwise_peers(&self) -> Vec<DeviceGuid> {
        self.state.lock().keys.peers()
    }

    /// The gateway GUID bound by the most recent provisioning, if any
    pub fn gateway(&self) -> Option<String> {
        self.state.lock().gateway.clone()
    }

    /// Whether a key establishment report has been sent for this peer
    pub fn has_reported(&self, peer: &DeviceGuid) -> bool {
        self.state.lock().reports.is_reported(peer)
    }

    /// Number of outstanding (unexpired or not-yet-swept) discovery nonces
    pub fn outstanding_nonce_count(&self) -> usize {
        self.state.lock().nonces.len()
    }
}
