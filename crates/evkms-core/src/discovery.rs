//! Periodic authenticated discovery broadcasts and nonce tracking
//!
//! Each broadcast carries a fresh nonce bound to the announcement digest;
//! the nonce is the only thing that correlates an inbound key response with
//! the discovery that solicited it. Outstanding nonces live at most
//! [`NONCE_TTL`] and are swept lazily on each new broadcast rather than by
//! an active timer: an expired nonce is simply never matched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::crypto;
use crate::error::{EvkmsError, EvkmsResult};
use crate::protocol::DiscoveryAnnouncement;
use crate::session::DeviceSession;
use crate::topics;

/// Time-to-live for a self-issued discovery nonce
pub const NONCE_TTL: Duration = Duration::from_secs(60);

/// Discovery broadcast period bounds; the period is sampled once at task
/// start so co-started devices do not storm the broker in lockstep
pub const DISCOVERY_PERIOD_MIN_SECS: f64 = 60.0;
pub const DISCOVERY_PERIOD_MAX_SECS: f64 = 120.0;

/// Outstanding self-issued discovery nonces with their issue times
#[derive(Debug)]
pub struct NonceLedger {
    outstanding: HashMap<String, Instant>,
    ttl: Duration,
}

impl Default for NonceLedger {
    fn default() -> Self {
        Self::with_ttl(NONCE_TTL)
    }
}

impl NonceLedger {
    /// Create a ledger with the standard TTL
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger with a custom TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            outstanding: HashMap::new(),
            ttl,
        }
    }

    /// Record a freshly issued nonce, sweeping expired entries first
    pub fn record(&mut self, nonce: String) {
        let swept = self.sweep();
        if swept > 0 {
            debug!(swept, "Swept expired discovery nonces");
        }
        self.outstanding.insert(nonce, Instant::now());
    }

    /// Whether the nonce is outstanding and within its TTL
    pub fn contains(&self, nonce: &str) -> bool {
        self.outstanding
            .get(nonce)
            .is_some_and(|issued| issued.elapsed() < self.ttl)
    }

    /// Consume (release) a nonce; returns true if it was outstanding
    pub fn consume(&mut self, nonce: &str) -> bool {
        self.outstanding.remove(nonce).is_some()
    }

    /// Remove entries older than the TTL, returning how many were dropped
    pub fn sweep(&mut self) -> usize {
        let before = self.outstanding.len();
        let ttl = self.ttl;
        self.outstanding.retain(|_, issued| issued.elapsed() < ttl);
        before - self.outstanding.len()
    }

    /// Number of tracked nonces, including not-yet-swept expired ones
    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    /// Whether no nonce is tracked
    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }
}

/// Handle to the running periodic discovery task
///
/// The task broadcasts immediately and then on every period tick until
/// [`DiscoveryTask::stop`] is called.
pub struct DiscoveryTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl DiscoveryTask {
    /// Signal the task to stop and wait for it to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

impl DeviceSession {
    /// Broadcast an authenticated discovery announcement
    ///
    /// Gated: returns [`EvkmsError::SelfRevoked`] or
    /// [`EvkmsError::NotProvisioned`] without touching any state when the
    /// device must stay silent. Otherwise issues a nonce, records it with
    /// the current time (sweeping stale entries opportunistically) and
    /// publishes `{guid, subset, nonce, digest}` on the subset discovery
    /// address.
    pub fn broadcast_discovery(&self) -> EvkmsResult<()> {
        let mut state = self.state_mut();
        if state.revocation.is_self_revoked() {
            return Err(EvkmsError::SelfRevoked);
        }
        let secret = state
            .provisioning
            .secret_i()
            .ok_or(EvkmsError::NotProvisioned)?
            .to_string();

        let nonce = crypto::generate_nonce();
        state.nonces.record(nonce.clone());

        let announcement = DiscoveryAnnouncement {
            guid: self.identity().clone(),
            subset: self.subset().to_string(),
            nonce: nonce.clone(),
            digest: crypto::discovery_digest(&secret, self.identity().as_str(), &nonce),
        };
        let bytes = serde_json::to_vec(&announcement)?;
        drop(state);

        self.publisher()
            .publish(&topics::discovery_topic(self.subset()), bytes);
        debug!(nonce = %announcement.nonce, "Broadcasted discovery message");
        Ok(())
    }

    /// Handle an inbound discovery announcement from the subset topic
    ///
    /// No-ops (without error) on self-originated announcements, revoked
    /// peers, and peers we already hold a pairwise key for; the last guard
    /// is what prevents duplicate key agreements from repeated broadcasts.
    /// Valid, non-duplicate announcements go to the responder path of the
    /// key agreement.
    pub(crate) fn handle_discovery(&self, payload: &[u8]) -> EvkmsResult<()> {
        let mut state = self.state_mut();
        if state.revocation.is_self_revoked() {
            return Err(EvkmsError::SelfRevoked);
        }
        if !state.provisioning.is_provisioned() {
            return Err(EvkmsError::NotProvisioned);
        }

        let announcement: DiscoveryAnnouncement = serde_json::from_slice(payload)
            .map_err(|e| EvkmsError::MalformedPayload(e.to_string()))?;

        if announcement.guid == *self.identity() {
            return Ok(());
        }
        if state.revocation.is_revoked(&announcement.guid) {
            debug!(peer = %announcement.guid, "Ignoring discovery from revoked peer");
            return Ok(());
        }
        if state.keys.contains(&announcement.guid) {
            debug!(peer = %announcement.guid, "Already have pairwise key, ignoring discovery");
            return Ok(());
        }

        info!(peer = %announcement.guid, "Received discovery");
        self.respond_to_discovery(&mut state, &announcement)
    }

    /// Start the periodic discovery broadcast task
    ///
    /// The period is sampled uniformly from [60 s, 120 s) once. The task
    /// broadcasts on every tick (gating conditions are just skipped) and
    /// stops promptly when the returned handle's `stop` is awaited.
    pub fn start_discovery_task(self: &Arc<Self>) -> DiscoveryTask {
        let period = Duration::from_secs_f64(
            rand::rng().random_range(DISCOVERY_PERIOD_MIN_SECS..DISCOVERY_PERIOD_MAX_SECS),
        );
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let session = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => match session.broadcast_discovery() {
                        Ok(()) => {}
                        Err(EvkmsError::SelfRevoked) => {
                            debug!("Device is revoked, skipping discovery broadcast")
                        }
                        Err(EvkmsError::NotProvisioned) => {
                            debug!("Not provisioned yet, skipping discovery broadcast")
                        }
                        Err(e) => warn!(error = %e, "Discovery broadcast failed"),
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("Discovery task stopped");
        });

        info!(period_secs = period.as_secs_f64(), "Started discovery protocol");
        DiscoveryTask { shutdown, handle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalBus;
    use crate::types::DeviceGuid;

    #[test]
    fn test_nonce_record_and_consume() {
        let mut ledger = NonceLedger::new();
        ledger.record("NONCE_a".to_string());

        assert!(ledger.contains("NONCE_a"));
        assert!(ledger.consume("NONCE_a"));
        assert!(!ledger.contains("NONCE_a"));
        assert!(!ledger.consume("NONCE_a"));
    }

    #[test]
    fn test_expired_nonce_never_matches() {
        let mut ledger = NonceLedger::with_ttl(Duration::ZERO);
        ledger.record("NONCE_a".to_string());
        assert!(!ledger.contains("NONCE_a"));
    }

    #[test]
    fn test_record_sweeps_expired_entries() {
        let mut ledger = NonceLedger::with_ttl(Duration::ZERO);
        ledger.record("NONCE_a".to_string());
        ledger.record("NONCE_b".to_string());
        // Each record() swept the previous zero-TTL entry
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_sweep_keeps_fresh_entries() {
        let mut ledger = NonceLedger::new();
        ledger.record("NONCE_a".to_string());
        ledger.record("NONCE_b".to_string());
        assert_eq!(ledger.sweep(), 0);
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test]
    async fn test_discovery_task_stops_cleanly() {
        let bus = LocalBus::new();
        let session = Arc::new(DeviceSession::new(
            DeviceGuid::new("subset1_device@1"),
            "LR01",
            bus,
        ));

        let task = session.start_discovery_task();
        task.stop().await;
    }

    #[test]
    fn test_broadcast_gated_while_unprovisioned() {
        let bus = LocalBus::new();
        let mut rx = bus.subscribe(vec![topics::discovery_topic("LR01")]);
        let session = DeviceSession::new(DeviceGuid::new("subset1_device@1"), "LR01", bus);

        let err = session.broadcast_discovery().unwrap_err();
        assert!(matches!(err, EvkmsError::NotProvisioned));
        assert!(rx.try_recv().is_err());
    }
}
