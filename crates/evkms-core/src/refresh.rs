//! Gateway-driven key refresh
//!
//! Refreshes transform existing pairwise keys in place through a one-way
//! hash chain keyed by a gateway-supplied nonce; the old key is never
//! recoverable from the new one. Two triggers exist: a targeted command on
//! the per-device command address (all peers or one named peer) and a
//! subset-wide scheduled broadcast on the alert address. Both are no-ops for
//! a self-revoked device, checked before the payload is even parsed.

use tracing::{info, warn};

use crate::error::{EvkmsError, EvkmsResult};
use crate::protocol::{DeviceCommand, StatusReport};
use crate::session::{DeviceSession, SessionState};

impl DeviceSession {
    /// Handle a refresh command from the per-device command address
    ///
    /// Refresh-all walks every stored record; refresh-specific touches one
    /// named peer, where a missing record is a zero-count no-op, not a
    /// fault. A single acknowledgment summarizing the outcome is published
    /// to the gateway (skipped, with a warning, if no gateway is bound yet).
    pub(crate) fn handle_command(&self, payload: &[u8]) -> EvkmsResult<()> {
        let mut state = self.state_mut();
        if state.revocation.is_self_revoked() {
            return Err(EvkmsError::SelfRevoked);
        }

        let command = DeviceCommand::from_slice(payload)?;
        let (count, refreshed_peer, was_central, task_id) = match command {
            DeviceCommand::RefreshAll {
                refresh_nonce,
                task_id,
                ..
            } => {
                info!(nonce = %refresh_nonce, "Refreshing all related pairwise keys");
                (state.keys.refresh_all(&refresh_nonce), None, true, task_id)
            }
            DeviceCommand::RefreshSpecific {
                refresh_nonce,
                task_id,
                target_peer_guid,
                ..
            } => {
                info!(peer = %target_peer_guid, nonce = %refresh_nonce, "Refreshing specific pairwise key");
                let refreshed = state.keys.refresh(&target_peer_guid, &refresh_nonce);
                if !refreshed {
                    warn!(peer = %target_peer_guid, "Skipping refresh - key missing for this peer");
                }
                (
                    usize::from(refreshed),
                    Some(target_peer_guid),
                    false,
                    task_id,
                )
            }
        };
        info!(count, "Pairwise keys refreshed");

        let report = StatusReport::RefreshProcessed {
            device_guid: self.identity().clone(),
            task_id: task_id.clone(),
            timestamp: chrono::Utc::now().timestamp(),
            peer_keys_refreshed_count: count,
            refreshed_peer_guid: refreshed_peer,
            was_central_refresh: was_central,
        };
        if self.send_status(&state, report)? {
            info!(task_id = ?task_id, "Sent pairwise key refresh ACK to gateway");
        }
        Ok(())
    }

    /// Handle a subset-wide scheduled refresh broadcast
    ///
    /// Refreshes every stored pairwise key with the broadcast nonce and
    /// acknowledges completion to the gateway.
    pub(crate) fn handle_scheduled_refresh(
        &self,
        state: &mut SessionState,
        refresh_nonce: &str,
        issuer: Option<String>,
        task_id: Option<String>,
    ) -> EvkmsResult<()> {
        if state.revocation.is_self_revoked() {
            return Err(EvkmsError::SelfRevoked);
        }

        info!(nonce = %refresh_nonce, "Received scheduled key refresh broadcast");
        let count = state.keys.refresh_all(refresh_nonce);

        let report = StatusReport::ScheduledRefreshCompleted {
            device_guid: self.identity().clone(),
            task_id: task_id.clone(),
            timestamp: chrono::Utc::now().timestamp(),
            keys_refreshed_count: count,
            issuer,
        };
        if self.send_status(state, report)? {
            info!(task_id = ?task_id, "Sent scheduled key refresh ACK");
        }
        Ok(())
    }
}
