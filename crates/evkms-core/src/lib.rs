//! EVKMS Device Protocol Core
//!
//! Device-side half of an Exclusion-based Vector Key Management Scheme:
//! peer devices in an IoT subset, once provisioned by a gateway with secret
//! vector material, autonomously discover each other, derive authenticated
//! pairwise symmetric keys without a live trusted third party, refresh those
//! keys on command, and revoke compromised peers network-wide.
//!
//! ## Overview
//!
//! - **Discovery**: each device periodically broadcasts an authenticated
//!   announcement carrying a fresh nonce.
//! - **Key agreement**: a receiving peer verifies the announcement against
//!   the subset's current secret vector, derives the pairwise key locally,
//!   and answers with a digest proving possession; the initiator verifies
//!   the digest and promotes the key to Established. The key itself never
//!   traverses the network.
//! - **Revocation**: subset-wide alerts permanently exclude a device and
//!   purge its key material everywhere.
//! - **Refresh**: gateway-issued nonces advance existing keys through a
//!   one-way hash chain.
//!
//! All messages are UTF-8 JSON values on an at-least-once pub/sub transport;
//! the transport itself sits behind the [`transport::Publisher`] trait.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use evkms_core::{DeviceGuid, DeviceSession, LocalBus};
//!
//! let bus = LocalBus::new();
//! let session = Arc::new(DeviceSession::new(
//!     DeviceGuid::new("subset1_device@1"),
//!     "LR01",
//!     bus.clone(),
//! ));
//!
//! // Feed inbound messages from the transport:
//! let mut rx = bus.subscribe(session.subscriptions());
//! // session.on_message(&msg.topic, &msg.payload) for each received message
//!
//! // And start the periodic discovery broadcasts:
//! let task = session.start_discovery_task();
//! // ... task.stop().await at shutdown
//! ```

pub mod agreement;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod keystore;
pub mod protocol;
pub mod provisioning;
pub mod refresh;
pub mod reporting;
pub mod revocation;
pub mod session;
pub mod topics;
pub mod transport;
pub mod types;

// Re-exports
pub use discovery::{DiscoveryTask, NonceLedger};
pub use error::{EvkmsError, EvkmsResult};
pub use keystore::KeyStore;
pub use protocol::{
    DeviceCommand, DiscoveryAnnouncement, KeyResponse, ProvisioningPayload, StatusReport,
    SubsetAlert,
};
pub use provisioning::ProvisioningStore;
pub use reporting::ReportingLedger;
pub use revocation::RevocationRegistry;
pub use session::DeviceSession;
pub use transport::{InboundMessage, LocalBus, Publisher};
pub use types::{DeviceGuid, KeyState, PairwiseKeyRecord, ProvisioningVectors};
