//! Error types for the EVKMS device protocol

use thiserror::Error;

/// Main error type for EVKMS protocol operations
///
/// Every inbound-message handler returns one of these kinds; the dispatch
/// layer logs the error and drops the message. No handler error propagates
/// to the transport or terminates the process.
#[derive(Error, Debug)]
pub enum EvkmsError {
    /// Payload failed to parse or is missing a required field
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Provisioning payload is incomplete; previous vectors are untouched
    #[error("Malformed provisioning payload: {0}")]
    MalformedProvisioning(String),

    /// Broadcast alert is missing its required fields
    #[error("Malformed alert: {0}")]
    MalformedAlert(String),

    /// HMAC digest verification failed (authentication failure)
    #[error("Digest mismatch from {0}")]
    DigestMismatch(String),

    /// No vector entry exists for the peer's local position
    #[error("No secret found for peer {0} in current vector")]
    UnknownPeerSecret(String),

    /// Key response references a nonce we did not issue or already resolved
    #[error("Unknown or expired discovery nonce: {0}")]
    UnknownNonce(String),

    /// Command or alert carries an unrecognized type discriminator
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// This device has been revoked; all protocol activity is gated off
    #[error("Device is revoked")]
    SelfRevoked,

    /// No provisioning material has been received yet
    #[error("Device is not provisioned")]
    NotProvisioned,

    /// JSON serialization failed on an outbound payload
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using EvkmsError
pub type EvkmsResult<T> = Result<T, EvkmsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EvkmsError::DigestMismatch("subset1_device@3".to_string());
        assert_eq!(format!("{}", err), "Digest mismatch from subset1_device@3");
    }

    #[test]
    fn test_error_from_serde() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json");
        let err: EvkmsError = bad.unwrap_err().into();
        assert!(matches!(err, EvkmsError::Serialization(_)));
    }
}
