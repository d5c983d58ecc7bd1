//! EVKMS cryptographic primitives
//!
//! Keyed digests for discovery and acknowledgment, PBKDF2 pairwise key
//! derivation, key fingerprints and nonce generation. All functions are pure;
//! no state is held here.
//!
//! ## Canonical ordering
//!
//! Pairwise derivation is symmetric only because both sides normalize their
//! inputs the same way before concatenating:
//!
//! - GUIDs are ordered by the integer after the final `@` marker; if either
//!   position is missing or the positions tie, the pair falls back to plain
//!   lexicographic string order.
//! - Secrets are ordered lexicographically, independent of which GUID they
//!   belong to.
//!
//! The two orderings are independent and must not be mixed: a peer's secret
//! does not travel with its GUID through the sort.

use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::types::DeviceGuid;

type HmacSha256 = Hmac<Sha256>;

/// PBKDF2-HMAC-SHA256 iteration count for pairwise key stretching
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Derived pairwise key length in bytes (hex-encoded to 64 chars)
pub const PAIRWISE_KEY_LEN: usize = 32;

/// Generate a cryptographically secure discovery nonce
///
/// Format: `NONCE_` followed by 16 hex characters (8 random bytes).
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    format!("NONCE_{}", hex::encode(bytes))
}

/// Keyed digest authenticating a discovery announcement
///
/// HMAC-SHA256 over `guid ‖ nonce` keyed by the announcing device's secret.
/// Deterministic: identical inputs always produce identical output.
pub fn discovery_digest(secret: &str, guid: &str, nonce: &str) -> String {
    hmac_hex(secret.as_bytes(), format!("{}{}", guid, nonce).as_bytes())
}

/// Keyed digest proving possession of a pairwise key
///
/// HMAC-SHA256 over an arbitrary material string keyed by the hex-encoded
/// pairwise key. Used by the responder to build the acknowledgment and by
/// the initiator to verify it; both sides must construct identical material.
pub fn pairwise_digest(key_hex: &str, material: &str) -> String {
    hmac_hex(key_hex.as_bytes(), material.as_bytes())
}

/// Order a GUID pair canonically for key derivation
///
/// Numeric local positions decide the order; a missing or non-numeric
/// position on either side, or a positional tie, falls back to lexicographic
/// comparison of the full GUID strings.
pub fn canonical_guid_order<'a>(
    a: &'a DeviceGuid,
    b: &'a DeviceGuid,
) -> (&'a DeviceGuid, &'a DeviceGuid) {
    let ordered = match (a.local_position(), b.local_position()) {
        (Some(pa), Some(pb)) if pa != pb => pa < pb,
        _ => a.as_str() <= b.as_str(),
    };
    if ordered {
        (a, b)
    } else {
        (b, a)
    }
}

/// The acknowledgment material both sides of a key agreement digest over
///
/// `guid_a ‖ guid_b ‖ nonce` with the GUIDs in canonical order.
pub fn acknowledgment_material(own: &DeviceGuid, peer: &DeviceGuid, nonce: &str) -> String {
    let (guid_a, guid_b) = canonical_guid_order(own, peer);
    format!("{}{}{}", guid_a, guid_b, nonce)
}

/// Derive the pairwise key shared between two devices
///
/// Key material is `guid_a ‖ guid_b ‖ nonce ‖ secret_a ‖ secret_b` with the
/// GUIDs canonically ordered and the secrets in ascending lexicographic
/// order, stretched through [`PBKDF2_ITERATIONS`] rounds of
/// PBKDF2-HMAC-SHA256 salted by the nonce. Symmetric by construction: both
/// peers, each holding its own secret and the other's vector entry, obtain
/// an identical hex-encoded key without it ever traversing the network.
pub fn derive_pairwise_key(
    own_guid: &DeviceGuid,
    peer_guid: &DeviceGuid,
    own_secret: &str,
    peer_secret: &str,
    nonce: &str,
) -> String {
    let (guid_a, guid_b) = canonical_guid_order(own_guid, peer_guid);
    let (secret_a, secret_b) = if own_secret <= peer_secret {
        (own_secret, peer_secret)
    } else {
        (peer_secret, own_secret)
    };

    let material = format!("{}{}{}{}{}", guid_a, guid_b, nonce, secret_a, secret_b);

    let mut key = [0u8; PAIRWISE_KEY_LEN];
    pbkdf2_hmac::<Sha256>(
        material.as_bytes(),
        nonce.as_bytes(),
        PBKDF2_ITERATIONS,
        &mut key,
    );
    hex::encode(key)
}

/// One-way fingerprint of a key for external reporting
///
/// SHA-256 of the hex-encoded key; safe to send to the gateway in place of
/// the key material itself.
pub fn key_fingerprint(key_hex: &str) -> String {
    hex::encode(Sha256::digest(key_hex.as_bytes()))
}

/// One-way refresh transformation: `new_key = SHA-256(old_key ‖ nonce)`
///
/// Compromise of the refreshed key does not reveal its predecessor.
pub fn refreshed_key(old_key_hex: &str, refresh_nonce: &str) -> String {
    hex::encode(Sha256::digest(
        format!("{}{}", old_key_hex, refresh_nonce).as_bytes(),
    ))
}

fn hmac_hex(key: &[u8], data: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts keys of any length");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_format() {
        let nonce = generate_nonce();
        assert!(nonce.starts_with("NONCE_"));
        assert_eq!(nonce.len(), 6 + 16);
        assert!(nonce[6..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_nonce_uniqueness() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_ne!(a, b);
    }

    #[test]
    fn test_discovery_digest_deterministic() {
        let d1 = discovery_digest("secret", "subset1_device@1", "NONCE_aabb");
        let d2 = discovery_digest("secret", "subset1_device@1", "NONCE_aabb");
        assert_eq!(d1, d2);
        assert_eq!(d1.len(), 64);
    }

    #[test]
    fn test_discovery_digest_input_sensitivity() {
        let base = discovery_digest("secret", "subset1_device@1", "NONCE_aabb");
        assert_ne!(base, discovery_digest("secre7", "subset1_device@1", "NONCE_aabb"));
        assert_ne!(base, discovery_digest("secret", "subset1_device@2", "NONCE_aabb"));
        assert_ne!(base, discovery_digest("secret", "subset1_device@1", "NONCE_aabc"));
    }

    #[test]
    fn test_canonical_order_by_position() {
        let low = DeviceGuid::new("g@2");
        let high = DeviceGuid::new("g@10");
        // Numeric order, not lexicographic ("10" < "2" as strings)
        assert_eq!(canonical_guid_order(&high, &low), (&low, &high));
        assert_eq!(canonical_guid_order(&low, &high), (&low, &high));
    }

    #[test]
    fn test_canonical_order_lexicographic_fallback() {
        let a = DeviceGuid::new("alpha-node");
        let b = DeviceGuid::new("beta-node");
        assert_eq!(canonical_guid_order(&b, &a), (&a, &b));
    }

    #[test]
    fn test_canonical_order_position_tie_falls_back() {
        let a = DeviceGuid::new("aaa@3");
        let b = DeviceGuid::new("bbb@3");
        assert_eq!(canonical_guid_order(&b, &a), (&a, &b));
    }

    #[test]
    fn test_key_symmetry() {
        let guid_a = DeviceGuid::new("g@1");
        let guid_b = DeviceGuid::new("g@2");

        let key_from_a =
            derive_pairwise_key(&guid_a, &guid_b, "alpha-secret", "beta-secret", "NONCE_test1");
        let key_from_b =
            derive_pairwise_key(&guid_b, &guid_a, "beta-secret", "alpha-secret", "NONCE_test1");

        assert_eq!(key_from_a, key_from_b);
        assert_eq!(key_from_a.len(), PAIRWISE_KEY_LEN * 2);
    }

    #[test]
    fn test_key_depends_on_nonce() {
        let guid_a = DeviceGuid::new("g@1");
        let guid_b = DeviceGuid::new("g@2");

        let k1 = derive_pairwise_key(&guid_a, &guid_b, "sa", "sb", "NONCE_one");
        let k2 = derive_pairwise_key(&guid_a, &guid_b, "sa", "sb", "NONCE_two");
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_acknowledgment_material_symmetric() {
        let guid_a = DeviceGuid::new("g@1");
        let guid_b = DeviceGuid::new("g@2");
        assert_eq!(
            acknowledgment_material(&guid_a, &guid_b, "NONCE_x"),
            acknowledgment_material(&guid_b, &guid_a, "NONCE_x"),
        );
        assert_eq!(acknowledgment_material(&guid_a, &guid_b, "NONCE_x"), "g@1g@2NONCE_x");
    }

    #[test]
    fn test_fingerprint_differs_from_key() {
        let key = "ab".repeat(32);
        let fp = key_fingerprint(&key);
        assert_ne!(fp, key);
        assert_eq!(fp.len(), 64);
        // Deterministic
        assert_eq!(fp, key_fingerprint(&key));
    }

    #[test]
    fn test_refresh_chain() {
        let k0 = "cd".repeat(32);
        let k1 = refreshed_key(&k0, "NONCE_r1");
        let k2 = refreshed_key(&k1, "NONCE_r2");

        assert_ne!(k0, k1);
        assert_ne!(k1, k2);
        // Each link is a function of exactly the preceding key and the nonce
        assert_eq!(k2, refreshed_key(&refreshed_key(&k0, "NONCE_r1"), "NONCE_r2"));
    }

    #[test]
    fn test_refresh_different_nonces_diverge() {
        let k0 = "ef".repeat(32);
        assert_ne!(refreshed_key(&k0, "NONCE_a"), refreshed_key(&k0, "NONCE_b"));
    }
}
