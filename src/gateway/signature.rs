//! Payment signature verification.
//!
//! The gateway attests a completed payment by signing
//! `"{order_id}|{payment_id}"` with HMAC-SHA256 under the shared key secret
//! and hex-encoding the digest. Verification recomputes the digest and
//! compares byte-for-byte. A mismatch is a hard rejection for the request
//! (callers must not process anything after it) but never a panic or an
//! error from this module.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::config::Secret;

type HmacSha256 = Hmac<Sha256>;

/// Verifies that a claimed payment signature was produced by the gateway.
///
/// Pure over its inputs: the same `(order_id, payment_id, signature)` triple
/// always yields the same accept/reject outcome. The key secret is never
/// logged; neither is the expected digest, which would hand an attacker the
/// correct answer.
#[derive(Debug)]
pub struct SignatureVerifier {
    secret: Secret,
}

impl SignatureVerifier {
    /// Creates a verifier over the gateway key secret.
    #[must_use]
    pub fn new(secret: Secret) -> Self {
        Self { secret }
    }

    /// Computes the signature the gateway produces for an order/payment pair.
    ///
    /// Exposed for test fixtures and local gateway emulation.
    #[must_use]
    pub fn expected_signature(&self, order_id: &str, payment_id: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose().as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(order_id.as_bytes());
        mac.update(b"|");
        mac.update(payment_id.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Returns whether `claimed` matches the expected signature.
    #[instrument(skip(self, claimed), fields(order_id, payment_id))]
    #[must_use]
    pub fn verify(&self, order_id: &str, payment_id: &str, claimed: &str) -> bool {
        let expected = self.expected_signature(order_id, payment_id);
        let valid = expected.as_bytes() == claimed.as_bytes();
        if valid {
            debug!("payment signature verified");
        } else {
            warn!(order_id, "payment signature mismatch");
        }
        valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new(Secret::new("test-key-secret"))
    }

    #[test]
    fn test_valid_signature_accepted() {
        let v = verifier();
        let signature = v.expected_signature("order_1", "pay_1");
        assert!(v.verify("order_1", "pay_1", &signature));
    }

    #[test]
    fn test_verification_is_deterministic() {
        let v = verifier();
        let first = v.expected_signature("order_1", "pay_1");
        let second = v.expected_signature("order_1", "pay_1");
        assert_eq!(first, second);
    }

    #[test]
    fn test_single_character_change_rejects() {
        let v = verifier();
        let mut signature = v.expected_signature("order_1", "pay_1");
        // Flip the last hex digit.
        let last = signature.pop().unwrap();
        signature.push(if last == '0' { '1' } else { '0' });
        assert!(!v.verify("order_1", "pay_1", &signature));
    }

    #[test]
    fn test_swapped_ids_reject() {
        let v = verifier();
        let signature = v.expected_signature("order_1", "pay_1");
        assert!(!v.verify("pay_1", "order_1", &signature));
    }

    #[test]
    fn test_different_secret_rejects() {
        let signature = verifier().expected_signature("order_1", "pay_1");
        let other = SignatureVerifier::new(Secret::new("other-secret"));
        assert!(!other.verify("order_1", "pay_1", &signature));
    }

    #[test]
    fn test_empty_claimed_signature_rejects_without_panic() {
        assert!(!verifier().verify("order_1", "pay_1", ""));
    }

    #[test]
    fn test_known_digest_is_hex_sha256_length() {
        let signature = verifier().expected_signature("order_1", "pay_1");
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
