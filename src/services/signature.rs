//! Webhook signature verification.
//!
//! Providers sign the raw request body with an HMAC keyed by a shared secret
//! and send the hex digest in a header. Verification fails closed: empty
//! inputs, undecodable signatures and mismatches all return `false`.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureAlgorithm {
    HmacSha256,
    HmacSha512,
}

pub fn verify(raw_body: &[u8], provided_signature: &str, secret: &str, algorithm: SignatureAlgorithm) -> bool {
    let provided_signature = provided_signature.trim();
    if provided_signature.is_empty() || secret.is_empty() {
        return false;
    }

    let Ok(expected) = hex::decode(provided_signature) else {
        return false;
    };

    match algorithm {
        SignatureAlgorithm::HmacSha256 => verify_mac::<HmacSha256>(raw_body, &expected, secret),
        SignatureAlgorithm::HmacSha512 => verify_mac::<HmacSha512>(raw_body, &expected, secret),
    }
}

/// Hex-encoded HMAC of `raw_body`.
pub fn sign(raw_body: &[u8], secret: &str, algorithm: SignatureAlgorithm) -> String {
    match algorithm {
        SignatureAlgorithm::HmacSha256 => sign_mac::<HmacSha256>(raw_body, secret),
        SignatureAlgorithm::HmacSha512 => sign_mac::<HmacSha512>(raw_body, secret),
    }
}

fn verify_mac<M: Mac + KeyInit>(raw_body: &[u8], expected: &[u8], secret: &str) -> bool {
    let Ok(mut mac) = <M as Mac>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);
    // verify_slice compares in constant time
    mac.verify_slice(expected).is_ok()
}

fn sign_mac<M: Mac + KeyInit>(raw_body: &[u8], secret: &str) -> String {
    match <M as Mac>::new_from_slice(secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(raw_body);
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "sk_test_reconcile";
    const BODY: &[u8] = br#"{"event":"charge.success","data":{"reference":"R1"}}"#;

    #[test]
    fn test_valid_signature_is_accepted() {
        for algorithm in [SignatureAlgorithm::HmacSha256, SignatureAlgorithm::HmacSha512] {
            let signature = sign(BODY, SECRET, algorithm);
            assert!(verify(BODY, &signature, SECRET, algorithm));
        }
    }

    #[test]
    fn test_signature_lengths_match_digest() {
        assert_eq!(sign(BODY, SECRET, SignatureAlgorithm::HmacSha256).len(), 64);
        assert_eq!(sign(BODY, SECRET, SignatureAlgorithm::HmacSha512).len(), 128);
    }

    #[test]
    fn test_single_byte_change_in_body_fails() {
        let signature = sign(BODY, SECRET, SignatureAlgorithm::HmacSha512);
        for i in 0..BODY.len() {
            let mut tampered = BODY.to_vec();
            tampered[i] ^= 0x01;
            assert!(!verify(&tampered, &signature, SECRET, SignatureAlgorithm::HmacSha512));
        }
    }

    #[test]
    fn test_single_byte_change_in_secret_fails() {
        let signature = sign(BODY, SECRET, SignatureAlgorithm::HmacSha512);
        assert!(!verify(BODY, &signature, "sk_test_reconcilf", SignatureAlgorithm::HmacSha512));
    }

    #[test]
    fn test_fails_closed_on_empty_or_garbage_input() {
        let signature = sign(BODY, SECRET, SignatureAlgorithm::HmacSha512);
        assert!(!verify(BODY, "", SECRET, SignatureAlgorithm::HmacSha512));
        assert!(!verify(BODY, &signature, "", SignatureAlgorithm::HmacSha512));
        assert!(!verify(BODY, "not-hex!", SECRET, SignatureAlgorithm::HmacSha512));
    }

    #[test]
    fn test_algorithm_mismatch_fails() {
        let signature = sign(BODY, SECRET, SignatureAlgorithm::HmacSha256);
        assert!(!verify(BODY, &signature, SECRET, SignatureAlgorithm::HmacSha512));
    }

    #[test]
    fn test_algorithm_names_deserialize() {
        let algorithm: SignatureAlgorithm = serde_json::from_str("\"hmac-sha512\"").unwrap();
        assert_eq!(algorithm, SignatureAlgorithm::HmacSha512);
    }
}
