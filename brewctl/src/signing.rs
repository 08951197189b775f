//! HMAC-SHA256 credential signing.
//!
//! One signer capability, two canonicalizations: the remember-me token codec
//! signs a dotted canonical string through [`sign_payload`]/[`verify_payload`],
//! and the object-store presigner derives its SigV4 signing key from the same
//! [`hmac_sha256`] primitive (see `storage::presign`).
//!
//! Signature values are base64url without padding so they can travel inside
//! cookie values and query strings unescaped.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Prefix for signing secrets
pub const SECRET_PREFIX: &str = "bhsec_";

/// Generate a new signing secret.
///
/// Returns a `bhsec_` prefixed base64url-encoded 32-byte random secret.
pub fn generate_secret() -> String {
    use rand::RngCore;

    let mut secret_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut secret_bytes);

    format!("{}{}", SECRET_PREFIX, BASE64_URL.encode(secret_bytes))
}

/// Extract the raw secret bytes from a `bhsec_` prefixed secret.
///
/// Returns `None` if the secret doesn't have the correct prefix or invalid base64.
pub fn decode_secret(secret: &str) -> Option<Vec<u8>> {
    let encoded = secret.strip_prefix(SECRET_PREFIX)?;
    BASE64_URL.decode(encoded).ok()
}

/// Sign a canonical message with the given secret.
///
/// Returns the base64url-encoded HMAC-SHA256 signature, or `None` when the
/// secret is not a usable `bhsec_` secret.
pub fn sign_payload(secret: &str, payload: &str) -> Option<String> {
    let secret_bytes = decode_secret(secret)?;

    let mut mac = HmacSha256::new_from_slice(&secret_bytes).ok()?;
    mac.update(payload.as_bytes());
    let signature = mac.finalize().into_bytes();

    Some(BASE64_URL.encode(signature))
}

/// Verify a signature over a canonical message.
///
/// Returns `false` for any malformed input - a bad signature is a normal
/// verification outcome, not an error.
pub fn verify_payload(secret: &str, payload: &str, signature: &str) -> bool {
    let Some(expected) = sign_payload(secret, payload) else {
        return false;
    };

    // Constant-time comparison to prevent timing attacks
    constant_time_eq(signature.as_bytes(), expected.as_bytes())
}

/// Compute HMAC-SHA256.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Hex-encode bytes.
pub fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut result = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(result, "{:02x}", byte).expect("writing to a String cannot fail");
    }
    result
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secret() {
        let secret = generate_secret();
        assert!(secret.starts_with(SECRET_PREFIX));

        // Should be able to decode
        let decoded = decode_secret(&secret);
        assert!(decoded.is_some());
        assert_eq!(decoded.unwrap().len(), 32);
    }

    #[test]
    fn test_decode_secret_invalid_prefix() {
        assert!(decode_secret("invalid_secret").is_none());
    }

    #[test]
    fn test_decode_secret_invalid_base64() {
        assert!(decode_secret("bhsec_not/valid/base64url!!!").is_none());
    }

    #[test]
    fn test_sign_and_verify() {
        let secret = generate_secret();
        let payload = "tok_123.sub_456.1704067200.1706745600";

        let signature = sign_payload(&secret, payload).expect("should sign");

        // Verify should pass
        assert!(verify_payload(&secret, payload, &signature));

        // Wrong payload should fail
        assert!(!verify_payload(&secret, "wrong", &signature));

        // Wrong secret should fail
        let other_secret = generate_secret();
        assert!(!verify_payload(&other_secret, payload, &signature));
    }

    #[test]
    fn test_signing_is_deterministic() {
        let secret = generate_secret();
        let payload = "same payload";

        let first = sign_payload(&secret, payload).expect("should sign");
        let second = sign_payload(&secret, payload).expect("should sign");
        assert_eq!(first, second);
    }

    #[test]
    fn test_sign_with_unusable_secret() {
        assert!(sign_payload("not-a-secret", "payload").is_none());
        assert!(!verify_payload("not-a-secret", "payload", "sig"));
    }

    #[test]
    fn test_verify_malformed_signature() {
        let secret = generate_secret();
        assert!(!verify_payload(&secret, "payload", ""));
        assert!(!verify_payload(&secret, "payload", "too-short"));
    }

    #[test]
    fn test_hex_encode() {
        assert_eq!(hex_encode(&[0x00, 0xff, 0x10]), "00ff10");
        assert_eq!(hex_encode(&[]), "");
    }
}
