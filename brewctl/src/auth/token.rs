//! Remember-me token codec.
//!
//! The cookie value is an opaque dotted string:
//!
//! ```text
//! v1.{token_id}.{subject_id}.{issued_at}.{expires_at}.{signature}
//! ```
//!
//! where timestamps are unix seconds and the signature is HMAC-SHA256 over
//! everything before it (see [`crate::signing`]). Decoding is pure: it never
//! touches the store, and it rejects expired tokens the same way it rejects
//! forged ones - callers cannot tell the difference, by construction.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    signing,
    types::{SubjectId, TokenId},
};

/// Version tag for the cookie wire format.
const FORMAT_VERSION: &str = "v1";

/// A decoded, signature-verified remember-me token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RememberToken {
    pub token_id: TokenId,
    pub subject_id: SubjectId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Why a presented cookie value failed to decode.
///
/// Every variant is an expected outcome that degrades to "anonymous"; none of
/// them surface to the user as an error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is structurally malformed")]
    Malformed,
    #[error("token signature does not verify")]
    BadSignature,
    #[error("token has expired")]
    Expired,
    #[error("signing secret is unusable")]
    Signing,
}

fn canonical_string(token_id: &Uuid, subject_id: &Uuid, issued_at: i64, expires_at: i64) -> String {
    format!("{FORMAT_VERSION}.{token_id}.{subject_id}.{issued_at}.{expires_at}")
}

/// Issue a new token for `subject_id`, valid for `ttl` from now.
///
/// Returns the token and its encoded cookie value. The token id is fresh
/// random; uniqueness needs no coordination.
pub fn encode(
    subject_id: SubjectId,
    ttl: std::time::Duration,
    secret: &str,
) -> Result<(RememberToken, String), TokenError> {
    let ttl = Duration::from_std(ttl).map_err(|_| TokenError::Malformed)?;
    let issued_at = Utc::now();
    let expires_at = issued_at + ttl;
    let token_id = Uuid::new_v4();

    let canonical = canonical_string(
        &token_id,
        &subject_id,
        issued_at.timestamp(),
        expires_at.timestamp(),
    );
    let signature = signing::sign_payload(secret, &canonical).ok_or(TokenError::Signing)?;

    let token = RememberToken {
        token_id,
        subject_id,
        issued_at,
        expires_at,
    };

    Ok((token, format!("{canonical}.{signature}")))
}

/// Decode and verify a raw cookie value.
///
/// Signature and expiry checks are both mandatory; the signature is checked
/// first so a tampered-and-expired value reports [`TokenError::BadSignature`].
pub fn decode(raw: &str, secret: &str) -> Result<RememberToken, TokenError> {
    let parts: Vec<&str> = raw.split('.').collect();
    let &[version, token_id, subject_id, issued_at, expires_at, signature] = parts.as_slice()
    else {
        return Err(TokenError::Malformed);
    };

    if version != FORMAT_VERSION {
        return Err(TokenError::Malformed);
    }

    let token_id: Uuid = token_id.parse().map_err(|_| TokenError::Malformed)?;
    let subject_id: Uuid = subject_id.parse().map_err(|_| TokenError::Malformed)?;
    let issued_ts: i64 = issued_at.parse().map_err(|_| TokenError::Malformed)?;
    let expires_ts: i64 = expires_at.parse().map_err(|_| TokenError::Malformed)?;

    let canonical = canonical_string(&token_id, &subject_id, issued_ts, expires_ts);
    if !signing::verify_payload(secret, &canonical, signature) {
        return Err(TokenError::BadSignature);
    }

    let issued_at = DateTime::from_timestamp(issued_ts, 0).ok_or(TokenError::Malformed)?;
    let expires_at = DateTime::from_timestamp(expires_ts, 0).ok_or(TokenError::Malformed)?;
    if expires_at <= issued_at {
        return Err(TokenError::Malformed);
    }

    if expires_at <= Utc::now() {
        return Err(TokenError::Expired);
    }

    Ok(RememberToken {
        token_id,
        subject_id,
        issued_at,
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use super::*;
    use crate::signing::generate_secret;

    const TTL: StdDuration = StdDuration::from_secs(30 * 24 * 60 * 60);

    #[test]
    fn test_encode_decode_roundtrip() {
        let secret = generate_secret();
        let subject = Uuid::new_v4();

        let (token, cookie) = encode(subject, TTL, &secret).unwrap();
        assert!(token.expires_at > token.issued_at);

        let decoded = decode(&cookie, &secret).unwrap();
        assert_eq!(decoded.subject_id, subject);
        assert_eq!(decoded.token_id, token.token_id);
    }

    #[test]
    fn test_decode_rejects_expired() {
        let secret = generate_secret();
        let subject = Uuid::new_v4();

        // Hand-build an expired-but-correctly-signed value
        let token_id = Uuid::new_v4();
        let issued = Utc::now().timestamp() - 3600;
        let expires = Utc::now().timestamp() - 60;
        let canonical = canonical_string(&token_id, &subject, issued, expires);
        let sig = crate::signing::sign_payload(&secret, &canonical).unwrap();

        let result = decode(&format!("{canonical}.{sig}"), &secret);
        assert_eq!(result.unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn test_decode_rejects_wrong_secret() {
        let secret = generate_secret();
        let (_, cookie) = encode(Uuid::new_v4(), TTL, &secret).unwrap();

        let result = decode(&cookie, &generate_secret());
        assert_eq!(result.unwrap_err(), TokenError::BadSignature);
    }

    #[test]
    fn test_decode_rejects_tampering_anywhere() {
        let secret = generate_secret();
        let (_, cookie) = encode(Uuid::new_v4(), TTL, &secret).unwrap();

        // Flip each character in turn; every mutation must fail to decode
        for index in 0..cookie.len() {
            let mut bytes = cookie.clone().into_bytes();
            bytes[index] = if bytes[index] == b'0' { b'1' } else { b'0' };
            let Ok(tampered) = String::from_utf8(bytes) else {
                continue;
            };
            if tampered == cookie {
                continue;
            }
            assert!(
                decode(&tampered, &secret).is_err(),
                "tampered byte {index} still decoded"
            );
        }
    }

    #[test]
    fn test_decode_rejects_malformed_structures() {
        let secret = generate_secret();
        let malformed = vec![
            "",
            "not-a-token",
            "v1.too.few.parts",
            "v2.this.has.the.wrong.version",
            "v1.not-a-uuid.also-not.12.34.sig",
            "v1.550e8400-e29b-41d4-a716-446655440000.550e8400-e29b-41d4-a716-446655440000.nan.34.sig",
        ];

        for raw in malformed {
            assert_eq!(
                decode(raw, &secret).unwrap_err(),
                TokenError::Malformed,
                "expected Malformed for {raw:?}"
            );
        }
    }

    #[test]
    fn test_decode_rejects_inverted_lifetime() {
        let secret = generate_secret();
        let subject = Uuid::new_v4();
        let token_id = Uuid::new_v4();

        // expires before issued, signed correctly
        let issued = Utc::now().timestamp() + 3600;
        let expires = issued - 60;
        let canonical = canonical_string(&token_id, &subject, issued, expires);
        let sig = crate::signing::sign_payload(&secret, &canonical).unwrap();

        let result = decode(&format!("{canonical}.{sig}"), &secret);
        assert_eq!(result.unwrap_err(), TokenError::Malformed);
    }

    #[test]
    fn test_encode_with_unusable_secret() {
        let result = encode(Uuid::new_v4(), TTL, "not-a-secret");
        assert_eq!(result.unwrap_err(), TokenError::Signing);
    }
}
