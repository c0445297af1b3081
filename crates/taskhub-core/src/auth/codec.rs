//! Decoding of the claims carried inside a bearer token.
//!
//! Tokens are compact JWS strings (`header.payload.signature`). Only the
//! payload is read and the signature is never checked here: the user
//! service that issued the token is trusted, and every backend call
//! re-validates it server-side.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Role;

/// Number of `.`-separated segments in a compact JWS token
const TOKEN_SEGMENTS: usize = 3;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Token has {0} segments, expected 3")]
    SegmentCount(usize),

    #[error("Token payload is not valid base64url: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Token payload is not a valid claims object: {0}")]
    Structure(#[from] serde_json::Error),
}

/// Claims the user service places in its access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Username of the token holder
    #[serde(default)]
    pub sub: Option<String>,
    pub role: Role,
    /// Expiry instant, seconds since the Unix epoch
    pub exp: i64,
}

/// Decode the payload segment of a token into its claims.
pub fn decode(token: &str) -> Result<Claims, DecodeError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != TOKEN_SEGMENTS {
        return Err(DecodeError::SegmentCount(segments.len()));
    }

    // Some issuers pad the segment even though JWS forbids it
    let payload = segments[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD.decode(payload)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Check whether the claims have expired as of the current wall-clock time.
pub fn is_expired(claims: &Claims) -> bool {
    is_expired_at(claims, Utc::now().timestamp_millis())
}

/// Check expiry against an explicit clock reading in milliseconds.
/// The expiry instant itself counts as expired.
pub fn is_expired_at(claims: &Claims, now_millis: i64) -> bool {
    claims.exp.saturating_mul(1000) <= now_millis
}

#[cfg(test)]
pub(crate) fn encode_unsigned(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.c2lnbmF0dXJl", header, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_valid_token() {
        let token = encode_unsigned(&json!({"sub": "alice", "role": "admin", "exp": 1_900_000_000}));
        let claims = decode(&token).expect("token should decode");
        assert_eq!(claims.sub.as_deref(), Some("alice"));
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.exp, 1_900_000_000);
    }

    #[test]
    fn test_decode_tolerates_padding() {
        let token = encode_unsigned(&json!({"role": "member", "exp": 1}));
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        parts[1].push_str("==");
        let claims = decode(&parts.join(".")).expect("padded token should decode");
        assert_eq!(claims.role, Role::Member);
        assert!(claims.sub.is_none());
    }

    #[test]
    fn test_decode_wrong_segment_count() {
        assert!(matches!(decode(""), Err(DecodeError::SegmentCount(1))));
        assert!(matches!(decode("abc.def"), Err(DecodeError::SegmentCount(2))));
        assert!(matches!(decode("a.b.c.d"), Err(DecodeError::SegmentCount(4))));
    }

    #[test]
    fn test_decode_invalid_encoding() {
        assert!(matches!(decode("header.@@@@.sig"), Err(DecodeError::Encoding(_))));
    }

    #[test]
    fn test_decode_invalid_structure() {
        let not_json = format!("h.{}.s", URL_SAFE_NO_PAD.encode("not json"));
        assert!(matches!(decode(&not_json), Err(DecodeError::Structure(_))));

        let unknown_role = encode_unsigned(&json!({"role": "owner", "exp": 1}));
        assert!(matches!(decode(&unknown_role), Err(DecodeError::Structure(_))));

        let missing_exp = encode_unsigned(&json!({"role": "admin"}));
        assert!(matches!(decode(&missing_exp), Err(DecodeError::Structure(_))));
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let now_millis = 1_700_000_000_500;
        let at_boundary = Claims { sub: None, role: Role::Member, exp: now_millis / 1000 };
        assert!(is_expired_at(&at_boundary, now_millis));

        let one_second_later = Claims { exp: now_millis / 1000 + 1, ..at_boundary.clone() };
        assert!(!is_expired_at(&one_second_later, now_millis));

        let past = Claims { exp: 0, ..at_boundary };
        assert!(is_expired_at(&past, now_millis));
    }

    #[test]
    fn test_is_expired_uses_wall_clock() {
        let future = Claims { sub: None, role: Role::Admin, exp: Utc::now().timestamp() + 3600 };
        assert!(!is_expired(&future));
        let past = Claims { exp: Utc::now().timestamp() - 1, ..future };
        assert!(is_expired(&past));
    }
}
