use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{self, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Profile id of the authenticated user.
    pub sub: String,
    pub jti: String,
    pub exp: i64,
    pub role: Role,
    pub family_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("invalid token: {0}")]
    Decode(String),
    #[error("missing family in token")]
    MissingFamily,
    #[error("encoding failed: {0}")]
    Encode(String),
}

/// Reads the claims without verifying the signature. Used where only
/// routing information (family id) is needed before full verification.
pub fn decode_unverified(token: &str) -> Result<JwtClaims, JwtError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() < 2 {
        return Err(JwtError::Decode("invalid JWT format".into()));
    }
    let payload_b64 = parts[1];
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|e| JwtError::Decode(format!("invalid base64 payload: {e}")))?;
    serde_json::from_slice::<JwtClaims>(&payload_bytes)
        .map_err(|e| JwtError::Decode(format!("invalid json payload: {e}")))
}

pub fn decode_and_verify(token: &str, secret: &[u8]) -> Result<JwtClaims, JwtError> {
    let key = DecodingKey::from_secret(secret);
    let validation = Validation::new(Algorithm::HS256);
    jsonwebtoken::decode::<JwtClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| JwtError::Decode(e.to_string()))
}

pub fn encode(token: &JwtClaims, secret: &[u8]) -> Result<String, JwtError> {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        token,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| JwtError::Encode(e.to_string()))
}

pub fn family_id_from_token(token: &str) -> Result<String, JwtError> {
    let claims = decode_unverified(token)?;
    claims.family_id.ok_or(JwtError::MissingFamily)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> JwtClaims {
        JwtClaims {
            sub: "user-1".into(),
            jti: "jti-1".into(),
            // Far-future expiry keeps the validation window open.
            exp: 4102444800,
            role: Role::Admin,
            family_id: Some("fam-1".into()),
        }
    }

    #[test]
    fn roundtrip() {
        let token = encode(&claims(), b"secret").unwrap();
        let decoded = decode_and_verify(&token, b"secret").unwrap();
        assert_eq!(decoded.sub, "user-1");
        assert_eq!(decoded.role, Role::Admin);
        assert_eq!(decoded.family_id.as_deref(), Some("fam-1"));
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = encode(&claims(), b"secret").unwrap();
        assert!(decode_and_verify(&token, b"other").is_err());
    }

    #[test]
    fn unverified_peek_reads_family() {
        let token = encode(&claims(), b"secret").unwrap();
        assert_eq!(family_id_from_token(&token).unwrap(), "fam-1");
    }
}
