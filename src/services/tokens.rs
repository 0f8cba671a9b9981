//! Bearer token issuance and validation.
//!
//! Tokens are HMAC-SHA256 JWTs. Claims carry the user's login; the auth
//! middleware resolves the login back to an account row, so a token alone
//! never vouches for a user identifier.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

use crate::error::{Result, ScripError};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_ISSUER: &str = "gophermart";
const TOKEN_SUBJECT: &str = "auth token";
const JWT_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    sub: String,
    iat: i64,
    exp: i64,
    #[serde(rename = "UserLogin")]
    user_login: String,
}

pub struct TokenService {
    secret: String,
    lifetime: Duration,
}

impl TokenService {
    pub fn new(secret: &str, lifetime: Duration) -> Self {
        Self {
            secret: secret.to_string(),
            lifetime,
        }
    }

    /// Issue a signed token for `login`.
    pub fn issue(&self, login: &str) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: TOKEN_ISSUER.to_string(),
            sub: TOKEN_SUBJECT.to_string(),
            iat: now,
            exp: now + self.lifetime.as_secs() as i64,
            user_login: login.to_string(),
        };

        let header = URL_SAFE_NO_PAD.encode(JWT_HEADER);
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&claims)
                .map_err(|e| ScripError::Internal(format!("claims encoding failed: {e}")))?,
        );
        let signing_input = format!("{header}.{payload}");
        let signature = URL_SAFE_NO_PAD.encode(self.sign(signing_input.as_bytes())?);

        Ok(format!("{signing_input}.{signature}"))
    }

    /// Validate a token and return the login it carries.
    pub fn verify(&self, token: &str) -> Result<String> {
        let invalid = || ScripError::Auth("Invalid token".to_string());

        let mut parts = token.split('.');
        let (header, payload, signature) = match (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) {
            (Some(h), Some(p), Some(s), None) => (h, p, s),
            _ => return Err(invalid()),
        };

        let expected = self.sign(format!("{header}.{payload}").as_bytes())?;
        let provided = URL_SAFE_NO_PAD.decode(signature).map_err(|_| invalid())?;
        if !ct_eq(&expected, &provided) {
            return Err(invalid());
        }

        let claims: Claims = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .ok_or_else(invalid)?;

        if Utc::now().timestamp() >= claims.exp {
            return Err(ScripError::Auth("Token expired".to_string()));
        }
        if claims.user_login.is_empty() {
            return Err(ScripError::Auth("Empty login in token".to_string()));
        }

        Ok(claims.user_login)
    }

    fn sign(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| ScripError::Internal(format!("invalid token secret: {e}")))?;
        mac.update(input);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// Constant-time comparison so signature checks leak no timing information.
fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new("test-secret", Duration::from_secs(3600))
    }

    #[test]
    fn test_issue_then_verify_round_trip() {
        let tokens = service();
        let token = tokens.issue("alice").unwrap();
        assert_eq!(tokens.verify(&token).unwrap(), "alice");
    }

    #[test]
    fn test_claims_carry_issuer_and_subject() {
        let token = service().issue("alice").unwrap();
        let payload = token.split('.').nth(1).unwrap();
        let raw = URL_SAFE_NO_PAD.decode(payload).unwrap();
        let claims: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(claims["iss"], "gophermart");
        assert_eq!(claims["sub"], "auth token");
        assert_eq!(claims["UserLogin"], "alice");
        assert!(claims["exp"].as_i64().unwrap() > claims["iat"].as_i64().unwrap());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let tokens = TokenService::new("test-secret", Duration::ZERO);
        let token = tokens.issue("alice").unwrap();
        let err = tokens.verify(&token).unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = service().issue("alice").unwrap();
        let other = TokenService::new("other-secret", Duration::from_secs(3600));
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let tokens = service();
        let token = tokens.issue("alice").unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();

        let forged_claims = Claims {
            iss: TOKEN_ISSUER.to_string(),
            sub: TOKEN_SUBJECT.to_string(),
            iat: Utc::now().timestamp(),
            exp: Utc::now().timestamp() + 3600,
            user_login: "mallory".to_string(),
        };
        let forged = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());
        parts[1] = &forged;

        assert!(tokens.verify(&parts.join(".")).is_err());
    }

    #[test]
    fn test_garbage_is_rejected() {
        let tokens = service();
        for garbage in ["", "abc", "a.b", "a.b.c.d", "not.a.jwt"] {
            assert!(tokens.verify(garbage).is_err(), "{garbage:?} should fail");
        }
    }

    #[test]
    fn test_empty_login_is_rejected() {
        let tokens = service();
        let token = tokens.issue("").unwrap();
        assert!(tokens.verify(&token).is_err());
    }
}
