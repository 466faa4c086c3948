//! Signed agent tokens.
//!
//! HS256 with a server-held secret, 30-day expiry. Verification checks
//! signature and expiry only; the agent/path and account cross-checks happen
//! in the HTTP auth guard where the path parameters are available.
//!
//! Every verification failure collapses to the same opaque `CoreError::Auth`
//! so a caller cannot distinguish a bad signature from an expired token.

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const TOKEN_TTL_SECS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Agent ID.
    sub: String,
    /// Owning account ID.
    acct: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Clone)]
pub struct TokenClaims {
    pub agent_id: String,
    pub account_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    /// Unix seconds.
    pub expires_at: i64,
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, agent_id: &str, account_id: &str) -> Result<IssuedToken, CoreError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: agent_id.to_string(),
            acct: account_id.to_string(),
            iat: now,
            exp: now + TOKEN_TTL_SECS,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(|_| CoreError::Auth)?;
        Ok(IssuedToken {
            token,
            expires_at: claims.exp,
        })
    }

    pub fn verify(&self, token: &str) -> Result<TokenClaims, CoreError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|_| CoreError::Auth)?;
        Ok(TokenClaims {
            agent_id: data.claims.sub,
            account_id: data.claims.acct,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify_roundtrip() {
        let service = TokenService::new("test-secret");
        let issued = service.issue("agent-1", "acct-1").unwrap();

        let claims = service.verify(&issued.token).unwrap();
        assert_eq!(claims.agent_id, "agent-1");
        assert_eq!(claims.account_id, "acct-1");
    }

    #[test]
    fn test_expiry_roughly_thirty_days_out() {
        let service = TokenService::new("test-secret");
        let issued = service.issue("agent-1", "acct-1").unwrap();

        let delta = issued.expires_at - Utc::now().timestamp();
        assert!(delta > TOKEN_TTL_SECS - 60);
        assert!(delta <= TOKEN_TTL_SECS);
    }

    #[test]
    fn test_wrong_secret_rejected_opaquely() {
        let issuer = TokenService::new("secret-a");
        let verifier = TokenService::new("secret-b");
        let issued = issuer.issue("agent-1", "acct-1").unwrap();

        let err = verifier.verify(&issued.token).unwrap_err();
        assert!(matches!(err, CoreError::Auth));
        assert_eq!(err.to_string(), "Authentication failed");
    }

    #[test]
    fn test_garbage_token_rejected() {
        let service = TokenService::new("test-secret");
        assert!(matches!(
            service.verify("not-a-token").unwrap_err(),
            CoreError::Auth
        ));
    }
}
