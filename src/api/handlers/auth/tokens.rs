//! Signed token issuance and verification.
//!
//! Access and refresh tokens are HS256 JWTs carrying the user id, a unique
//! `jti`, and a `token_type` discriminator. Verification fails closed: any
//! signature, structure, expiry, issuer, or type mismatch yields an error and
//! never a partial identity. The denylist check for refresh tokens lives in
//! the storage layer; this module only signs and verifies.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum TokenKind {
    Access,
    Refresh,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct Claims {
    pub(crate) sub: String,
    pub(crate) jti: String,
    pub(crate) token_type: TokenKind,
    pub(crate) iss: String,
    pub(crate) iat: i64,
    pub(crate) exp: i64,
}

#[derive(Debug, Error)]
pub(crate) enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("malformed token")]
    Malformed,
    #[error("unexpected token type")]
    WrongType,
    #[error("failed to encode token")]
    Encoding,
}

/// A freshly issued access/refresh pair. The refresh `jti` lives inside the
/// token itself; rotation and revocation recover it from the claims.
#[derive(Clone, Debug)]
pub(crate) struct TokenPair {
    pub(crate) access_token: String,
    pub(crate) refresh_token: String,
}

pub(crate) struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl TokenIssuer {
    pub(crate) fn new(
        secret: &SecretString,
        issuer: String,
        access_ttl_seconds: i64,
        refresh_ttl_seconds: i64,
    ) -> Self {
        let secret = secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer,
            access_ttl_seconds,
            refresh_ttl_seconds,
        }
    }

    /// Issue a fresh access/refresh pair for `user_id`.
    pub(crate) fn issue_pair(&self, user_id: Uuid) -> Result<TokenPair, TokenError> {
        let access_token = self.issue_access(user_id)?;
        let refresh_token = self.sign(
            user_id,
            Uuid::new_v4(),
            TokenKind::Refresh,
            self.refresh_ttl_seconds,
        )?;
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Issue an access token only, used when refresh rotation is disabled and
    /// the presented refresh token stays valid.
    pub(crate) fn issue_access(&self, user_id: Uuid) -> Result<String, TokenError> {
        self.sign(
            user_id,
            Uuid::new_v4(),
            TokenKind::Access,
            self.access_ttl_seconds,
        )
    }

    fn sign(
        &self,
        user_id: Uuid,
        jti: Uuid,
        kind: TokenKind,
        ttl_seconds: i64,
    ) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            jti: jti.to_string(),
            token_type: kind,
            iss: self.issuer.clone(),
            iat: now,
            exp: now + ttl_seconds,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|_| TokenError::Encoding)
    }

    /// Verify a token and return its claims, enforcing the expected kind.
    pub(crate) fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|err| {
            match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                _ => TokenError::Malformed,
            }
        })?;

        if data.claims.token_type != expected {
            return Err(TokenError::WrongType);
        }

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(
            &SecretString::from("test-secret-key-at-least-32-bytes!"),
            "custodia".to_string(),
            600,
            7 * 24 * 60 * 60,
        )
    }

    #[test]
    fn issue_pair_round_trips() -> Result<(), TokenError> {
        let issuer = issuer();
        let user_id = Uuid::new_v4();
        let pair = issuer.issue_pair(user_id)?;

        let access = issuer.verify(&pair.access_token, TokenKind::Access)?;
        assert_eq!(access.sub, user_id.to_string());
        assert_eq!(access.token_type, TokenKind::Access);

        let refresh = issuer.verify(&pair.refresh_token, TokenKind::Refresh)?;
        assert_eq!(refresh.sub, user_id.to_string());
        assert!(Uuid::parse_str(&refresh.jti).is_ok());
        assert_ne!(refresh.jti, access.jti);
        assert!(refresh.exp > access.exp);
        Ok(())
    }

    #[test]
    fn access_token_is_not_a_refresh_token() -> Result<(), TokenError> {
        let issuer = issuer();
        let pair = issuer.issue_pair(Uuid::new_v4())?;

        let result = issuer.verify(&pair.access_token, TokenKind::Refresh);
        assert!(matches!(result, Err(TokenError::WrongType)));

        let result = issuer.verify(&pair.refresh_token, TokenKind::Access);
        assert!(matches!(result, Err(TokenError::WrongType)));
        Ok(())
    }

    #[test]
    fn rejects_expired_token() -> Result<(), TokenError> {
        let expired = TokenIssuer::new(
            &SecretString::from("test-secret-key-at-least-32-bytes!"),
            "custodia".to_string(),
            -10,
            -10,
        );
        let pair = expired.issue_pair(Uuid::new_v4())?;

        let result = issuer().verify(&pair.access_token, TokenKind::Access);
        assert!(matches!(result, Err(TokenError::Expired)));
        Ok(())
    }

    #[test]
    fn rejects_wrong_secret() -> Result<(), TokenError> {
        let other = TokenIssuer::new(
            &SecretString::from("another-secret-key-at-least-32-b!"),
            "custodia".to_string(),
            600,
            600,
        );
        let pair = other.issue_pair(Uuid::new_v4())?;

        let result = issuer().verify(&pair.access_token, TokenKind::Access);
        assert!(matches!(result, Err(TokenError::InvalidSignature)));
        Ok(())
    }

    #[test]
    fn rejects_wrong_issuer() -> Result<(), TokenError> {
        let foreign = TokenIssuer::new(
            &SecretString::from("test-secret-key-at-least-32-bytes!"),
            "someone-else".to_string(),
            600,
            600,
        );
        let pair = foreign.issue_pair(Uuid::new_v4())?;

        let result = issuer().verify(&pair.access_token, TokenKind::Access);
        assert!(matches!(result, Err(TokenError::Malformed)));
        Ok(())
    }

    #[test]
    fn rejects_garbage() {
        let result = issuer().verify("not.a.token", TokenKind::Access);
        assert!(result.is_err());

        let result = issuer().verify("", TokenKind::Access);
        assert!(result.is_err());
    }
}
