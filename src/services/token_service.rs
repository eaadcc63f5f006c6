//! Bearer token verification.
//!
//! Tokens are HMAC-signed JWTs checked against one shared secret. Only the
//! signature and the time claims (`exp`, `nbf`) matter: a valid token grants
//! read access to every key, whatever its subject or audience.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use thiserror::Error;

/// Why a presented token was refused. The display text is returned to the
/// caller in the 403 body.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token")]
    Rejected,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("algorithm not allowed")]
    InvalidAlgorithm,
    #[error("malformed token: {0}")]
    Malformed(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::ImmatureSignature => TokenError::NotYetValid,
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                TokenError::InvalidAlgorithm
            }
            ErrorKind::MissingRequiredClaim(claim) => {
                TokenError::Malformed(format!("missing required claim `{}`", claim))
            }
            ErrorKind::InvalidToken => TokenError::Malformed("not a JWT".into()),
            ErrorKind::Base64(e) => TokenError::Malformed(e.to_string()),
            ErrorKind::Json(e) => TokenError::Malformed(e.to_string()),
            ErrorKind::Utf8(e) => TokenError::Malformed(e.to_string()),
            _ => TokenError::Rejected,
        }
    }
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<(), TokenError>;
}

/// HMAC JWT verifier bound to a shared signing secret.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

/// HMAC algorithms accepted for the shared secret.
pub const HMAC_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Largest clock skew accepted on `exp`/`nbf`. Larger values would let
/// `now - leeway` wrap inside the JWT library.
pub const MAX_JWT_LEEWAY_SECS: u64 = 86_400;

impl JwtVerifier {
    /// `leeway_secs` is the clock skew tolerated on `exp`/`nbf`. With
    /// `require_exp` unset, tokens without an `exp` claim never expire.
    /// Leeway is capped at [`MAX_JWT_LEEWAY_SECS`].
    pub fn new(secret: &str, algorithm: Algorithm, leeway_secs: u64, require_exp: bool) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.leeway = leeway_secs.min(MAX_JWT_LEEWAY_SECS);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        if require_exp {
            validation.set_required_spec_claims(&["exp"]);
        } else {
            validation.required_spec_claims.clear();
        }

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<(), TokenError> {
        decode::<serde_json::Value>(token, &self.key, &self.validation)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode, get_current_timestamp};
    use serde_json::json;

    const SECRET: &str = "games-bucket-shared-secret";

    fn sign(claims: &serde_json::Value, secret: &str, alg: Algorithm) -> String {
        encode(
            &Header::new(alg),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("Failed to encode JWT")
    }

    fn verifier() -> JwtVerifier {
        JwtVerifier::new(SECRET, Algorithm::HS256, 0, false)
    }

    #[tokio::test]
    async fn accepts_unexpired_token() {
        let token = sign(
            &json!({ "sub": "player-1", "exp": get_current_timestamp() + 600 }),
            SECRET,
            Algorithm::HS256,
        );
        assert_eq!(verifier().verify(&token).await, Ok(()));
    }

    #[tokio::test]
    async fn accepts_token_without_exp_unless_required() {
        let token = sign(&json!({ "sub": "player-1" }), SECRET, Algorithm::HS256);
        assert_eq!(verifier().verify(&token).await, Ok(()));

        let strict = JwtVerifier::new(SECRET, Algorithm::HS256, 0, true);
        assert!(matches!(
            strict.verify(&token).await,
            Err(TokenError::Malformed(msg)) if msg.contains("exp")
        ));
    }

    #[tokio::test]
    async fn ignores_audience_and_subject() {
        let token = sign(
            &json!({ "aud": "admin-panel", "sub": "someone-else", "exp": get_current_timestamp() + 600 }),
            SECRET,
            Algorithm::HS256,
        );
        assert_eq!(verifier().verify(&token).await, Ok(()));
    }

    #[tokio::test]
    async fn rejects_expired_token() {
        let token = sign(
            &json!({ "exp": get_current_timestamp() - 1000 }),
            SECRET,
            Algorithm::HS256,
        );
        let err = verifier().verify(&token).await.unwrap_err();
        assert_eq!(err, TokenError::Expired);
        assert_eq!(err.to_string(), "token expired");
    }

    #[tokio::test]
    async fn leeway_tolerates_recent_expiry() {
        let token = sign(
            &json!({ "exp": get_current_timestamp() - 5 }),
            SECRET,
            Algorithm::HS256,
        );
        let lenient = JwtVerifier::new(SECRET, Algorithm::HS256, 60, false);
        assert_eq!(lenient.verify(&token).await, Ok(()));
    }

    #[tokio::test]
    async fn oversized_leeway_is_capped() {
        let token = sign(
            &json!({ "exp": get_current_timestamp() - 2 * MAX_JWT_LEEWAY_SECS }),
            SECRET,
            Algorithm::HS256,
        );
        let lenient = JwtVerifier::new(SECRET, Algorithm::HS256, u64::MAX, false);
        assert_eq!(lenient.verify(&token).await, Err(TokenError::Expired));
    }

    #[tokio::test]
    async fn rejects_token_not_yet_valid() {
        let token = sign(
            &json!({ "nbf": get_current_timestamp() + 1000 }),
            SECRET,
            Algorithm::HS256,
        );
        assert_eq!(verifier().verify(&token).await, Err(TokenError::NotYetValid));
    }

    #[tokio::test]
    async fn rejects_wrong_secret() {
        let token = sign(&json!({ "sub": "x" }), "another-secret", Algorithm::HS256);
        assert_eq!(
            verifier().verify(&token).await,
            Err(TokenError::InvalidSignature)
        );
    }

    #[tokio::test]
    async fn rejects_other_algorithm() {
        let token = sign(&json!({ "sub": "x" }), SECRET, Algorithm::HS512);
        assert_eq!(
            verifier().verify(&token).await,
            Err(TokenError::InvalidAlgorithm)
        );
    }

    #[tokio::test]
    async fn rejects_malformed_tokens() {
        for token in ["", "invalid", "header.payload", "a.b.c.d"] {
            let result = verifier().verify(token).await;
            assert!(
                matches!(result, Err(TokenError::Malformed(_))),
                "token {:?} gave {:?}",
                token,
                result
            );
        }
    }
}
