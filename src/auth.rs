//! Bearer-token verification for channels mode.
//!
//! Tokens are HS256 JWTs minted by the OAuth sign-in surface (outside this
//! daemon); the shared secret comes from `[auth]` in the config. Only
//! verification happens here.

use crate::error::AuthError;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;

/// Claims carried by an access token.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    /// Stored user row id, as a decimal string.
    pub sub: String,
    #[serde(default)]
    #[allow(dead_code)] // informational claim, identity comes from the user row
    pub email: Option<String>,
    pub exp: i64,
}

/// Verifies bearer tokens against the shared HS256 secret.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Verify a token and extract the stored user id it names.
    ///
    /// The three failure shapes map to distinct close codes upstream:
    /// missing token, invalid/expired token, and (resolved later) a token
    /// naming no stored user.
    pub fn verify(&self, token: Option<&str>) -> Result<i64, AuthError> {
        let token = token.filter(|t| !t.is_empty()).ok_or(AuthError::Missing)?;

        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid,
            }
        })?;

        data.claims.sub.parse::<i64>().map_err(|_| AuthError::Invalid)
    }
}
