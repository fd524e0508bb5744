//! Handshake authentication — resolves a bearer JWT to a stable user id.
//!
//! ARCHITECTURE
//! ============
//! Identity is settled once, at the websocket upgrade. Room logic only ever
//! sees an already-verified `user_id`; an unauthenticated upgrade is refused
//! with `401` before any frame is exchanged.
//!
//! Tokens are HS256 JWTs issued by the external auth service. The user id is
//! read from the `id` claim, falling back to the standard `sub` claim.

use std::collections::HashMap;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Query parameter carrying the token for clients that cannot set headers.
pub const TOKEN_QUERY_PARAM: &str = "token";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Expiration time (Unix seconds).
    pub exp: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("not authorized, no token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token does not name a user id")]
    InvalidSubject,
}

#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self { key: DecodingKey::from_secret(secret.as_bytes()), validation: Validation::new(Algorithm::HS256) }
    }

    /// Verify signature and expiry, then resolve the user id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` for bad signatures, expired or malformed tokens,
    /// and `InvalidSubject` if neither `id` nor `sub` is a UUID.
    pub fn verify(&self, token: &str) -> Result<Uuid, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        debug!(exp = data.claims.exp, "auth: token verified");
        data.claims
            .id
            .as_deref()
            .or(data.claims.sub.as_deref())
            .and_then(|raw| raw.parse().ok())
            .ok_or(AuthError::InvalidSubject)
    }
}

/// Pull the bearer token from `?token=` or an `Authorization: Bearer` header.
#[must_use]
pub fn extract_token(params: &HashMap<String, String>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = params.get(TOKEN_QUERY_PARAM).filter(|t| !t.is_empty()) {
        return Some(token.clone());
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
