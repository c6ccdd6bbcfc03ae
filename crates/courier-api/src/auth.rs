//! Bearer-token guard for administrative endpoints.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use sha2::{Digest, Sha256};

use crate::error::ApiError;
use crate::state::AppState;

/// The configured admin token, kept only as a SHA-256 digest.
pub struct AdminToken {
    digest: Option<[u8; 32]>,
}

impl AdminToken {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            digest: token.map(digest),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.digest.is_some()
    }

    /// Check a presented token. Both sides are compared as digests.
    pub fn verify(&self, presented: &str) -> Result<(), ApiError> {
        let Some(expected) = &self.digest else {
            return Err(ApiError::Forbidden(
                "administrative calls are disabled".to_string(),
            ));
        };
        if digest(presented) == *expected {
            Ok(())
        } else {
            Err(ApiError::Unauthorized("invalid admin token".to_string()))
        }
    }
}

fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

/// Extractor that only succeeds for requests carrying the admin token.
pub struct Admin;

impl FromRequestParts<AppState> for Admin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        if !state.admin.is_configured() {
            return Err(ApiError::Forbidden(
                "administrative calls are disabled".to_string(),
            ));
        }
        let presented = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;
        state.admin.verify(presented.trim())?;
        Ok(Admin)
    }
}
