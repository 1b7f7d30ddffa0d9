//! Bearer token extraction for node and admin routes.

use axum::http::{HeaderMap, header::AUTHORIZATION};
use sha2::{Digest, Sha256};

use super::error::ApiError;

/// Returns the bearer token from the `Authorization` header.
///
/// # Errors
///
/// Returns a 401 [`ApiError`] when the header is missing or is not a bearer
/// credential.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?
        .to_str()
        .map_err(|_| ApiError::unauthorized("malformed authorization header"))?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::unauthorized("missing bearer token"))
}

/// Checks the request against the configured admin token.
///
/// Digests are compared so the comparison time does not depend on how much
/// of the presented token matches.
///
/// # Errors
///
/// Returns a 401 [`ApiError`] for a missing or wrong token.
pub fn authorize_admin(headers: &HeaderMap, admin_token: &str) -> Result<(), ApiError> {
    let presented = bearer_token(headers)?;
    if Sha256::digest(presented.as_bytes()) == Sha256::digest(admin_token.as_bytes()) {
        Ok(())
    } else {
        Err(ApiError::unauthorized("admin token not recognised"))
    }
}
