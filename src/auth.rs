//! Bearer credential extraction.
//!
//! The gateway does not verify tokens itself; it only checks that the
//! client presented a well-formed `Authorization: Bearer <token>` header.
//! The upstream decides whether the token is valid.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use thiserror::Error;

const BEARER_SCHEME: &str = "Bearer";

/// Why a request carried no usable credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No `Authorization` header at all.
    #[error("Missing Authorization header")]
    Missing,

    /// Header present but not `Bearer <token>`.
    #[error("Authorization header must be 'Bearer <token>'")]
    Malformed,
}

/// Extract the bearer token from request headers.
///
/// The scheme is matched case-insensitively. The token must be non-empty
/// and contain no whitespace.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers.get(AUTHORIZATION).ok_or(AuthError::Missing)?;
    let value = value.to_str().map_err(|_| AuthError::Malformed)?.trim();

    let (scheme, token) = value.split_once(' ').ok_or(AuthError::Malformed)?;
    if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
        return Err(AuthError::Malformed);
    }

    let token = token.trim();
    if token.is_empty() || token.chars().any(char::is_whitespace) {
        return Err(AuthError::Malformed);
    }
    Ok(token)
}
