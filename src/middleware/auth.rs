//! API key authentication. When a shared secret is configured, requests must
//! carry it in the X-API-Key header; health and documentation endpoints stay
//! public. With an empty secret the middleware is a no-op.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::errors::AppError;

const API_KEY_HEADER: &str = "x-api-key";
const PUBLIC_PATHS: &[&str] = &["/health", "/docs", "/openapi.json"];

pub async fn require_api_key(
    State(api_key): State<String>,
    req: Request,
    next: Next,
) -> Response {
    if api_key.is_empty() || PUBLIC_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if secure_compare(provided, &api_key) {
        next.run(req).await
    } else {
        AppError::Unauthorized.into_response()
    }
}

/// Constant-time string comparison. Both sides are padded to equal length
/// before comparing, so neither the content nor the length of the expected
/// key leaks through timing.
pub fn secure_compare(a: &str, b: &str) -> bool {
    let max_len = a.len().max(b.len());

    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0u8; max_len];
    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    let bytes_match = a_padded.ct_eq(&b_padded);
    let length_match = (a.len() as u64).ct_eq(&(b.len() as u64));

    bool::from(bytes_match & length_match)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_keys_match() {
        assert!(secure_compare("secret-key", "secret-key"));
    }

    #[test]
    fn test_different_keys_fail() {
        assert!(!secure_compare("secret-key", "secret-kez"));
        assert!(!secure_compare("wrong", "secret-key"));
    }

    #[test]
    fn test_different_lengths_fail() {
        assert!(!secure_compare("secret", "secret-key"));
        assert!(!secure_compare("secret-key-extended", "secret-key"));
        assert!(!secure_compare("", "secret-key"));
    }

    #[test]
    fn test_prefix_is_not_a_match() {
        // Padding must not turn a prefix into an accidental equality.
        assert!(!secure_compare("secret-key\0\0", "secret-key"));
    }

    #[test]
    fn test_empty_equals_empty() {
        assert!(secure_compare("", ""));
    }
}
