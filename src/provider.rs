use serde::Deserialize;
use thiserror::Error;

/// Errors from the external NLP/embedding provider. Workers never propagate
/// these; they record them on the failed job. Synchronous paths (search) map
/// them to a sanitized 503.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("provider returned an empty response")]
    EmptyResponse,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Extracts the provider's error message from a non-2xx response body,
/// falling back to the raw body when it isn't the usual envelope.
pub fn api_error(status: u16, body: String) -> ProviderError {
    let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    ProviderError::Api { status, message }
}

/// Truncates `text` to at most `max` characters, appending an ellipsis when
/// anything was cut. Operates on character boundaries.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_text_unchanged() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 5), "hello");
    }

    #[test]
    fn test_truncate_long_text() {
        assert_eq!(truncate_chars("hello world", 5), "hello...");
    }

    #[test]
    fn test_truncate_multibyte_boundary() {
        // Must not panic on non-ASCII input
        let s = "héllo wörld";
        assert_eq!(truncate_chars(s, 6), "héllo ...");
    }

    #[test]
    fn test_api_error_parses_envelope() {
        let err = api_error(401, r#"{"error":{"message":"bad key","type":"auth"}}"#.into());
        match err {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "bad key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_api_error_falls_back_to_raw_body() {
        let err = api_error(500, "upstream exploded".into());
        match err {
            ProviderError::Api { message, .. } => assert_eq!(message, "upstream exploded"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
