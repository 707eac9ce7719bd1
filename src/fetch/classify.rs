//! Attempt classification.

use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::StatusCode;

/// How the retry loop treats one upstream response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Hand the response to the caller.
    Success,
    /// Sleep and try again, if attempts remain.
    Retryable,
    /// Give up immediately.
    Terminal,
}

/// Classify a response by status and content type.
///
/// An HTML body means the upstream (or something in front of it) served an
/// error page where JSON or an event stream was expected, so it is retried
/// even when the status claims success.
pub fn classify_response(status: StatusCode, headers: &HeaderMap) -> Disposition {
    if status.is_server_error() || is_html(headers) {
        Disposition::Retryable
    } else if status.is_success() {
        Disposition::Success
    } else {
        Disposition::Terminal
    }
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with("text/html"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn with_content_type(ct: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(ct));
        headers
    }

    #[test]
    fn test_success_statuses() {
        let headers = with_content_type("application/json");
        assert_eq!(
            classify_response(StatusCode::OK, &headers),
            Disposition::Success
        );
        assert_eq!(
            classify_response(StatusCode::NO_CONTENT, &HeaderMap::new()),
            Disposition::Success
        );
        assert_eq!(
            classify_response(StatusCode::OK, &with_content_type("text/event-stream")),
            Disposition::Success
        );
    }

    #[test]
    fn test_server_errors_are_retryable() {
        for code in [500, 502, 503, 504, 599] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(
                classify_response(status, &HeaderMap::new()),
                Disposition::Retryable,
                "status {code}"
            );
        }
    }

    #[test]
    fn test_html_is_retryable_even_on_200() {
        assert_eq!(
            classify_response(StatusCode::OK, &with_content_type("text/html; charset=utf-8")),
            Disposition::Retryable
        );
        assert_eq!(
            classify_response(StatusCode::NOT_FOUND, &with_content_type("TEXT/HTML")),
            Disposition::Retryable
        );
    }

    #[test]
    fn test_client_errors_are_terminal() {
        for code in [400, 401, 403, 404, 409, 422, 429] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(
                classify_response(status, &with_content_type("application/json")),
                Disposition::Terminal,
                "status {code}"
            );
        }
    }
}
