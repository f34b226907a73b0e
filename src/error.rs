//! Client error types

use serde::Deserialize;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, B2Error>;

/// Client errors
#[derive(Error, Debug)]
pub enum B2Error {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// B2 API error
    #[error("B2 error ({status} {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Part size must be at least one byte
    #[error("invalid part size: {0}")]
    InvalidPartSize(u64),

    /// The source could not report how many bytes it will provide
    #[error("content length could not be determined")]
    ContentLengthUnknown,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Response body could not be mapped onto the expected record
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Locally computed digest disagrees with the server echo
    #[error("part {index} digest mismatch: local {local}, server {remote}")]
    PartIntegrity {
        index: u32,
        local: String,
        remote: String,
    },

    /// Upload failed
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// The upload was cancelled before finalization
    #[error("upload cancelled")]
    Cancelled,

    /// Terminal failure of a large-file upload, with the part indices that
    /// did and did not complete before the abort
    #[error("large file upload aborted: {cause}")]
    LargeFileFailed {
        cause: Box<B2Error>,
        completed: Vec<u32>,
        incomplete: Vec<u32>,
    },
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    status: u16,
    code: String,
    message: String,
}

impl B2Error {
    /// Parse a non-2xx response body into the typed API error.
    pub(crate) fn from_response_body(status: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<ApiErrorBody>(body) {
            Ok(err) => Self::Api {
                status: err.status,
                code: err.code,
                message: err.message,
            },
            Err(_) => Self::Api {
                status,
                code: format!("http_{status}"),
                message: String::from_utf8_lossy(body).into_owned(),
            },
        }
    }

    /// Whether a retry with backoff is worthwhile.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            Self::Http(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }

    /// Whether the session token is no longer accepted and the account
    /// should re-authorize.
    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            Self::Api { status: 401, code, .. }
                if code == "expired_auth_token" || code == "bad_auth_token"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_api_error() {
        let body = br#"{"status": 503, "code": "service_unavailable", "message": "try again"}"#;
        let error = B2Error::from_response_body(503, body);

        match error {
            B2Error::Api {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 503);
                assert_eq!(code, "service_unavailable");
                assert_eq!(message, "try again");
            }
            _ => panic!("Expected Api error"),
        }
    }

    #[test]
    fn test_unparseable_body_keeps_status() {
        let error = B2Error::from_response_body(502, b"<html>bad gateway</html>");
        match error {
            B2Error::Api { status, code, .. } => {
                assert_eq!(status, 502);
                assert_eq!(code, "http_502");
            }
            _ => panic!("Expected Api error"),
        }
    }

    #[test]
    fn test_transient_predicate() {
        let retryable = [(408, "request_timeout"), (429, "too_many_requests"), (500, "internal_error"), (503, "service_unavailable")];
        for (status, code) in retryable {
            let err = B2Error::from_response_body(
                status,
                format!(r#"{{"status": {status}, "code": "{code}", "message": ""}}"#).as_bytes(),
            );
            assert!(err.is_transient(), "{status} should be transient");
        }

        let fatal = B2Error::from_response_body(
            400,
            br#"{"status": 400, "code": "bad_request", "message": ""}"#,
        );
        assert!(!fatal.is_transient());
        assert!(!B2Error::InvalidPartSize(0).is_transient());
        assert!(!B2Error::Cancelled.is_transient());
    }

    #[test]
    fn test_auth_expired_predicate() {
        let expired = B2Error::from_response_body(
            401,
            br#"{"status": 401, "code": "expired_auth_token", "message": "token expired"}"#,
        );
        assert!(expired.is_auth_expired());
        assert!(!expired.is_transient());

        let unauthorized = B2Error::from_response_body(
            401,
            br#"{"status": 401, "code": "unauthorized", "message": "no"}"#,
        );
        assert!(!unauthorized.is_auth_expired());
    }
}
