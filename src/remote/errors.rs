//! Remote Store Error Types
//!
//! Structured errors for the remote folder API.
//! `NotFound` is the one outcome the reconciler can act on; every other
//! variant is an opaque transport failure that propagates to the caller.

/// Remote store error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("Access token rejected or expired")]
    AuthExpired,

    #[error("Rate limited, try again after backoff")]
    RateLimited,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflicting revision: {0}")]
    Conflict(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    #[error("Request timeout")]
    Timeout,

    #[error("Request error: {0}")]
    Request(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Whether the remote reported the addressed file or folder as absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }

    /// Whether a retry of the same call could succeed.
    ///
    /// Nothing in this crate retries; the hint is for the application.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::RateLimited
                | RemoteError::Timeout
                | RemoteError::Network(_)
                | RemoteError::Server(_, _)
        )
    }

    /// Create a RemoteError from an HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 => RemoteError::AuthExpired,
            403 => RemoteError::Forbidden(body.to_string()),
            404 => RemoteError::NotFound(body.to_string()),
            408 => RemoteError::Timeout,
            409 => RemoteError::Conflict(body.to_string()),
            429 | 503 => RemoteError::RateLimited,
            500..=599 => RemoteError::Server(status, body.to_string()),
            _ => RemoteError::Request(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Timeout
        } else if e.is_connect() {
            RemoteError::Network(e.to_string())
        } else if e.is_decode() {
            RemoteError::InvalidResponse(e.to_string())
        } else {
            RemoteError::Request(e.to_string())
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(e: serde_json::Error) -> Self {
        RemoteError::InvalidResponse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert_eq!(RemoteError::from_status(401, ""), RemoteError::AuthExpired);
        assert!(RemoteError::from_status(404, "missing").is_not_found());
        assert_eq!(
            RemoteError::from_status(409, "rev"),
            RemoteError::Conflict("rev".to_string())
        );
        assert_eq!(RemoteError::from_status(503, ""), RemoteError::RateLimited);
        assert_eq!(
            RemoteError::from_status(507, "quota"),
            RemoteError::Server(507, "quota".to_string())
        );
        assert_eq!(
            RemoteError::from_status(400, "bad"),
            RemoteError::Request("HTTP 400: bad".to_string())
        );
    }

    #[test]
    fn test_retryable() {
        assert!(RemoteError::Timeout.is_retryable());
        assert!(RemoteError::Network("reset".into()).is_retryable());
        assert!(RemoteError::Server(500, String::new()).is_retryable());
        assert!(!RemoteError::NotFound("a.txt".into()).is_retryable());
        assert!(!RemoteError::AuthExpired.is_retryable());
        assert!(!RemoteError::Conflict(String::new()).is_retryable());
    }
}
