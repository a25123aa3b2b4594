use thiserror::Error;

/// Application error code the API returns when the full inbox query is
/// rejected for the current account.
pub const RESTRICTED_ERROR_CODE: i64 = 4_415_001;

#[derive(Error, Debug)]
pub enum DirectError {
    #[error("Not logged in: {0}")]
    NotLoggedIn(String),

    #[error("Session expired ({error_type}). Please login again.")]
    Unauthorized { error_type: String },

    #[error("Rate limited (429). Retry after: {}", retry_after.as_deref().unwrap_or("unknown"))]
    RateLimited { retry_after: Option<String> },

    #[error("Challenge required. Verification needed at: {path}")]
    ChallengeRequired { path: String },

    #[error("Endpoint restricted (code {code}): {message}")]
    Restricted { code: i64, message: String },

    #[error("Throttled by provider: {0}")]
    Throttled(String),

    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("Request failed ({error_type}, status {status}): {message}")]
    Api {
        status: u16,
        error_type: String,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for DirectError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) if status.is_server_error() => DirectError::ServerError {
                status: status.as_u16(),
                message: e.to_string(),
            },
            _ if e.is_decode() => DirectError::InvalidResponse(e.to_string()),
            _ => DirectError::Network(e.to_string()),
        }
    }
}

impl DirectError {
    /// Errors worth retrying: 5xx, 429 and explicit throttle signals.
    pub fn is_transient(&self) -> bool {
        match self {
            DirectError::ServerError { .. } => true,
            DirectError::RateLimited { .. } => true,
            DirectError::Throttled(_) => true,
            DirectError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// The "try a simpler query" signal for the inbox fallback chain.
    pub fn is_restricted(&self) -> bool {
        matches!(self, DirectError::Restricted { .. })
    }

    /// Session-level failures the host must resolve by re-authenticating.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DirectError::NotLoggedIn(_)
                | DirectError::Unauthorized { .. }
                | DirectError::ChallengeRequired { .. }
        )
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            DirectError::Unauthorized { .. } => Some(401),
            DirectError::RateLimited { .. } => Some(429),
            DirectError::ServerError { status, .. } => Some(*status),
            DirectError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> DirectError {
        DirectError::Api {
            status,
            error_type: "bad_request".to_string(),
            message: "nope".to_string(),
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(DirectError::ServerError {
            status: 503,
            message: "unavailable".to_string()
        }
        .is_transient());
        assert!(DirectError::RateLimited { retry_after: None }.is_transient());
        assert!(DirectError::Throttled("feedback_required".to_string()).is_transient());
        assert!(api(429).is_transient());

        assert!(!api(400).is_transient());
        assert!(!DirectError::Network("connection reset".to_string()).is_transient());
        assert!(!DirectError::Unauthorized {
            error_type: "login_required".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_restricted_is_not_transient_or_fatal() {
        let err = DirectError::Restricted {
            code: RESTRICTED_ERROR_CODE,
            message: "inbox unavailable".to_string(),
        };
        assert!(err.is_restricted());
        assert!(!err.is_transient());
        assert!(!err.is_fatal());
        assert_eq!(err.status_code(), None);
    }

    #[test]
    fn test_rate_limit_message_includes_retry_after() {
        let err = DirectError::RateLimited {
            retry_after: Some("60".to_string()),
        };
        assert_eq!(err.to_string(), "Rate limited (429). Retry after: 60");
        assert_eq!(err.status_code(), Some(429));
    }
}
