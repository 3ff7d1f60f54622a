//! Error types for upstream telemetry calls.

use thiserror::Error;

/// Result code the upstream API uses for an expired or invalid session.
pub const SESSION_EXPIRED: i64 = 7;

/// Failure of a single upstream call.
///
/// Every variant is recoverable: callers degrade to the last known value
/// instead of propagating the failure out of a polling or broadcast cycle.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// The request did not complete within the configured timeout
    #[error("upstream request timed out")]
    Timeout,

    /// Transport-level failure (connection refused, DNS, non-2xx status, ...)
    #[error("network error: {0}")]
    Network(String),

    /// Well-formed response carrying a failure result code or no payload
    #[error("upstream rejected {operation}: {message}")]
    UpstreamRejected {
        /// Upstream operation name, e.g. `getDeviceStatus`
        operation: &'static str,
        /// Result code, when the response carried one
        code: Option<i64>,
        /// Human readable description of the code
        message: String,
    },

    /// No session could be obtained for the call
    #[error("no upstream session available: {source}")]
    NoSession {
        #[source]
        source: Box<FetchError>,
    },

    /// The response body could not be interpreted at all
    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),
}

impl FetchError {
    /// Build a rejection for a result code, with its descriptive message.
    pub fn rejected(operation: &'static str, code: Option<i64>) -> Self {
        let message = match code {
            Some(code) => format!("{} (result code {code})", result_code_message(code)),
            None => "response carried no result code".to_string(),
        };
        FetchError::UpstreamRejected {
            operation,
            code,
            message,
        }
    }

    /// Short, stable name of the failure class for logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout => "timeout",
            FetchError::Network(_) => "network",
            FetchError::UpstreamRejected { .. } => "rejected",
            FetchError::NoSession { .. } => "no_session",
            FetchError::MalformedResponse(_) => "malformed",
        }
    }

    /// Whether the upstream reported the session as expired or invalid.
    pub fn is_session_expired(&self) -> bool {
        matches!(
            self,
            FetchError::UpstreamRejected {
                code: Some(SESSION_EXPIRED),
                ..
            }
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Describe an upstream result code.
pub fn result_code_message(code: i64) -> &'static str {
    match code {
        0 => "Success.",
        1 => "Request parameter error.",
        2 => "No permissions to operate.",
        3 => "The requested device does not exist.",
        4 => "The requested device is not online.",
        5 => "The requested vehicle does not exist.",
        6 => "The requested user does not exist.",
        SESSION_EXPIRED => "Session expired or invalid.",
        8 => "No vehicle operation authority.",
        _ => "An unknown error occurred.",
    }
}

/// Result type for upstream operations
pub type Result<T> = std::result::Result<T, FetchError>;
