//! Client error types

use crate::storage::StorageError;
use thiserror::Error;

/// Coarse classification of a [`ClientError`], stable enough for UI decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport failure before a response arrived
    NetworkError,
    /// Credentials rejected and no refresh could recover them
    AuthExpired,
    /// Billing lapse; the session itself is still valid
    SubscriptionExpired,
    /// Client-side timeout
    Timeout,
    /// Response body did not have the expected shape
    InvalidResponse,
    /// Any other non-success status from the backend
    ServerError,
    /// Invalid client setup or caller input
    Configuration,
    /// Credential storage could not be read or written
    Storage,
}

/// Result alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client error types
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or request error
    #[error("Request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// The request did not complete within the configured timeout
    #[error("Request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    /// Authentication failed and the session could not be refreshed
    #[error("Authentication expired: {0}")]
    AuthExpired(String),

    /// The refresh exchange failed in transport and the session was ended
    #[error("Token refresh failed: {message}")]
    RefreshFailed { kind: ErrorKind, message: String },

    /// The account subscription has lapsed
    #[error("Subscription expired: {0}")]
    SubscriptionExpired(String),

    /// Server returned an error status
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Unexpected payload shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Invalid argument supplied by the caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Credential storage failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ClientError {
    /// Create error from HTTP status code
    pub fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        match status.as_u16() {
            400 => Self::BadRequest(message),
            401 => Self::AuthExpired(message),
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            _ => Self::ServerError {
                status: status.as_u16(),
                message,
            },
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Request(_) => ErrorKind::NetworkError,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::AuthExpired(_) => ErrorKind::AuthExpired,
            Self::SubscriptionExpired(_) => ErrorKind::SubscriptionExpired,
            Self::RefreshFailed { kind, .. } => *kind,
            Self::InvalidResponse(_) => ErrorKind::InvalidResponse,
            Self::ServerError { .. } | Self::NotFound(_) | Self::BadRequest(_) | Self::Forbidden(_) => {
                ErrorKind::ServerError
            }
            Self::Configuration(_) | Self::InvalidArgument(_) => ErrorKind::Configuration,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Whether the caller has to send the user back through login
    pub const fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired(_) | Self::RefreshFailed { .. })
    }

    /// Whether the failure is a billing lapse that should degrade, not log out
    pub const fn is_subscription_expired(&self) -> bool {
        matches!(self, Self::SubscriptionExpired(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error)
        } else if error.is_decode() {
            Self::InvalidResponse(error.to_string())
        } else {
            Self::Request(error)
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidResponse(error.to_string())
    }
}
