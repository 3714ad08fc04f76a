//! Response decoding at the client boundary
//!
//! Every response is decoded exactly once into a [`Reply`]; call sites match
//! on the variant instead of inspecting ad hoc body fields.

use crate::error::ClientError;
use crate::types::ErrorBody;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

/// Decoded backend response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<T> {
    /// 2xx with a body of the expected shape
    Success(T),
    /// 401 without a subscription marker
    Unauthorized { message: String },
    /// Any non-success status carrying `subscriptionRequired: true`
    SubscriptionRequired { message: String },
    /// Any other non-success status
    Failure { status: StatusCode, message: String },
}

impl<T: DeserializeOwned> Reply<T> {
    /// Read and classify a response
    pub async fn decode(response: reqwest::Response) -> Result<Self, ClientError> {
        let status = response.status();
        let body = response.bytes().await?;
        Self::from_parts(status, &body)
    }

    pub fn from_parts(status: StatusCode, body: &[u8]) -> Result<Self, ClientError> {
        if status.is_success() {
            // Empty bodies (e.g. 204 on delete) decode as JSON null
            let body = if body.is_empty() { b"null".as_slice() } else { body };
            return Ok(Self::Success(serde_json::from_slice(body)?));
        }
        Ok(Self::from_error(status, body))
    }
}

impl<T> Reply<T> {
    /// Classify a non-success response
    pub fn from_error(status: StatusCode, body: &[u8]) -> Self {
        let parsed = serde_json::from_slice::<ErrorBody>(body).ok();
        let subscription_required = parsed.as_ref().is_some_and(|b| b.subscription_required);
        let message = parsed
            .and_then(|b| b.message.or(b.error))
            .unwrap_or_else(|| fallback_message(status, body));

        if subscription_required {
            Self::SubscriptionRequired { message }
        } else if status == StatusCode::UNAUTHORIZED {
            Self::Unauthorized { message }
        } else {
            Self::Failure { status, message }
        }
    }

    pub fn into_result(self) -> Result<T, ClientError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Unauthorized { message } => Err(ClientError::AuthExpired(message)),
            Self::SubscriptionRequired { message } => Err(ClientError::SubscriptionExpired(message)),
            Self::Failure { status, message } => Err(ClientError::from_status(status, message)),
        }
    }
}

fn fallback_message(status: StatusCode, body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        status.to_string()
    } else {
        text.to_string()
    }
}
