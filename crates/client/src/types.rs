//! Wire types for the admin backend API

use serde::{Deserialize, Serialize};
use std::fmt;

/// Login endpoint
pub const LOGIN_PATH: &str = "/api/login";
/// Token exchange endpoint
pub const REFRESH_PATH: &str = "/api/user/refresh";
/// Health probe endpoint
pub const HEALTH_PATH: &str = "/api/test";

/// User identifier; the backend emits either numeric or string ids
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Number(i64),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
    /// Any role this client does not know about, kept verbatim
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admin => f.write_str("admin"),
            Self::User => f.write_str("user"),
            Self::Other(role) => f.write_str(role),
        }
    }
}

/// Profile of the signed-in tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub role: Role,
    /// Per-tenant backend override; takes precedence over every other source
    #[serde(default)]
    pub backend_url: Option<String>,
    #[serde(default)]
    pub subscription_active: bool,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub token: String,
    /// Rotated refresh token; absent means the old one stays valid
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Error payload shared by every endpoint
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub subscription_required: bool,
}
