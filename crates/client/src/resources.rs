//! Inventory endpoints, passed through as JSON

use crate::client::{ApiClient, ApiRequest};
use crate::error::ClientError;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Admin-managed resource collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Software,
    Licenses,
    Orders,
    Subscriptions,
}

impl Resource {
    pub const ALL: [Self; 4] = [Self::Software, Self::Licenses, Self::Orders, Self::Subscriptions];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Software => "software",
            Self::Licenses => "licenses",
            Self::Orders => "orders",
            Self::Subscriptions => "subscriptions",
        }
    }

    pub const fn path(self) -> &'static str {
        match self {
            Self::Software => "/api/software",
            Self::Licenses => "/api/licenses",
            Self::Orders => "/api/orders",
            Self::Subscriptions => "/api/subscriptions",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
#[error("unknown resource {0:?}, expected one of software, licenses, orders, subscriptions")]
pub struct UnknownResource(String);

impl FromStr for Resource {
    type Err = UnknownResource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|resource| resource.name() == wanted)
            .ok_or_else(|| UnknownResource(s.to_string()))
    }
}

fn item_path(resource: Resource, id: &str) -> Result<String, ClientError> {
    let valid = id.chars().any(|c| c != '.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(ClientError::InvalidArgument(format!("invalid {resource} id {id:?}")));
    }
    Ok(format!("{}/{id}", resource.path()))
}

impl ApiClient {
    pub async fn list(&self, resource: Resource) -> Result<Value, ClientError> {
        self.execute(ApiRequest::get(resource.path())).await
    }

    pub async fn get(&self, resource: Resource, id: &str) -> Result<Value, ClientError> {
        self.execute(ApiRequest::get(item_path(resource, id)?)).await
    }

    pub async fn create(&self, resource: Resource, body: Value) -> Result<Value, ClientError> {
        self.execute(ApiRequest::post(resource.path()).json(body)).await
    }

    pub async fn update(&self, resource: Resource, id: &str, body: Value) -> Result<Value, ClientError> {
        self.execute(ApiRequest::new(Method::PUT, item_path(resource, id)?).json(body))
            .await
    }

    pub async fn delete(&self, resource: Resource, id: &str) -> Result<Value, ClientError> {
        self.execute(ApiRequest::new(Method::DELETE, item_path(resource, id)?))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resource_names() {
        assert_eq!("Orders".parse::<Resource>().unwrap(), Resource::Orders);
        assert_eq!(" software ".parse::<Resource>().unwrap(), Resource::Software);
        assert!("invoices".parse::<Resource>().is_err());
    }

    #[test]
    fn item_paths_reject_path_injection() {
        assert_eq!(item_path(Resource::Licenses, "lic_42").unwrap(), "/api/licenses/lic_42");
        for id in ["", "..", "../users", "a/b", "x y"] {
            assert!(matches!(
                item_path(Resource::Orders, id),
                Err(ClientError::InvalidArgument(_))
            ));
        }
    }
}
