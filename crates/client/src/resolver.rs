//! Backend origin resolution
//!
//! Exactly one origin is authoritative for a request. Sources are consulted
//! in strict precedence:
//!
//! 1. the `backendUrl` field of the signed-in user's profile
//! 2. the persisted backend preference
//! 3. the hostname the client is served from, via a static mapping table
//! 4. the default origin

use crate::error::ClientError;
use crate::types::UserProfile;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

/// Origin used when nothing else matches
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";

/// Built-in hostname to origin table
const DEFAULT_HOSTS: &[(&str, &str)] = &[
    ("localhost", "http://localhost:5000"),
    ("127.0.0.1", "http://127.0.0.1:5000"),
];

static DEFAULT_RESOLVER: Lazy<BackendResolver> = Lazy::new(BackendResolver::default);

/// One configured hostname to origin mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostMapping {
    pub hostname: String,
    pub origin: String,
}

/// Maps the client's hostname to a backend origin
#[derive(Debug, Clone)]
pub struct BackendResolver {
    hosts: Vec<(String, Url)>,
    default_origin: Url,
}

impl BackendResolver {
    /// Resolver with an empty table
    pub const fn new(default_origin: Url) -> Self {
        Self {
            hosts: Vec::new(),
            default_origin,
        }
    }

    /// Add or replace a hostname mapping
    pub fn with_host(mut self, hostname: &str, origin: Url) -> Self {
        let hostname = normalize_host(hostname);
        self.hosts.retain(|(host, _)| *host != hostname);
        self.hosts.push((hostname, origin));
        self
    }

    /// Build a resolver from configuration values
    ///
    /// Configured mappings are layered over the built-in table.
    pub fn from_config(default_origin: &str, hosts: &[HostMapping]) -> Result<Self, ClientError> {
        let default_origin = parse_configured(default_origin)?;
        let mut resolver = Self::default();
        resolver.default_origin = default_origin;
        for mapping in hosts {
            resolver = resolver.with_host(&mapping.hostname, parse_configured(&mapping.origin)?);
        }
        Ok(resolver)
    }

    pub const fn default_origin(&self) -> &Url {
        &self.default_origin
    }

    /// Origin derived from the hostname alone
    pub fn origin_for_host(&self, hostname: &str) -> &Url {
        let hostname = normalize_host(hostname);
        self.hosts
            .iter()
            .find(|(host, _)| *host == hostname)
            .map_or(&self.default_origin, |(_, origin)| origin)
    }

    /// Pick the authoritative origin; never fails
    ///
    /// Blank or unparsable overrides fall through to the next source.
    pub fn resolve(
        &self,
        profile: Option<&UserProfile>,
        persisted_preference: Option<&str>,
        current_hostname: &str,
    ) -> Url {
        if let Some(url) = profile
            .and_then(|profile| profile.backend_url.as_deref())
            .and_then(|raw| parse_override(raw, "profile"))
        {
            return url;
        }

        if let Some(url) = persisted_preference.and_then(|raw| parse_override(raw, "preference")) {
            return url;
        }

        self.origin_for_host(current_hostname).clone()
    }
}

impl Default for BackendResolver {
    fn default() -> Self {
        let hosts = DEFAULT_HOSTS
            .iter()
            .filter_map(|(host, origin)| Url::parse(origin).ok().map(|url| ((*host).to_string(), url)))
            .collect();
        Self {
            hosts,
            default_origin: Url::parse(DEFAULT_BACKEND_URL).expect("default backend url is valid"),
        }
    }
}

/// Resolve with the built-in table
pub fn resolve_backend_url(
    profile: Option<&UserProfile>,
    persisted_preference: Option<&str>,
    current_hostname: &str,
) -> Url {
    DEFAULT_RESOLVER.resolve(profile, persisted_preference, current_hostname)
}

/// Join an origin and an absolute API path
pub(crate) fn endpoint(origin: &Url, path: &str) -> String {
    format!("{}{}", origin.as_str().trim_end_matches('/'), path)
}

fn normalize_host(hostname: &str) -> String {
    hostname.trim().trim_end_matches('.').to_ascii_lowercase()
}

fn parse_origin(raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    Url::parse(raw)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some())
}

fn parse_override(raw: &str, source: &str) -> Option<Url> {
    let parsed = parse_origin(raw);
    if parsed.is_none() && !raw.trim().is_empty() {
        warn!(source, value = raw, "ignoring invalid backend url");
    }
    parsed
}

fn parse_configured(raw: &str) -> Result<Url, ClientError> {
    parse_origin(raw)
        .ok_or_else(|| ClientError::Configuration(format!("invalid backend origin: {raw:?}")))
}
