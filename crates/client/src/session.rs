//! Credential persistence across the durable and ephemeral storage tiers

use crate::storage::{MemoryStorage, Storage, StorageError};
use crate::types::UserProfile;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

pub const TOKEN_KEY: &str = "token";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const USER_KEY: &str = "user";
pub const BACKEND_URL_KEY: &str = "backendUrl";
pub const REMEMBER_KEY: &str = "remember";

/// Keys that belong to a session and go away on logout
const SESSION_KEYS: [&str; 4] = [TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY, REMEMBER_KEY];

/// Which storage tier a session lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceTier {
    /// Survives restarts ("remember me")
    Durable,
    /// Lives as long as the client process
    Ephemeral,
}

impl PersistenceTier {
    pub const fn from_remember(remember: bool) -> Self {
        if remember { Self::Durable } else { Self::Ephemeral }
    }

    pub const fn other(self) -> Self {
        match self {
            Self::Durable => Self::Ephemeral,
            Self::Ephemeral => Self::Durable,
        }
    }
}

impl fmt::Display for PersistenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Durable => f.write_str("durable"),
            Self::Ephemeral => f.write_str("ephemeral"),
        }
    }
}

/// Tokens of the signed-in user
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub tier: PersistenceTier,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("tier", &self.tier)
            .finish()
    }
}

/// Reads and writes session state over two storage tiers
///
/// A session is written to exactly one tier. Writing it also removes any
/// stale credentials from the other tier, by removal only.
#[derive(Clone)]
pub struct TokenStore {
    durable: Arc<dyn Storage>,
    ephemeral: Arc<dyn Storage>,
}

impl TokenStore {
    pub fn new(durable: Arc<dyn Storage>, ephemeral: Arc<dyn Storage>) -> Self {
        Self { durable, ephemeral }
    }

    /// Both tiers in memory; nothing outlives the process
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()), Arc::new(MemoryStorage::new()))
    }

    fn tier(&self, tier: PersistenceTier) -> &dyn Storage {
        match tier {
            PersistenceTier::Durable => self.durable.as_ref(),
            PersistenceTier::Ephemeral => self.ephemeral.as_ref(),
        }
    }

    /// Store a fresh session in the tier selected by `persistent`
    pub fn save(
        &self,
        token: &str,
        refresh_token: Option<&str>,
        persistent: bool,
    ) -> Result<Session, StorageError> {
        let tier = PersistenceTier::from_remember(persistent);

        let stale = self.tier(tier.other());
        for key in SESSION_KEYS {
            stale.remove_item(key)?;
        }

        let storage = self.tier(tier);
        storage.set_item(TOKEN_KEY, token)?;
        match refresh_token {
            Some(refresh_token) => storage.set_item(REFRESH_TOKEN_KEY, refresh_token)?,
            None => storage.remove_item(REFRESH_TOKEN_KEY)?,
        }
        storage.set_item(REMEMBER_KEY, if persistent { "true" } else { "false" })?;
        debug!(%tier, "saved session");

        Ok(Session {
            access_token: token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
            tier,
        })
    }

    /// Current session, durable tier first
    pub fn load(&self) -> Result<Option<Session>, StorageError> {
        for tier in [PersistenceTier::Durable, PersistenceTier::Ephemeral] {
            let storage = self.tier(tier);
            let Some(access_token) = storage.get_item(TOKEN_KEY)?.filter(|t| !t.is_empty()) else {
                continue;
            };
            let refresh_token = storage
                .get_item(REFRESH_TOKEN_KEY)?
                .filter(|t| !t.is_empty());
            return Ok(Some(Session {
                access_token,
                refresh_token,
                tier,
            }));
        }
        Ok(None)
    }

    /// Replace the tokens of the current session in its own tier
    ///
    /// Returns `None` without writing when there is no session anymore,
    /// e.g. because the user logged out while a refresh was in flight.
    pub fn update_tokens(
        &self,
        token: &str,
        refresh_token: Option<&str>,
    ) -> Result<Option<Session>, StorageError> {
        let Some(current) = self.load()? else {
            return Ok(None);
        };
        let storage = self.tier(current.tier);
        storage.set_item(TOKEN_KEY, token)?;
        if let Some(refresh_token) = refresh_token {
            storage.set_item(REFRESH_TOKEN_KEY, refresh_token)?;
        }
        Ok(Some(Session {
            access_token: token.to_string(),
            refresh_token: refresh_token.map(str::to_string).or(current.refresh_token),
            tier: current.tier,
        }))
    }

    /// Remove every session key from both tiers
    pub fn clear(&self) -> Result<(), StorageError> {
        for tier in [PersistenceTier::Durable, PersistenceTier::Ephemeral] {
            let storage = self.tier(tier);
            for key in SESSION_KEYS {
                storage.remove_item(key)?;
            }
        }
        debug!("cleared session from both tiers");
        Ok(())
    }

    /// Store the profile next to the current session
    ///
    /// Without a session the profile goes to the ephemeral tier, so the
    /// durable tier only ever holds data the user asked to remember.
    pub fn save_user(&self, profile: &UserProfile) -> Result<(), StorageError> {
        let tier = self
            .load()?
            .map_or(PersistenceTier::Ephemeral, |session| session.tier);
        let encoded = serde_json::to_string(profile)?;
        self.tier(tier).set_item(USER_KEY, &encoded)
    }

    /// Stored profile; an unreadable profile counts as absent
    pub fn load_user(&self) -> Result<Option<UserProfile>, StorageError> {
        for tier in [PersistenceTier::Durable, PersistenceTier::Ephemeral] {
            let Some(raw) = self.tier(tier).get_item(USER_KEY)? else {
                continue;
            };
            match serde_json::from_str(&raw) {
                Ok(profile) => return Ok(Some(profile)),
                Err(error) => warn!(%tier, %error, "ignoring unreadable stored user profile"),
            }
        }
        Ok(None)
    }

    /// Persisted backend origin preference
    pub fn backend_preference(&self) -> Result<Option<String>, StorageError> {
        for tier in [PersistenceTier::Ephemeral, PersistenceTier::Durable] {
            if let Some(url) = self.tier(tier).get_item(BACKEND_URL_KEY)? {
                return Ok(Some(url));
            }
        }
        Ok(None)
    }

    /// Persist a backend origin preference
    ///
    /// Goes to the active session's tier, or the durable tier before login.
    /// The preference is a device setting and survives [`TokenStore::clear`].
    pub fn set_backend_preference(&self, url: &str) -> Result<(), StorageError> {
        let tier = self
            .load()?
            .map_or(PersistenceTier::Durable, |session| session.tier);
        self.tier(tier.other()).remove_item(BACKEND_URL_KEY)?;
        self.tier(tier).set_item(BACKEND_URL_KEY, url)
    }

    pub fn clear_backend_preference(&self) -> Result<(), StorageError> {
        self.durable.remove_item(BACKEND_URL_KEY)?;
        self.ephemeral.remove_item(BACKEND_URL_KEY)
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore").finish_non_exhaustive()
    }
}
