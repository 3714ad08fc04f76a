//! LicenseDesk admin client core
//!
//! Resolves which backend a tenant talks to, keeps the session across two
//! storage tiers, refreshes expired tokens once for all concurrent callers,
//! and watches backend health.

pub mod auth;
pub mod client;
pub mod error;
pub mod monitor;
pub mod refresh;
pub mod reply;
pub mod resolver;
pub mod resources;
pub mod session;
pub mod storage;
pub mod types;

pub use client::{ApiClient, ApiClientBuilder, ApiRequest, AuthFailedCallback};
pub use error::{ClientError, ErrorKind, Result};
pub use monitor::{ConnectionMonitor, ConnectionState, ConnectionStatus, DEFAULT_POLL_INTERVAL};
pub use refresh::RefreshCoordinator;
pub use reply::Reply;
pub use resolver::{BackendResolver, DEFAULT_BACKEND_URL, HostMapping, resolve_backend_url};
pub use resources::{Resource, UnknownResource};
pub use session::{PersistenceTier, Session, TokenStore};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError};
pub use types::{Role, UserId, UserProfile};
