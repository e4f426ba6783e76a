//! Authentication module: the client side of the session lifecycle.
//!
//! This module provides:
//! - `SessionManager`: login, logout, silent refresh and startup rehydration
//! - `TokenStore`: durable storage for tokens and the cached identity
//! - `claims`: local decoding of JWT access tokens
//! - `IdentityResolver`: server identity with token-claims fallback
//! - `RefreshScheduler`: the single cancellable refresh timer
//! - `RouteGuard`: allow/deny decisions for protected views
//!
//! Access tokens are renewed 60 seconds before they expire. A failed renewal
//! ends the session.

pub mod claims;
pub mod guard;
pub mod identity;
pub mod keyring_store;
pub mod scheduler;
pub mod session;
pub mod store;

pub use claims::{decode, try_decode, Claims, DecodeError, RoleClaim};
pub use guard::{Access, GuardError, RouteGuard, LOGIN_ROUTE};
pub use identity::{IdentityRecord, IdentityResolver, IdentitySource, ResolveError, ResolvedIdentity};
pub use keyring_store::KeyringStore;
pub use scheduler::{refresh_delay, RefreshScheduler};
pub use session::{SessionError, SessionManager, SessionSnapshot, SessionStatus};
pub use store::{CredentialPair, FileStore, KeyValueStore, MemoryStore, StoredSession, TokenStore};
