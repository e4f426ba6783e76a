//! festpass-core: client library for the Ecofest registration back office.
//!
//! - [`auth`]: session lifecycle (login, logout, silent refresh, rehydration),
//!   token storage, JWT claims decoding, identity resolution and route guard
//! - [`api`]: REST client for the token, identity, admin and public endpoints
//! - [`models`]: registrations, users and statistics
//! - [`export`]: CSV export of registrations
//! - [`config`]: configuration file and environment overrides

pub mod api;
pub mod auth;
pub mod config;
pub mod export;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{IdentityRecord, RouteGuard, SessionManager, SessionSnapshot, SessionStatus, TokenStore};
pub use config::Config;
