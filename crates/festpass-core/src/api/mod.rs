//! REST API client module for the festival registration backend.
//!
//! This module provides the `ApiClient` for the token endpoints, the identity
//! endpoint, the admin back office and the public registration form.
//!
//! Admin endpoints use JWT bearer authentication; the tokens are obtained and
//! kept fresh by [`crate::auth::SessionManager`].

pub mod client;
pub mod error;

pub use client::{ApiClient, Download, IssuedTokens};
pub use error::ApiError;
