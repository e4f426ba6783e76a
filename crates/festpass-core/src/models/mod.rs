//! Data models for the festival back office.
//!
//! Field names follow the backend's French wire names through serde renames;
//! the Rust side uses English names.

pub mod registration;
pub mod user;

pub use registration::{
    distinct_values, CreatedRegistration, NewRegistration, Registration, RegistrationFilter,
    RegistrationStatus, Statistics, StatusUpdate, DEFAULT_PROFILE, PROFILE_REQUIRING_BIRTH_DATE,
};
pub use user::{AdminUser, CreatedUser, NewUser, DEFAULT_USER_LANGUAGE, DEFAULT_USER_ROLE};
