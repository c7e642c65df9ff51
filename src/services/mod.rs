//! Business logic, kept apart from the HTTP layer.
//!
//! `auth` covers dashboard login (session tokens plus the stored
//! password); `provisioning` holds the status/guard/dispatch logic for
//! the TTN-facing sensor actions.

pub mod auth;
pub mod provisioning;
