//! Auth handlers and supporting modules.
//!
//! The split mirrors the flow of a request: `sign_in`/`session`/
//! `verification` validate the transport, `service` runs the credential and
//! session logic, `store` persists it. `token` and `password` are pure
//! primitives underneath.
//!
//! ## Lockout
//!
//! Failed sign-ins are counted per account at the storage layer; crossing
//! the threshold locks the account for the configured window. Locked
//! attempts are denied before any hash work and consume no attempt.

pub(crate) mod cookies;
pub mod error;
mod password;
pub mod principal;
pub mod service;
pub(crate) mod session;
pub(crate) mod sign_in;
pub mod state;
pub mod store;
pub mod token;
pub(crate) mod types;
mod utils;
pub(crate) mod verification;

pub use error::AuthError;
pub use principal::{CapabilitySet, Principal};
pub use state::{AuthConfig, AuthState};
