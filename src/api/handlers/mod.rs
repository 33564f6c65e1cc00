//! API handlers for custodia.

pub mod auth;
pub mod health;
