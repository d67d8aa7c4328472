//! API handlers for Custodia.

pub mod auth;
pub mod health;
