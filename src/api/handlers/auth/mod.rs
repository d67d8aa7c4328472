//! Auth handlers and supporting modules.
//!
//! This module implements the cookie-based JWT session protocol: issuance,
//! transparent refresh with rotation, revocation through a denylist, and the
//! rate-limit/lockout/audit machinery around it.
//!
//! ## Transport Policy
//!
//! Tokens travel only in `HttpOnly` cookies (`access_token`,
//! `refresh_token`). The refresh endpoint reads its input exclusively from
//! the cookie, never from the request body, and no response body ever
//! echoes a token value. A non-`HttpOnly` `csrf_token` cookie feeds the
//! double-submit check on state-changing requests.
//!
//! ## Failure Policy
//!
//! Token verification fails closed and responses stay vague: signature,
//! expiry, type, and denylist failures all surface as the same invalid-token
//! answer, and credential failures never reveal which part was wrong. Token
//! failures clear the cookies so clients do not retry with stale state.

mod audit;
mod cookies;
mod error;
pub(crate) mod gdpr;
pub(crate) mod login;
mod password;
mod principal;
pub(crate) mod profile;
mod rate_limit;
pub(crate) mod register;
pub(crate) mod session;
mod state;
mod storage;
mod tokens;
pub(crate) mod types;
mod utils;

pub(crate) use audit::spawn_retention_worker;
pub use error::{AuthError, FieldError};
pub use rate_limit::{
    MemoryRateLimiter, NoopRateLimiter, PgRateLimiter, RateLimitAction, RateLimitDecision,
    RateLimitRule, RateLimiter,
};
pub use state::{AuthConfig, AuthState};
