//! # Custodia (Ledger Authentication Authority)
//!
//! `custodia` is the authentication and identity service for the contract
//! ledger. It issues short-lived JWT access tokens and long-lived refresh
//! tokens, delivered exclusively through `HttpOnly` cookies, and keeps the
//! GDPR and audit bookkeeping that goes with them.
//!
//! ## Session Model
//!
//! - **Cookie-only transport:** tokens never travel in the `Authorization`
//!   header or response bodies. A separate non-`HttpOnly` `csrf_token` cookie
//!   backs double-submit CSRF checks on state-changing requests.
//! - **Refresh rotation:** every successful refresh consumes the presented
//!   refresh token by inserting its `jti` into a denylist and issues a
//!   replacement. Rotation is on by default and can be disabled by
//!   configuration, in which case the denylist is still honored read-only.
//! - **Lockout:** five consecutive failed password checks lock an identity
//!   for thirty minutes. The per-IP rate limiter is an independent layer.
//!
//! ## Data Protection
//!
//! Consent records are upserted per `(user, consent-type)`, every
//! security-relevant action lands in an append-only audit log, and a
//! background sweeper purges audit entries past the retention horizon
//! (180 days by default).

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
