//! Per-IP rate limiting for the login and registration endpoints.
//!
//! Two implementations sit behind the same trait: an in-memory sliding
//! window for single-process deployments and tests, and a
//! `PostgreSQL`-backed limiter that shares the attempt log across service
//! instances. The identity-level lockout in `storage` is an independent
//! layer; either may reject a request.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{Instrument, error};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    Login,
    Register,
}

impl RateLimitAction {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Register => "register",
        }
    }

    /// Default windows: login 5 attempts / 5 minutes, registration
    /// 3 attempts / 60 minutes.
    fn default_rule(self) -> RateLimitRule {
        match self {
            Self::Login => RateLimitRule {
                max_attempts: 5,
                window: Duration::from_secs(5 * 60),
            },
            Self::Register => RateLimitRule {
                max_attempts: 3,
                window: Duration::from_secs(60 * 60),
            },
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RateLimitRule {
    pub max_attempts: usize,
    pub window: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after_seconds: u64 },
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Check and record one attempt. Requests without an attributable client
    /// IP are allowed; the lockout layer still applies to them.
    async fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn check_ip(&self, _ip: Option<&str>, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

/// Sliding-window limiter held in process memory.
///
/// State is per-process: in a multi-process deployment every process enforces
/// its own window. Use [`PgRateLimiter`] when instances must share state.
pub struct MemoryRateLimiter {
    windows: Mutex<HashMap<(String, RateLimitAction), Vec<Instant>>>,
    rules: HashMap<RateLimitAction, RateLimitRule>,
}

impl MemoryRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            rules: HashMap::new(),
        }
    }

    /// Override the rule for one action (tests shrink the window this way).
    #[must_use]
    pub fn with_rule(mut self, action: RateLimitAction, rule: RateLimitRule) -> Self {
        self.rules.insert(action, rule);
        self
    }

    fn rule(&self, action: RateLimitAction) -> RateLimitRule {
        self.rules
            .get(&action)
            .copied()
            .unwrap_or_else(|| action.default_rule())
    }
}

impl Default for MemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision {
        let Some(ip) = ip else {
            return RateLimitDecision::Allowed;
        };
        let rule = self.rule(action);
        let now = Instant::now();

        let Ok(mut windows) = self.windows.lock() else {
            // A poisoned lock means a panic elsewhere; fail closed.
            return RateLimitDecision::Limited {
                retry_after_seconds: rule.window.as_secs(),
            };
        };
        let entries = windows.entry((ip.to_string(), action)).or_default();
        entries.retain(|at| now.duration_since(*at) < rule.window);

        if entries.len() >= rule.max_attempts {
            let oldest = entries[0];
            let retry_after = rule
                .window
                .saturating_sub(now.duration_since(oldest))
                .as_secs();
            return RateLimitDecision::Limited {
                retry_after_seconds: retry_after,
            };
        }

        entries.push(now);
        RateLimitDecision::Allowed
    }
}

/// Attempt log in `auth_attempts`, shared by every service instance.
///
/// Database errors fail closed. Rejected attempts are not recorded, so a
/// blocked client regains one slot as each old attempt leaves the window.
pub struct PgRateLimiter {
    pool: PgPool,
}

impl PgRateLimiter {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn count_and_oldest(
        &self,
        ip: &str,
        action: RateLimitAction,
        window: Duration,
    ) -> Result<(i64, Option<chrono::DateTime<chrono::Utc>>), sqlx::Error> {
        let query = r"
            SELECT COUNT(*) AS attempts, MIN(created_at) AS oldest
            FROM auth_attempts
            WHERE ip_address = $1::inet
              AND action = $2
              AND created_at > NOW() - ($3 * INTERVAL '1 second')
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .bind(ip)
            .bind(action.as_str())
            .bind(i64::try_from(window.as_secs()).unwrap_or(i64::MAX))
            .fetch_one(&self.pool)
            .instrument(span)
            .await?;
        Ok((row.get("attempts"), row.get("oldest")))
    }

    async fn record_attempt(&self, ip: &str, action: RateLimitAction) -> Result<(), sqlx::Error> {
        let query = "INSERT INTO auth_attempts (ip_address, action) VALUES ($1::inet, $2)";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT"
        );
        sqlx::query(query)
            .bind(ip)
            .bind(action.as_str())
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RateLimiter for PgRateLimiter {
    async fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision {
        let Some(ip) = ip else {
            return RateLimitDecision::Allowed;
        };
        let rule = action.default_rule();

        let (attempts, oldest) = match self.count_and_oldest(ip, action, rule.window).await {
            Ok(row) => row,
            Err(err) => {
                error!("Failed to count auth attempts: {err}");
                return RateLimitDecision::Limited {
                    retry_after_seconds: rule.window.as_secs(),
                };
            }
        };

        if attempts >= i64::try_from(rule.max_attempts).unwrap_or(i64::MAX) {
            let retry_after_seconds = oldest
                .map(|oldest| {
                    let free_at =
                        oldest + chrono::Duration::seconds(rule.window.as_secs().try_into().unwrap_or(i64::MAX));
                    (free_at - chrono::Utc::now()).num_seconds().max(0)
                })
                .and_then(|seconds| u64::try_from(seconds).ok())
                .unwrap_or(0);
            return RateLimitDecision::Limited {
                retry_after_seconds,
            };
        }

        if let Err(err) = self.record_attempt(ip, action).await {
            error!("Failed to record auth attempt: {err}");
            return RateLimitDecision::Limited {
                retry_after_seconds: rule.window.as_secs(),
            };
        }
        RateLimitDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        assert_eq!(
            limiter.check_ip(None, RateLimitAction::Login).await,
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter
                .check_ip(Some("127.0.0.1"), RateLimitAction::Register)
                .await,
            RateLimitDecision::Allowed
        );
    }

    #[tokio::test]
    async fn memory_limiter_allows_up_to_the_limit() {
        let limiter = MemoryRateLimiter::new();
        for _ in 0..5 {
            assert_eq!(
                limiter
                    .check_ip(Some("10.0.0.1"), RateLimitAction::Login)
                    .await,
                RateLimitDecision::Allowed
            );
        }
        let decision = limiter
            .check_ip(Some("10.0.0.1"), RateLimitAction::Login)
            .await;
        assert!(matches!(decision, RateLimitDecision::Limited { .. }));
        if let RateLimitDecision::Limited {
            retry_after_seconds,
        } = decision
        {
            assert!(retry_after_seconds <= 5 * 60);
        }
    }

    #[tokio::test]
    async fn memory_limiter_tracks_ips_and_actions_independently() {
        let limiter = MemoryRateLimiter::new();
        for _ in 0..5 {
            limiter
                .check_ip(Some("10.0.0.1"), RateLimitAction::Login)
                .await;
        }
        assert!(matches!(
            limiter
                .check_ip(Some("10.0.0.1"), RateLimitAction::Login)
                .await,
            RateLimitDecision::Limited { .. }
        ));
        // A different IP and a different action remain unaffected.
        assert_eq!(
            limiter
                .check_ip(Some("10.0.0.2"), RateLimitAction::Login)
                .await,
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter
                .check_ip(Some("10.0.0.1"), RateLimitAction::Register)
                .await,
            RateLimitDecision::Allowed
        );
    }

    #[tokio::test]
    async fn memory_limiter_window_expiry_readmits() {
        let limiter = MemoryRateLimiter::new().with_rule(
            RateLimitAction::Login,
            RateLimitRule {
                max_attempts: 2,
                window: Duration::from_millis(50),
            },
        );
        for _ in 0..2 {
            limiter
                .check_ip(Some("10.0.0.1"), RateLimitAction::Login)
                .await;
        }
        assert!(matches!(
            limiter
                .check_ip(Some("10.0.0.1"), RateLimitAction::Login)
                .await,
            RateLimitDecision::Limited { .. }
        ));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            limiter
                .check_ip(Some("10.0.0.1"), RateLimitAction::Login)
                .await,
            RateLimitDecision::Allowed
        );
    }

    #[tokio::test]
    async fn memory_limiter_allows_unattributable_clients() {
        let limiter = MemoryRateLimiter::new().with_rule(
            RateLimitAction::Login,
            RateLimitRule {
                max_attempts: 1,
                window: Duration::from_secs(60),
            },
        );
        for _ in 0..10 {
            assert_eq!(
                limiter.check_ip(None, RateLimitAction::Login).await,
                RateLimitDecision::Allowed
            );
        }
    }

    const SCHEMA_SQL: &str =
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/db/sql/01_custodia.sql"));

    async fn test_pool() -> Result<Option<PgPool>> {
        let Ok(dsn) = std::env::var("CUSTODIA_TEST_DSN") else {
            eprintln!("Skipping database test: CUSTODIA_TEST_DSN not set");
            return Ok(None);
        };
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&dsn)
            .await?;
        sqlx::Executor::execute(&pool, SCHEMA_SQL).await?;
        Ok(Some(pool))
    }

    #[tokio::test]
    async fn pg_limiter_limits_sixth_login_attempt() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        sqlx::query("DELETE FROM auth_attempts")
            .execute(&pool)
            .await?;

        let limiter = PgRateLimiter::new(pool);
        for _ in 0..5 {
            assert_eq!(
                limiter
                    .check_ip(Some("192.0.2.7"), RateLimitAction::Login)
                    .await,
                RateLimitDecision::Allowed
            );
        }
        let decision = limiter
            .check_ip(Some("192.0.2.7"), RateLimitAction::Login)
            .await;
        assert!(matches!(decision, RateLimitDecision::Limited { .. }));

        // Unrelated IPs are still admitted.
        assert_eq!(
            limiter
                .check_ip(Some("192.0.2.8"), RateLimitAction::Login)
                .await,
            RateLimitDecision::Allowed
        );
        Ok(())
    }
}
