//! AI usage ledger and subscription quota.
//!
//! Every completed generation is written to `ai_usage`.  Callers with an
//! active row in `subscriptions` are unlimited; everyone else shares a
//! monthly free quota counted from the ledger.  Quota state is always read
//! fresh from the database so two concurrent requests never see a cached
//! answer.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// Token consumption of one completed generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    /// The caller the usage is billed to, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Model that served the request.
    pub model_id: String,
    /// Input tokens across every step of the turn.
    pub prompt_tokens: u32,
    /// Output tokens across every step of the turn.
    pub completion_tokens: u32,
}

/// Outcome of a subscription / quota evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionCheck {
    pub can_proceed: bool,
    /// Free requests left this month; `None` means unlimited.
    pub requests_remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubscriptionCheck {
    /// An active subscriber.
    pub fn unlimited() -> Self {
        Self {
            can_proceed: true,
            requests_remaining: None,
            error: None,
        }
    }

    /// A free-tier caller with quota left.
    pub fn allowed(remaining: u32) -> Self {
        Self {
            can_proceed: true,
            requests_remaining: Some(remaining),
            error: None,
        }
    }

    /// A refused caller.
    pub fn denied(error: impl Into<String>, remaining: u32) -> Self {
        Self {
            can_proceed: false,
            requests_remaining: Some(remaining),
            error: Some(error.into()),
        }
    }
}

/// Aggregated usage for one caller in the current month.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub requests: u32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

// ═══════════════════════════════════════════════════════════════════════
//  Collaborator traits
// ═══════════════════════════════════════════════════════════════════════

/// Decides whether a caller may start an AI generation.
#[async_trait]
pub trait SubscriptionService: Send + Sync {
    async fn check(&self, user_id: Option<&str>) -> StoreResult<SubscriptionCheck>;
}

/// Persists token usage after a generation completes.
#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn record(&self, record: &UsageRecord) -> StoreResult<()>;
}

// ═══════════════════════════════════════════════════════════════════════
//  SQLite implementation
// ═══════════════════════════════════════════════════════════════════════

/// Message shown to callers without a session.
pub const SIGN_IN_REQUIRED: &str = "Please sign in to use AI features.";

/// Message shown when the free quota is spent.
pub const FREE_LIMIT_REACHED: &str =
    "You've reached your free AI request limit for this month. Upgrade to Pro to continue.";

/// Usage ledger and quota evaluation backed by [`Database`].
#[derive(Clone)]
pub struct UsageStore {
    db: Database,
    free_requests_per_month: u32,
}

impl UsageStore {
    pub fn new(db: Database, free_requests_per_month: u32) -> Self {
        Self {
            db,
            free_requests_per_month,
        }
    }

    /// The configured free quota.
    pub fn free_requests_per_month(&self) -> u32 {
        self.free_requests_per_month
    }

    /// Evaluate the quota as of `now`.
    #[instrument(skip(self), level = "debug")]
    pub async fn check_at(
        &self,
        user_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<SubscriptionCheck> {
        let Some(user_id) = user_id else {
            return Ok(SubscriptionCheck::denied(SIGN_IN_REQUIRED, 0));
        };

        if self.is_subscribed_at(user_id, now).await? {
            return Ok(SubscriptionCheck::unlimited());
        }

        let used = self.summary_at(user_id, now).await?.requests;
        let remaining = self.free_requests_per_month.saturating_sub(used);
        debug!(user_id, used, remaining, "evaluated free quota");

        if remaining == 0 {
            Ok(SubscriptionCheck::denied(FREE_LIMIT_REACHED, 0))
        } else {
            Ok(SubscriptionCheck::allowed(remaining))
        }
    }

    /// Whether `user_id` has an active, unexpired subscription at `now`.
    pub async fn is_subscribed_at(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let user_id = user_id.to_owned();
        let now = now.timestamp();
        self.db
            .execute(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM subscriptions \
                     WHERE user_id = ?1 AND status = 'active' \
                       AND (expires_at IS NULL OR expires_at > ?2)",
                    rusqlite::params![user_id, now],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await
    }

    /// Usage of `user_id` in the calendar month (UTC) containing `now`.
    pub async fn summary_at(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<UsageSummary> {
        let user_id = user_id.to_owned();
        let since = month_start(now)?;
        self.db
            .execute(move |conn| {
                let summary = conn.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(prompt_tokens), 0), COALESCE(SUM(completion_tokens), 0) \
                     FROM ai_usage WHERE user_id = ?1 AND created_at >= ?2",
                    rusqlite::params![user_id, since],
                    |row| {
                        Ok(UsageSummary {
                            requests: row.get::<_, i64>(0)? as u32,
                            prompt_tokens: row.get::<_, i64>(1)? as u64,
                            completion_tokens: row.get::<_, i64>(2)? as u64,
                        })
                    },
                )?;
                Ok(summary)
            })
            .await
    }

    /// Write a usage row stamped with `at`.
    pub async fn record_at(&self, record: &UsageRecord, at: DateTime<Utc>) -> StoreResult<()> {
        if record.model_id.is_empty() {
            return Err(StoreError::InvalidArgument("usage record without model id".into()));
        }
        let record = record.clone();
        let at = at.timestamp();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO ai_usage (user_id, model_id, prompt_tokens, completion_tokens, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        record.user_id,
                        record.model_id,
                        record.prompt_tokens,
                        record.completion_tokens,
                        at
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Mark `user_id` as a subscriber, optionally until `expires_at`.
    pub async fn grant_subscription(
        &self,
        user_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let user_id = user_id.to_owned();
        let expires_at = expires_at.map(|t| t.timestamp());
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO subscriptions (user_id, status, expires_at, updated_at) \
                     VALUES (?1, 'active', ?2, ?3) \
                     ON CONFLICT(user_id) DO UPDATE SET status = 'active', \
                       expires_at = excluded.expires_at, updated_at = excluded.updated_at",
                    rusqlite::params![user_id, expires_at, now],
                )?;
                Ok(())
            })
            .await
    }

    /// Cancel the subscription of `user_id`.
    pub async fn revoke_subscription(&self, user_id: &str) -> StoreResult<()> {
        let id = user_id.to_owned();
        let now = Utc::now().timestamp();
        let changed = self
            .db
            .execute(move |conn| {
                let n = conn.execute(
                    "UPDATE subscriptions SET status = 'canceled', updated_at = ?2 WHERE user_id = ?1",
                    rusqlite::params![id, now],
                )?;
                Ok(n)
            })
            .await?;

        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "subscription",
                id: user_id.to_owned(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionService for UsageStore {
    async fn check(&self, user_id: Option<&str>) -> StoreResult<SubscriptionCheck> {
        self.check_at(user_id, Utc::now()).await
    }
}

#[async_trait]
impl UsageLedger for UsageStore {
    async fn record(&self, record: &UsageRecord) -> StoreResult<()> {
        self.record_at(record, Utc::now()).await
    }
}

/// Unix timestamp of 00:00 UTC on the first day of `now`'s month.
fn month_start(now: DateTime<Utc>) -> StoreResult<i64> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .map(|t| t.timestamp())
        .ok_or_else(|| StoreError::InvalidArgument(format!("no month start for {now}")))
}

// ── tests ────────────────────────────────────────────────────────────
