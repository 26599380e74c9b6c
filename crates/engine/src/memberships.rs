//! Membership upsert and expiry
//!
//! One live row per (telegram_user_id, community_id). The upsert overwrites
//! plan, status and validity window in place so community-side access checks
//! see the new subscription immediately after a charge; it never produces a
//! second row for the same pair.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::events::{EngineEventBuilder, EngineEventLogger, EngineEventType};

/// A per-user, per-community subscription record
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Membership {
    pub id: Uuid,
    pub telegram_user_id: String,
    pub community_id: Uuid,
    pub subscription_plan_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub is_active: bool,
    pub subscription_start_date: Option<OffsetDateTime>,
    pub subscription_end_date: Option<OffsetDateTime>,
    pub joined_at: OffsetDateTime,
    pub last_active: OffsetDateTime,
}

/// Fields written by one upsert
#[derive(Debug, Clone)]
pub struct MembershipUpsert {
    pub telegram_user_id: String,
    pub community_id: Uuid,
    pub plan_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub is_active: bool,
    pub start_date: OffsetDateTime,
    /// `None` for non-expiring (one-time/lifetime) plans
    pub end_date: Option<OffsetDateTime>,
}

/// Idempotent membership writes keyed on (telegram_user_id, community_id)
#[derive(Clone)]
pub struct MembershipUpdater {
    pool: PgPool,
    event_logger: EngineEventLogger,
}

impl MembershipUpdater {
    pub fn new(pool: PgPool) -> Self {
        let event_logger = EngineEventLogger::new(pool.clone());
        Self { pool, event_logger }
    }

    /// Create or overwrite the membership row for this user and community
    pub async fn upsert(&self, params: MembershipUpsert) -> EngineResult<bool> {
        let rows_affected = sqlx::query(
            r#"
            INSERT INTO memberships
                (telegram_user_id, community_id, subscription_plan_id, payment_id,
                 is_active, subscription_start_date, subscription_end_date,
                 joined_at, last_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
            ON CONFLICT (telegram_user_id, community_id) DO UPDATE SET
                subscription_plan_id = EXCLUDED.subscription_plan_id,
                payment_id = EXCLUDED.payment_id,
                is_active = EXCLUDED.is_active,
                subscription_start_date = EXCLUDED.subscription_start_date,
                subscription_end_date = EXCLUDED.subscription_end_date,
                last_active = NOW()
            "#,
        )
        .bind(&params.telegram_user_id)
        .bind(params.community_id)
        .bind(params.plan_id)
        .bind(params.payment_id)
        .bind(params.is_active)
        .bind(params.start_date)
        .bind(params.end_date)
        .execute(&self.pool)
        .await?
        .rows_affected();

        tracing::info!(
            telegram_user_id = %params.telegram_user_id,
            community_id = %params.community_id,
            plan_id = %params.plan_id,
            end_date = ?params.end_date,
            "Membership upserted"
        );

        self.event_logger
            .log_best_effort(
                EngineEventBuilder::new(EngineEventType::MembershipUpserted)
                    .community(params.community_id)
                    .user(&params.telegram_user_id)
                    .data(serde_json::json!({
                        "plan_id": params.plan_id,
                        "payment_id": params.payment_id,
                        "is_active": params.is_active,
                    })),
            )
            .await;

        Ok(rows_affected > 0)
    }

    /// The user's current membership in a community, if any
    pub async fn find(
        &self,
        telegram_user_id: &str,
        community_id: Uuid,
    ) -> EngineResult<Option<Membership>> {
        let membership: Option<Membership> = sqlx::query_as(
            r#"
            SELECT id, telegram_user_id, community_id, subscription_plan_id,
                   payment_id, is_active, subscription_start_date,
                   subscription_end_date, joined_at, last_active
            FROM memberships
            WHERE telegram_user_id = $1 AND community_id = $2
            "#,
        )
        .bind(telegram_user_id)
        .bind(community_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(membership)
    }

    /// End date of the user's still-active subscription, for carry-over
    pub async fn active_subscription_end(
        &self,
        telegram_user_id: &str,
        community_id: Uuid,
    ) -> EngineResult<Option<OffsetDateTime>> {
        let end: Option<Option<OffsetDateTime>> = sqlx::query_scalar(
            r#"
            SELECT subscription_end_date
            FROM memberships
            WHERE telegram_user_id = $1
              AND community_id = $2
              AND is_active = TRUE
              AND subscription_end_date IS NOT NULL
              AND subscription_end_date > NOW()
            "#,
        )
        .bind(telegram_user_id)
        .bind(community_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(end.flatten())
    }

    /// Deactivate memberships whose window has lapsed; returns rows changed
    ///
    /// Run by the worker daily. `is_active = false` together with an
    /// elapsed end date is what community-side access checks treat as "no
    /// access".
    pub async fn expire_lapsed(&self, now: OffsetDateTime) -> EngineResult<u64> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE memberships
            SET is_active = FALSE
            WHERE is_active = TRUE
              AND subscription_end_date IS NOT NULL
              AND subscription_end_date <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected > 0 {
            tracing::info!(expired = rows_affected, "Lapsed memberships deactivated");
            self.event_logger
                .log_best_effort(
                    EngineEventBuilder::new(EngineEventType::MembershipExpired)
                        .data(serde_json::json!({ "count": rows_affected })),
                )
                .await;
        }

        Ok(rows_affected)
    }
}
