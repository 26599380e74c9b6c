//! Persisted engine event log
//!
//! Best-effort audit trail of what the engine did and why. Logging failures
//! are reported through `tracing` and never fail the operation that emitted
//! the event.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::EngineResult;

/// Types of engine events that get logged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEventType {
    CouponApplied,
    CouponExhausted,
    ChargeSucceeded,
    ChargePending,
    ChargeFailed,
    PaymentRecorded,
    MembershipUpserted,
    MembershipExpired,
    InviteIssued,
    InviteUnavailable,
    PendingAssumedComplete,
    PendingExpired,
}

impl EngineEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineEventType::CouponApplied => "coupon_applied",
            EngineEventType::CouponExhausted => "coupon_exhausted",
            EngineEventType::ChargeSucceeded => "charge_succeeded",
            EngineEventType::ChargePending => "charge_pending",
            EngineEventType::ChargeFailed => "charge_failed",
            EngineEventType::PaymentRecorded => "payment_recorded",
            EngineEventType::MembershipUpserted => "membership_upserted",
            EngineEventType::MembershipExpired => "membership_expired",
            EngineEventType::InviteIssued => "invite_issued",
            EngineEventType::InviteUnavailable => "invite_unavailable",
            EngineEventType::PendingAssumedComplete => "pending_assumed_complete",
            EngineEventType::PendingExpired => "pending_expired",
        }
    }
}

impl std::fmt::Display for EngineEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Builder for an engine event
#[derive(Debug, Clone)]
pub struct EngineEventBuilder {
    event_type: EngineEventType,
    community_id: Option<Uuid>,
    telegram_user_id: Option<String>,
    data: serde_json::Value,
}

impl EngineEventBuilder {
    pub fn new(event_type: EngineEventType) -> Self {
        Self {
            event_type,
            community_id: None,
            telegram_user_id: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn community(mut self, community_id: Uuid) -> Self {
        self.community_id = Some(community_id);
        self
    }

    pub fn user(mut self, telegram_user_id: impl Into<String>) -> Self {
        self.telegram_user_id = Some(telegram_user_id.into());
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Writes engine events to the `engine_events` table
#[derive(Clone)]
pub struct EngineEventLogger {
    pool: PgPool,
}

impl EngineEventLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert one event row
    ///
    /// Callers that must not fail on logging errors should use
    /// [`log_best_effort`](Self::log_best_effort) instead.
    pub async fn log_event(&self, event: EngineEventBuilder) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO engine_events (event_type, community_id, telegram_user_id, data)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(event.event_type.as_str())
        .bind(event.community_id)
        .bind(&event.telegram_user_id)
        .bind(&event.data)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert one event row, downgrading failures to a warning
    pub async fn log_best_effort(&self, event: EngineEventBuilder) {
        let event_type = event.event_type;
        if let Err(e) = self.log_event(event).await {
            tracing::warn!(
                event_type = %event_type,
                error = %e,
                "Failed to persist engine event"
            );
        }
    }
}
