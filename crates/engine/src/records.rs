//! Append-only payment records
//!
//! One row per charge attempt, including pending and failed ones, so the
//! audit trail survives client crashes mid-flow. A retry is always a new
//! row; existing rows are never updated.

use passhub_shared::{PaymentMethod, PaymentStatus};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::events::{EngineEventBuilder, EngineEventLogger, EngineEventType};

/// Fields of a payment attempt about to be recorded
#[derive(Debug, Clone)]
pub struct NewPaymentRecord {
    pub plan_id: Uuid,
    pub community_id: Uuid,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    /// Provider reference (payment intent id, order id, ticket reference)
    pub provider_reference: Option<String>,
    /// Stored invite-link column value, when one was already issued
    pub invite_link: Option<String>,
    pub telegram_user_id: String,
    pub telegram_username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// A persisted payment attempt
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub community_id: Uuid,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub provider_reference: Option<String>,
    pub invite_link: Option<String>,
    pub telegram_user_id: String,
    pub telegram_username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Writes payment attempt rows
#[derive(Clone)]
pub struct PaymentRecorder {
    pool: PgPool,
    event_logger: EngineEventLogger,
}

impl PaymentRecorder {
    pub fn new(pool: PgPool) -> Self {
        let event_logger = EngineEventLogger::new(pool.clone());
        Self { pool, event_logger }
    }

    /// Insert one attempt row and return it
    pub async fn record(&self, new: NewPaymentRecord) -> EngineResult<PaymentRecord> {
        let record: PaymentRecord = sqlx::query_as(
            r#"
            INSERT INTO payments
                (plan_id, community_id, amount_cents, method, status,
                 provider_reference, invite_link, telegram_user_id,
                 telegram_username, first_name, last_name)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id, plan_id, community_id, amount_cents, method, status,
                      provider_reference, invite_link, telegram_user_id,
                      telegram_username, first_name, last_name, created_at
            "#,
        )
        .bind(new.plan_id)
        .bind(new.community_id)
        .bind(new.amount_cents)
        .bind(new.method)
        .bind(new.status)
        .bind(&new.provider_reference)
        .bind(&new.invite_link)
        .bind(&new.telegram_user_id)
        .bind(&new.telegram_username)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            payment_id = %record.id,
            community_id = %record.community_id,
            telegram_user_id = %record.telegram_user_id,
            amount_cents = record.amount_cents,
            method = %record.method,
            status = %record.status.as_str(),
            "Payment attempt recorded"
        );

        self.event_logger
            .log_best_effort(
                EngineEventBuilder::new(EngineEventType::PaymentRecorded)
                    .community(record.community_id)
                    .user(&record.telegram_user_id)
                    .data(serde_json::json!({
                        "payment_id": record.id,
                        "amount_cents": record.amount_cents,
                        "method": record.method.as_str(),
                        "status": record.status.as_str(),
                    })),
            )
            .await;

        Ok(record)
    }
}
