//! Coupon validation and redemption
//!
//! `check` is a read-only price preview and never consumes a use; `apply`
//! redeems a use and is only called at the moment a charge goes in flight,
//! so abandoned checkouts never burn redemptions. Redemption is an atomic
//! conditional update, never read-then-write.

use passhub_shared::{Coupon, DiscountType};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEventBuilder, EngineEventLogger, EngineEventType};

/// Result of checking a coupon code against a plan price
///
/// Derived, never persisted; recomputed on every check so a price change
/// can never be paired with a stale discount.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckCouponResult {
    pub is_valid: bool,
    pub coupon: Option<Coupon>,
    pub discount_cents: i64,
    pub final_price_cents: i64,
    pub message: String,
}

impl CheckCouponResult {
    fn invalid(price_cents: i64, message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            coupon: None,
            discount_cents: 0,
            final_price_cents: price_cents,
            message: message.into(),
        }
    }
}

/// Evaluate an already-loaded coupon against a price
///
/// Pure: the database lookup lives in [`CouponEngine::check`], the decision
/// logic lives here where it can be tested with a fixed clock.
pub fn evaluate_coupon(coupon: &Coupon, price_cents: i64, now: OffsetDateTime) -> CheckCouponResult {
    if !coupon.is_active {
        return CheckCouponResult::invalid(price_cents, "This coupon is no longer active");
    }
    if coupon.is_expired(now) {
        return CheckCouponResult::invalid(price_cents, "This coupon has expired");
    }
    if !coupon.has_uses_remaining() {
        return CheckCouponResult::invalid(price_cents, "This coupon has reached its usage limit");
    }

    let discount_cents = match coupon.discount_type {
        // Integer cents; percentage discounts round down in the buyer's favor
        DiscountType::Percentage => (price_cents * coupon.discount_amount.min(100)) / 100,
        DiscountType::Fixed => coupon.discount_amount.min(price_cents),
    };
    let final_price_cents = (price_cents - discount_cents).max(0);

    CheckCouponResult {
        is_valid: true,
        coupon: Some(coupon.clone()),
        discount_cents,
        final_price_cents,
        message: format!(
            "Coupon applied: {} off",
            match coupon.discount_type {
                DiscountType::Percentage => format!("{}%", coupon.discount_amount),
                DiscountType::Fixed => format!("${:.2}", coupon.discount_amount as f64 / 100.0),
            }
        ),
    }
}

/// Coupon lookup and redemption against the community's coupon table
#[derive(Clone)]
pub struct CouponEngine {
    pool: PgPool,
    event_logger: EngineEventLogger,
}

impl CouponEngine {
    pub fn new(pool: PgPool) -> Self {
        let event_logger = EngineEventLogger::new(pool.clone());
        Self { pool, event_logger }
    }

    /// Check a coupon code against a community and plan price
    ///
    /// Case-insensitive exact match scoped to the community. Never mutates
    /// `used_count`.
    pub async fn check(
        &self,
        code: &str,
        community_id: Uuid,
        price_cents: i64,
    ) -> EngineResult<CheckCouponResult> {
        let coupon: Option<Coupon> = sqlx::query_as(
            r#"
            SELECT id, community_id, code, discount_type, discount_amount,
                   max_uses, used_count, is_active, expires_at
            FROM coupons
            WHERE community_id = $1 AND LOWER(code) = LOWER($2)
            "#,
        )
        .bind(community_id)
        .bind(code.trim())
        .fetch_optional(&self.pool)
        .await?;

        let Some(coupon) = coupon else {
            return Ok(CheckCouponResult::invalid(price_cents, "Invalid coupon code"));
        };

        Ok(evaluate_coupon(&coupon, price_cents, OffsetDateTime::now_utc()))
    }

    /// Redeem one use of a coupon
    ///
    /// Atomic conditional increment: the WHERE clause re-checks activity,
    /// expiry and remaining uses inside the UPDATE, so N concurrent applies
    /// against `max_uses = 1` can never over-redeem.
    pub async fn apply(&self, coupon_id: Uuid, telegram_user_id: &str) -> EngineResult<()> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE coupons
            SET used_count = used_count + 1
            WHERE id = $1
              AND is_active = TRUE
              AND (expires_at IS NULL OR expires_at > NOW())
              AND (max_uses IS NULL OR used_count < max_uses)
            "#,
        )
        .bind(coupon_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            self.event_logger
                .log_best_effort(
                    EngineEventBuilder::new(EngineEventType::CouponExhausted)
                        .user(telegram_user_id)
                        .data(serde_json::json!({ "coupon_id": coupon_id })),
                )
                .await;
            return Err(EngineError::CouponExhausted);
        }

        tracing::info!(
            coupon_id = %coupon_id,
            telegram_user_id = %telegram_user_id,
            "Coupon use redeemed"
        );

        self.event_logger
            .log_best_effort(
                EngineEventBuilder::new(EngineEventType::CouponApplied)
                    .user(telegram_user_id)
                    .data(serde_json::json!({ "coupon_id": coupon_id })),
            )
            .await;

        Ok(())
    }
}
