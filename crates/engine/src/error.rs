//! Engine error types

use thiserror::Error;

/// Errors produced by the subscription engine
///
/// The taxonomy follows the payment lifecycle: everything before a payment
/// record is committed is safe to retry from scratch; everything at or after
/// recording is surfaced but never retried automatically, since a retry
/// could double-charge or double-redeem a coupon.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing or malformed checkout inputs; terminal, no charge attempted
    #[error("validation failed: {0}")]
    Validation(String),

    /// Provider credentials missing or disabled for this community
    #[error("payment method not available: {0}")]
    Config(String),

    /// The provider declined or failed the charge
    #[error("charge failed: {0}")]
    Charge(String),

    /// Charge succeeded but the payment record could not be written
    #[error("payment processed but could not be recorded: {0}")]
    Recording(String),

    /// Payment and record are committed; later provisioning failed
    #[error("payment committed but provisioning incomplete: {0}")]
    DegradedSuccess(String),

    /// A second process_payment call arrived while one is active
    #[error("another payment attempt is already in flight")]
    PaymentInFlight,

    /// Coupon exists but is inactive, expired or out of uses at check time
    #[error("coupon not applicable: {0}")]
    CouponInvalid(String),

    /// Atomic redemption found no remaining uses
    #[error("coupon has no remaining uses")]
    CouponExhausted,

    /// A pending external charge passed the abandonment threshold
    #[error("pending charge expired before confirmation: {0}")]
    ReconciliationTimeout(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stripe error: {0}")]
    Stripe(#[from] stripe::StripeError),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the whole checkout may be retried from scratch
    ///
    /// Only pre-recording failures qualify. `Recording` and
    /// `DegradedSuccess` mean money has moved; retrying those risks a
    /// duplicate charge or duplicate membership write.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_)
                | EngineError::Config(_)
                | EngineError::Charge(_)
                | EngineError::CouponInvalid(_)
                | EngineError::CouponExhausted
                | EngineError::ReconciliationTimeout(_)
                | EngineError::PaymentInFlight
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_recording_failures_are_retryable() {
        assert!(EngineError::Validation("missing plan".into()).is_retryable());
        assert!(EngineError::Charge("declined".into()).is_retryable());
        assert!(EngineError::Config("no api key".into()).is_retryable());
    }

    #[test]
    fn committed_failures_are_not_retryable() {
        assert!(!EngineError::Recording("insert failed".into()).is_retryable());
        assert!(!EngineError::DegradedSuccess("no invite link".into()).is_retryable());
        assert!(!EngineError::Internal("oops".into()).is_retryable());
    }
}
