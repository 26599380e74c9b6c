//! Payment provider contract
//!
//! Each provider adapter executes a charge and reports a completion signal.
//! Synchronous providers resolve to `Completed`/`Failed` inline; redirect
//! providers return `Pending` with a reference the reconciliation path
//! settles later. Every outcome carries enough context for the recorder to
//! write an audit row, including failed and abandoned attempts.

use passhub_shared::TelegramUser;
use uuid::Uuid;

use crate::error::EngineResult;

/// Everything a provider needs to execute one charge
#[derive(Debug, Clone)]
pub struct ChargeContext {
    pub community_id: Uuid,
    pub plan_id: Uuid,
    pub user: TelegramUser,
    /// Provider-side token: a tokenized payment method for card, an
    /// approved order id for wallet; unused by redirect providers
    pub payment_token: Option<String>,
    /// Human-readable statement line, e.g. "Traders Hub - Monthly"
    pub description: String,
}

/// Terminal (or provisionally terminal) result of one charge attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// Funds confirmed by the provider
    Completed { reference: String },
    /// Charge started externally; confirmation arrives via reconciliation
    Pending {
        reference: String,
        /// Hosted payment page the buyer must be sent to
        redirect_url: Option<String>,
    },
    /// Provider declined or errored; safe to retry with any method
    Failed { reason: String },
}

impl ChargeOutcome {
    /// The provider reference, when one was issued
    pub fn reference(&self) -> Option<&str> {
        match self {
            ChargeOutcome::Completed { reference } | ChargeOutcome::Pending { reference, .. } => {
                Some(reference)
            }
            ChargeOutcome::Failed { .. } => None,
        }
    }
}

/// Common contract implemented by every provider adapter
pub trait PaymentProvider {
    /// Stable provider name for logs and audit rows
    fn name(&self) -> &'static str;

    /// Execute one charge of `amount_cents`
    ///
    /// Provider declines are an `Ok(ChargeOutcome::Failed)` value, not an
    /// `Err`; errors are reserved for configuration and transport problems.
    fn charge(
        &self,
        amount_cents: i64,
        ctx: &ChargeContext,
    ) -> impl std::future::Future<Output = EngineResult<ChargeOutcome>> + Send;
}
