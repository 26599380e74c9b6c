//! Synchronous card provider (Stripe)
//!
//! Creates and confirms a PaymentIntent in one call, so the outcome is
//! usually known before the orchestration flow continues. The rare
//! `processing` intent files a pending ticket like a redirect provider
//! would, but settlement re-polls the intent at Stripe instead of assuming
//! success on a timer.

use stripe::{
    CreatePaymentIntent, Currency, PaymentIntent, PaymentIntentId, PaymentIntentStatus,
    PaymentMethodId,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::ProviderConfigStore;
use crate::error::{EngineError, EngineResult};
use crate::pending::{PendingChargeStore, PendingChargeTicket};
use crate::providers::{ChargeContext, ChargeOutcome, PaymentProvider};

fn outcome_from_status(status: PaymentIntentStatus, reference: String) -> ChargeOutcome {
    match status {
        PaymentIntentStatus::Succeeded => ChargeOutcome::Completed { reference },
        PaymentIntentStatus::Processing => ChargeOutcome::Pending {
            reference,
            redirect_url: None,
        },
        status => ChargeOutcome::Failed {
            reason: format!("payment intent ended in status {status:?}"),
        },
    }
}

/// Card charges via the community's own Stripe account keys
#[derive(Clone)]
pub struct CardProvider {
    config: ProviderConfigStore,
    pending: PendingChargeStore,
}

impl CardProvider {
    pub fn new(config: ProviderConfigStore, pending: PendingChargeStore) -> Self {
        Self { config, pending }
    }

    async fn client_for(&self, community_id: Uuid) -> EngineResult<stripe::Client> {
        let config = self
            .config
            .get(community_id, passhub_shared::PaymentMethod::Card)
            .await?;
        let secret_key = config.require_secret()?;
        Ok(stripe::Client::new(secret_key))
    }

    /// Re-check a processing intent's current status at Stripe
    ///
    /// Used by reconciliation: unlike redirect providers, a card charge has
    /// a queryable settlement status, so it is never assumed complete.
    pub async fn poll_intent(
        &self,
        community_id: Uuid,
        reference: &str,
    ) -> EngineResult<ChargeOutcome> {
        let client = self.client_for(community_id).await?;
        let intent_id = reference.parse::<PaymentIntentId>().map_err(|e| {
            EngineError::Provider(format!("invalid payment intent reference: {e}"))
        })?;

        let intent = PaymentIntent::retrieve(&client, &intent_id, &[]).await?;

        tracing::info!(
            community_id = %community_id,
            intent_id = %intent.id,
            status = ?intent.status,
            "Card charge re-polled"
        );

        Ok(outcome_from_status(intent.status, intent.id.to_string()))
    }
}

impl PaymentProvider for CardProvider {
    fn name(&self) -> &'static str {
        "card"
    }

    async fn charge(&self, amount_cents: i64, ctx: &ChargeContext) -> EngineResult<ChargeOutcome> {
        let client = self.client_for(ctx.community_id).await?;

        let payment_token = ctx.payment_token.as_deref().ok_or_else(|| {
            EngineError::Validation("card payment requires a tokenized payment method".to_string())
        })?;
        let payment_method = payment_token.parse::<PaymentMethodId>().map_err(|e| {
            EngineError::Validation(format!("invalid payment method token: {e}"))
        })?;

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("community_id".to_string(), ctx.community_id.to_string());
        metadata.insert("plan_id".to_string(), ctx.plan_id.to_string());
        metadata.insert("telegram_user_id".to_string(), ctx.user.id.clone());

        let mut params = CreatePaymentIntent::new(amount_cents, Currency::USD);
        params.payment_method = Some(payment_method);
        params.confirm = Some(true);
        params.description = Some(&ctx.description);
        params.metadata = Some(metadata);

        let intent = PaymentIntent::create(&client, params).await?;
        let outcome = outcome_from_status(intent.status, intent.id.to_string());

        // A processing intent must be reconcilable later; without a ticket
        // the reference would be unresumable and the buyer stuck unprovisioned
        if let ChargeOutcome::Pending { reference, .. } = &outcome {
            self.pending
                .insert(PendingChargeTicket {
                    reference: reference.clone(),
                    community_id: ctx.community_id,
                    plan_id: ctx.plan_id,
                    user: ctx.user.clone(),
                    method: passhub_shared::PaymentMethod::Card,
                    amount_cents,
                    created_at: OffsetDateTime::now_utc(),
                })
                .await;
        }

        tracing::info!(
            community_id = %ctx.community_id,
            plan_id = %ctx.plan_id,
            telegram_user_id = %ctx.user.id,
            amount_cents = amount_cents,
            intent_id = %intent.id,
            status = ?intent.status,
            "Card charge attempted"
        );

        Ok(outcome)
    }
}
