//! Redirect-and-poll crypto provider
//!
//! Opens a hosted payment page and returns `Pending` immediately; the charge
//! settles on the provider's site. A `PendingChargeTicket` is stored for the
//! reconciliation path (see `pending.rs` for the thresholds and the known
//! weakness of the assume-success heuristic).

use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::ProviderConfigStore;
use crate::error::EngineResult;
use crate::pending::{PendingChargeStore, PendingChargeTicket};
use crate::providers::{ChargeContext, ChargeOutcome, PaymentProvider};

/// Hosted-checkout crypto charges
#[derive(Clone)]
pub struct CryptoProvider {
    config: ProviderConfigStore,
    pending: PendingChargeStore,
}

impl CryptoProvider {
    pub fn new(config: ProviderConfigStore, pending: PendingChargeStore) -> Self {
        Self { config, pending }
    }
}

impl PaymentProvider for CryptoProvider {
    fn name(&self) -> &'static str {
        "crypto"
    }

    async fn charge(&self, amount_cents: i64, ctx: &ChargeContext) -> EngineResult<ChargeOutcome> {
        let config = self
            .config
            .get(ctx.community_id, passhub_shared::PaymentMethod::Crypto)
            .await?;
        let api_key = config.require_api_key()?;
        let checkout_base = config.require_callback_url()?;

        let reference = format!("cr_{}", Uuid::new_v4().simple());
        let redirect_url = format!(
            "{}?ref={}&amount={}&key={}",
            checkout_base.trim_end_matches('/'),
            reference,
            amount_cents,
            api_key,
        );

        self.pending
            .insert(PendingChargeTicket {
                reference: reference.clone(),
                community_id: ctx.community_id,
                plan_id: ctx.plan_id,
                user: ctx.user.clone(),
                method: passhub_shared::PaymentMethod::Crypto,
                amount_cents,
                created_at: OffsetDateTime::now_utc(),
            })
            .await;

        tracing::info!(
            community_id = %ctx.community_id,
            plan_id = %ctx.plan_id,
            telegram_user_id = %ctx.user.id,
            amount_cents = amount_cents,
            reference = %reference,
            "Crypto charge opened, awaiting external confirmation"
        );

        Ok(ChargeOutcome::Pending {
            reference,
            redirect_url: Some(redirect_url),
        })
    }
}
