//! Payment orchestration state machine
//!
//! Sequences a checkout end to end: validate, price, charge, record,
//! compute the subscription window, upsert the membership, attach the
//! invite link. Steps run strictly sequentially within one attempt, and
//! only one attempt may be in flight per orchestrator at a time.
//!
//! Once the payment record is committed, later failures are degraded
//! success (surfaced as a warning on an otherwise successful outcome),
//! never a rollback and never an automatic retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use passhub_shared::{InviteLinkBundle, PaymentMethod, PaymentStatus, Plan, TelegramUser};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::card::CardProvider;
use crate::coupons::{CheckCouponResult, CouponEngine};
use crate::crypto::CryptoProvider;
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEventBuilder, EngineEventLogger, EngineEventType};
use crate::invites::InviteLinkProvisioner;
use crate::memberships::{MembershipUpdater, MembershipUpsert};
use crate::pending::{reconcile_decision, PendingChargeStore, PendingChargeTicket, ReconcileDecision};
use crate::pricing;
use crate::providers::{ChargeContext, ChargeOutcome, PaymentProvider};
use crate::records::{NewPaymentRecord, PaymentRecord, PaymentRecorder};
use crate::wallet::WalletProvider;
use crate::window::{compute_window, TrialTerms};

/// Where an attempt ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPhase {
    Idle,
    MethodSelected,
    Charging,
    AwaitingExternalConfirmation,
    Recording,
    MembershipUpdating,
    LinkReady,
    Success,
    Failed,
}

/// Checkout inputs collected by the UI layer
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user: TelegramUser,
    pub community_id: Uuid,
    pub plan_id: Uuid,
    /// A coupon check result for this community's plan, if one was applied
    pub coupon: Option<CheckCouponResult>,
    /// Provider-side token (card payment method id, wallet order id)
    pub payment_token: Option<String>,
}

/// Terminal result of one `process_payment` (or resumed) attempt
#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub phase: PaymentPhase,
    pub payment: Option<PaymentRecord>,
    pub invite_link: Option<InviteLinkBundle>,
    /// Hosted payment page for redirect providers
    pub redirect_url: Option<String>,
    /// Reference to resume an awaiting-confirmation attempt with
    pub pending_reference: Option<String>,
    /// Set on degraded success: payment committed, provisioning incomplete
    pub warning: Option<String>,
}

impl PaymentOutcome {
    pub fn is_success(&self) -> bool {
        self.phase == PaymentPhase::Success
    }

    fn awaiting(reference: String, redirect_url: Option<String>) -> Self {
        Self {
            phase: PaymentPhase::AwaitingExternalConfirmation,
            payment: None,
            invite_link: None,
            redirect_url,
            pending_reference: Some(reference),
            warning: None,
        }
    }
}

// Infrastructure failures give the ticket back to the store for the next
// sweep; permanent outcomes (decline, plan gone, recording) do not.
fn should_requeue(e: &EngineError) -> bool {
    matches!(
        e,
        EngineError::Database(_) | EngineError::Http(_) | EngineError::Stripe(_)
    )
}

// Releases the in-flight slot when an attempt ends, on every exit path
struct FlightGuard(Arc<AtomicBool>);

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Top-level coordinator invoked by the UI layer
#[derive(Clone)]
pub struct PaymentOrchestrator {
    pool: PgPool,
    coupons: CouponEngine,
    recorder: PaymentRecorder,
    memberships: MembershipUpdater,
    invites: InviteLinkProvisioner,
    card: CardProvider,
    crypto: CryptoProvider,
    wallet: WalletProvider,
    pending: PendingChargeStore,
    event_logger: EngineEventLogger,
    in_flight: Arc<AtomicBool>,
}

#[allow(clippy::too_many_arguments)]
impl PaymentOrchestrator {
    pub fn new(
        pool: PgPool,
        coupons: CouponEngine,
        recorder: PaymentRecorder,
        memberships: MembershipUpdater,
        invites: InviteLinkProvisioner,
        card: CardProvider,
        crypto: CryptoProvider,
        wallet: WalletProvider,
        pending: PendingChargeStore,
    ) -> Self {
        let event_logger = EngineEventLogger::new(pool.clone());
        Self {
            pool,
            coupons,
            recorder,
            memberships,
            invites,
            card,
            crypto,
            wallet,
            pending,
            event_logger,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run one payment attempt to a terminal outcome
    ///
    /// Validation failures and charge declines are retryable errors with no
    /// persisted side effect beyond the failed-attempt audit row. A second
    /// call while an attempt is active is rejected with `PaymentInFlight`.
    pub async fn process_payment(
        &self,
        method: PaymentMethod,
        request: CheckoutRequest,
    ) -> EngineResult<PaymentOutcome> {
        let plan = self.validate(&request).await?;

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::PaymentInFlight);
        }
        let _flight = FlightGuard(self.in_flight.clone());

        let quote = pricing::resolve(&plan, request.coupon.as_ref());

        tracing::info!(
            community_id = %request.community_id,
            plan_id = %plan.id,
            telegram_user_id = %request.user.id,
            method = %method,
            display_cents = quote.display_price_cents,
            final_cents = quote.final_price_cents,
            "Processing payment"
        );

        // Coupon uses are consumed at charge-in-flight, never at check time.
        // A race losing the last use here is reporting-only: the charge
        // proceeds at the already-quoted price.
        if let Some(check) = request.coupon.as_ref().filter(|c| c.is_valid) {
            if let Some(coupon) = &check.coupon {
                if let Err(e) = self.coupons.apply(coupon.id, &request.user.id).await {
                    tracing::warn!(
                        coupon_id = %coupon.id,
                        error = %e,
                        "Coupon redemption failed, continuing charge at quoted price"
                    );
                }
            }
        }

        let ctx = ChargeContext {
            community_id: request.community_id,
            plan_id: plan.id,
            user: request.user.clone(),
            payment_token: request.payment_token.clone(),
            description: format!("Subscription: {}", plan.name),
        };

        let outcome = match method {
            PaymentMethod::Card => self.card.charge(quote.final_price_cents, &ctx).await?,
            PaymentMethod::Crypto => self.crypto.charge(quote.final_price_cents, &ctx).await?,
            PaymentMethod::Wallet => self.wallet.charge(quote.final_price_cents, &ctx).await?,
        };

        match outcome {
            ChargeOutcome::Completed { reference } => {
                self.event_logger
                    .log_best_effort(
                        EngineEventBuilder::new(EngineEventType::ChargeSucceeded)
                            .community(request.community_id)
                            .user(&request.user.id)
                            .data(serde_json::json!({
                                "reference": reference,
                                "amount_cents": quote.final_price_cents,
                                "method": method.as_str(),
                            })),
                    )
                    .await;

                self.finalize_committed(
                    &plan,
                    &request.user,
                    quote.final_price_cents,
                    method,
                    &reference,
                )
                .await
            }
            ChargeOutcome::Pending {
                reference,
                redirect_url,
            } => {
                // Audit row for the attempt even though it has not settled
                self.record_attempt_best_effort(
                    &plan,
                    &request.user,
                    quote.final_price_cents,
                    method,
                    PaymentStatus::Pending,
                    Some(reference.clone()),
                )
                .await;

                self.event_logger
                    .log_best_effort(
                        EngineEventBuilder::new(EngineEventType::ChargePending)
                            .community(request.community_id)
                            .user(&request.user.id)
                            .data(serde_json::json!({ "reference": reference })),
                    )
                    .await;

                Ok(PaymentOutcome::awaiting(reference, redirect_url))
            }
            ChargeOutcome::Failed { reason } => {
                self.record_attempt_best_effort(
                    &plan,
                    &request.user,
                    quote.final_price_cents,
                    method,
                    PaymentStatus::Failed,
                    None,
                )
                .await;

                self.event_logger
                    .log_best_effort(
                        EngineEventBuilder::new(EngineEventType::ChargeFailed)
                            .community(request.community_id)
                            .user(&request.user.id)
                            .data(serde_json::json!({ "reason": reason })),
                    )
                    .await;

                Err(EngineError::Charge(reason))
            }
        }
    }

    /// Settle one awaiting-confirmation attempt against the thresholds
    ///
    /// Removing the ticket claims it, so a UI resume and the worker sweep
    /// can never both finalize the same reference.
    pub async fn resume_pending(
        &self,
        reference: &str,
        now: OffsetDateTime,
    ) -> EngineResult<PaymentOutcome> {
        // Decide under a plain read first: a still-live ticket must stay in
        // the store so concurrent polls never see a spurious NotFound
        let Some(ticket) = self.pending.get(reference).await else {
            return Err(EngineError::NotFound(format!("pending charge {reference}")));
        };
        if reconcile_decision(&ticket, now) == ReconcileDecision::StillPending {
            return Ok(PaymentOutcome::awaiting(ticket.reference, None));
        }

        let Some(ticket) = self.pending.remove(reference).await else {
            // A concurrent resume or sweep claimed it between read and remove
            return Err(EngineError::NotFound(format!("pending charge {reference}")));
        };

        match reconcile_decision(&ticket, now) {
            ReconcileDecision::StillPending => {
                let outcome = PaymentOutcome::awaiting(ticket.reference.clone(), None);
                self.pending.insert(ticket).await;
                Ok(outcome)
            }
            ReconcileDecision::Expired => {
                self.discard_expired(&ticket).await;
                Err(EngineError::ReconciliationTimeout(reference.to_string()))
            }
            ReconcileDecision::AssumeCompleted => {
                let requeue = ticket.clone();
                match self.settle_assumed(ticket).await {
                    Ok(outcome) => Ok(outcome),
                    Err(e) => {
                        if should_requeue(&e) {
                            self.pending.insert(requeue).await;
                        }
                        Err(e)
                    }
                }
            }
        }
    }

    /// Sweep every decided ticket; returns (completed, expired) counts
    ///
    /// Worker entry point, run on a timer. Individual settlement failures
    /// are logged and do not stop the sweep.
    pub async fn reconcile_all(&self, now: OffsetDateTime) -> (usize, usize) {
        let (completed, expired) = self.pending.take_due(now).await;
        let (mut settled, discarded) = (0usize, expired.len());

        for ticket in completed {
            let reference = ticket.reference.clone();
            let requeue = ticket.clone();
            match self.settle_assumed(ticket).await {
                Ok(outcome) if outcome.is_success() => settled += 1,
                // Card charge still processing at the provider; the ticket
                // was already put back for the next sweep
                Ok(_) => {}
                Err(e) => {
                    if should_requeue(&e) {
                        self.pending.insert(requeue).await;
                    }
                    tracing::error!(
                        reference = %reference,
                        error = %e,
                        "Failed to settle decided pending charge"
                    );
                }
            }
        }

        for ticket in expired {
            self.discard_expired(&ticket).await;
        }

        (settled, discarded)
    }

    async fn settle_assumed(&self, ticket: PendingChargeTicket) -> EngineResult<PaymentOutcome> {
        // Card charges have a queryable settlement status, so they are
        // re-checked at Stripe; the time-based assumption only covers
        // providers with nothing to poll
        if ticket.method == PaymentMethod::Card {
            return self.settle_card(ticket).await;
        }

        self.event_logger
            .log_best_effort(
                EngineEventBuilder::new(EngineEventType::PendingAssumedComplete)
                    .community(ticket.community_id)
                    .user(&ticket.user.id)
                    .data(serde_json::json!({ "reference": ticket.reference })),
            )
            .await;

        let plan = self.fetch_plan(ticket.plan_id).await?;
        self.finalize_committed(
            &plan,
            &ticket.user,
            ticket.amount_cents,
            ticket.method,
            &ticket.reference,
        )
        .await
    }

    /// Settle a processing card charge by polling its intent at the provider
    async fn settle_card(&self, ticket: PendingChargeTicket) -> EngineResult<PaymentOutcome> {
        match self
            .card
            .poll_intent(ticket.community_id, &ticket.reference)
            .await?
        {
            ChargeOutcome::Completed { reference } => {
                self.event_logger
                    .log_best_effort(
                        EngineEventBuilder::new(EngineEventType::ChargeSucceeded)
                            .community(ticket.community_id)
                            .user(&ticket.user.id)
                            .data(serde_json::json!({
                                "reference": reference,
                                "amount_cents": ticket.amount_cents,
                                "method": ticket.method.as_str(),
                            })),
                    )
                    .await;

                let plan = self.fetch_plan(ticket.plan_id).await?;
                self.finalize_committed(
                    &plan,
                    &ticket.user,
                    ticket.amount_cents,
                    ticket.method,
                    &reference,
                )
                .await
            }
            ChargeOutcome::Pending { reference, .. } => {
                let outcome = PaymentOutcome::awaiting(reference, None);
                self.pending.insert(ticket).await;
                Ok(outcome)
            }
            ChargeOutcome::Failed { reason } => {
                let recorded = self
                    .recorder
                    .record(NewPaymentRecord {
                        plan_id: ticket.plan_id,
                        community_id: ticket.community_id,
                        amount_cents: ticket.amount_cents,
                        method: ticket.method,
                        status: PaymentStatus::Failed,
                        provider_reference: Some(ticket.reference.clone()),
                        invite_link: None,
                        telegram_user_id: ticket.user.id.clone(),
                        telegram_username: ticket.user.username.clone(),
                        first_name: ticket.user.first_name.clone(),
                        last_name: ticket.user.last_name.clone(),
                    })
                    .await;
                if let Err(e) = recorded {
                    tracing::warn!(
                        reference = %ticket.reference,
                        error = %e,
                        "Failed to write audit row for declined card charge"
                    );
                }

                self.event_logger
                    .log_best_effort(
                        EngineEventBuilder::new(EngineEventType::ChargeFailed)
                            .community(ticket.community_id)
                            .user(&ticket.user.id)
                            .data(serde_json::json!({
                                "reference": ticket.reference,
                                "reason": reason,
                            })),
                    )
                    .await;

                Err(EngineError::Charge(reason))
            }
        }
    }

    async fn discard_expired(&self, ticket: &PendingChargeTicket) {
        tracing::info!(
            reference = %ticket.reference,
            community_id = %ticket.community_id,
            telegram_user_id = %ticket.user.id,
            "Pending charge passed abandonment threshold, discarding"
        );
        self.event_logger
            .log_best_effort(
                EngineEventBuilder::new(EngineEventType::PendingExpired)
                    .community(ticket.community_id)
                    .user(&ticket.user.id)
                    .data(serde_json::json!({ "reference": ticket.reference })),
            )
            .await;
    }

    /// Record, window, membership, invite link: the committed half of a flow
    async fn finalize_committed(
        &self,
        plan: &Plan,
        user: &TelegramUser,
        amount_cents: i64,
        method: PaymentMethod,
        reference: &str,
    ) -> EngineResult<PaymentOutcome> {
        // Recording. A failure here means money moved but left no trace;
        // that is its own error class and must never be auto-retried.
        let record = self
            .recorder
            .record(NewPaymentRecord {
                plan_id: plan.id,
                community_id: plan.community_id,
                amount_cents,
                method,
                status: PaymentStatus::Completed,
                provider_reference: Some(reference.to_string()),
                invite_link: None,
                telegram_user_id: user.id.clone(),
                telegram_username: user.username.clone(),
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
            })
            .await
            .map_err(|e| EngineError::Recording(e.to_string()))?;

        let mut warning = None;

        // Carry-over lookup is best-effort: a read failure must not turn a
        // committed payment into an error
        let active_end = match self
            .memberships
            .active_subscription_end(&user.id, plan.community_id)
            .await
        {
            Ok(end) => end,
            Err(e) => {
                tracing::warn!(
                    telegram_user_id = %user.id,
                    error = %e,
                    "Could not read existing subscription for carry-over"
                );
                None
            }
        };

        let window = compute_window(
            plan.interval,
            TrialTerms {
                has_trial: plan.has_trial_period,
                trial_days: plan.trial_days,
            },
            active_end,
            OffsetDateTime::now_utc(),
        );

        let upserted = self
            .memberships
            .upsert(MembershipUpsert {
                telegram_user_id: user.id.clone(),
                community_id: plan.community_id,
                plan_id: plan.id,
                payment_id: Some(record.id),
                is_active: true,
                start_date: window.start,
                end_date: window.end,
            })
            .await;

        if let Err(e) = upserted {
            tracing::error!(
                payment_id = %record.id,
                telegram_user_id = %user.id,
                error = %e,
                "Payment recorded but membership update failed"
            );
            return Ok(PaymentOutcome {
                phase: PaymentPhase::Success,
                payment: Some(record),
                invite_link: None,
                redirect_url: None,
                pending_reference: None,
                warning: Some(
                    "Payment processed but your membership record could not be updated. \
                     Please contact support."
                        .to_string(),
                ),
            });
        }

        // Fresh link per new payment so a revoked or shared link is never
        // reused for a different buyer
        let invite_link = match self.invites.fetch_or_create(plan.community_id, true).await {
            Ok(Some(bundle)) => {
                self.event_logger
                    .log_best_effort(
                        EngineEventBuilder::new(EngineEventType::InviteIssued)
                            .community(plan.community_id)
                            .user(&user.id)
                            .data(serde_json::json!({ "payment_id": record.id })),
                    )
                    .await;
                Some(bundle)
            }
            Ok(None) => {
                warning = Some(
                    "Payment successful. Your access link is pending; please contact support."
                        .to_string(),
                );
                self.event_logger
                    .log_best_effort(
                        EngineEventBuilder::new(EngineEventType::InviteUnavailable)
                            .community(plan.community_id)
                            .user(&user.id)
                            .data(serde_json::json!({ "payment_id": record.id })),
                    )
                    .await;
                None
            }
            Err(e) => {
                tracing::error!(
                    payment_id = %record.id,
                    error = %e,
                    "Invite link provisioning errored after committed payment"
                );
                warning = Some(
                    "Payment successful. Your access link is pending; please contact support."
                        .to_string(),
                );
                None
            }
        };

        Ok(PaymentOutcome {
            phase: PaymentPhase::Success,
            payment: Some(record),
            invite_link,
            redirect_url: None,
            pending_reference: None,
            warning,
        })
    }

    async fn record_attempt_best_effort(
        &self,
        plan: &Plan,
        user: &TelegramUser,
        amount_cents: i64,
        method: PaymentMethod,
        status: PaymentStatus,
        provider_reference: Option<String>,
    ) {
        let result = self
            .recorder
            .record(NewPaymentRecord {
                plan_id: plan.id,
                community_id: plan.community_id,
                amount_cents,
                method,
                status,
                provider_reference,
                invite_link: None,
                telegram_user_id: user.id.clone(),
                telegram_username: user.username.clone(),
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
            })
            .await;

        if let Err(e) = result {
            tracing::warn!(
                telegram_user_id = %user.id,
                status = %status.as_str(),
                error = %e,
                "Failed to write audit row for non-completed attempt"
            );
        }
    }

    /// Pre-charge validation; any failure is terminal with no side effects
    async fn validate(&self, request: &CheckoutRequest) -> EngineResult<Plan> {
        if request.user.numeric_id().is_none() {
            return Err(EngineError::Validation(
                "telegram user id is missing or not numeric".to_string(),
            ));
        }
        if request.community_id.is_nil() {
            return Err(EngineError::Validation("community id is missing".to_string()));
        }
        if request.plan_id.is_nil() {
            return Err(EngineError::Validation(
                "subscription plan id is missing".to_string(),
            ));
        }

        let plan = self.fetch_plan(request.plan_id).await?;
        if plan.community_id != request.community_id {
            return Err(EngineError::Validation(
                "selected plan does not belong to this community".to_string(),
            ));
        }
        Ok(plan)
    }

    async fn fetch_plan(&self, plan_id: Uuid) -> EngineResult<Plan> {
        let plan: Option<Plan> = sqlx::query_as(
            r#"
            SELECT id, community_id, name, price_cents, "interval",
                   has_trial_period, trial_days, features
            FROM subscription_plans
            WHERE id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;

        plan.ok_or_else(|| EngineError::NotFound(format!("subscription plan {plan_id}")))
    }
}
