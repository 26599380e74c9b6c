// Engine crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::too_many_arguments)] // Orchestrator wiring takes one service per step
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Passhub Subscription Engine
//!
//! Subscription and payment orchestration for Telegram communities.
//!
//! ## Features
//!
//! - **Coupons**: case-insensitive check, atomic redemption at charge time
//! - **Pricing**: final charge amount from plan price + coupon result
//! - **Subscription Windows**: trials, calendar intervals, carry-over of
//!   unexpired days on renewal
//! - **Invite Links**: idempotent per-community provisioning, group-aware
//! - **Providers**: synchronous card (Stripe), redirect-and-poll crypto,
//!   external wallet (PayPal)
//! - **Payment Records**: append-only audit trail, one row per attempt
//! - **Memberships**: idempotent upsert keyed on (telegram user, community)
//! - **Orchestrator**: the end-to-end `process_payment` state machine

pub mod card;
pub mod config;
pub mod coupons;
pub mod crypto;
pub mod error;
pub mod events;
pub mod invites;
pub mod memberships;
pub mod orchestrator;
pub mod pending;
pub mod pricing;
pub mod providers;
pub mod records;
pub mod wallet;
pub mod window;

#[cfg(test)]
mod edge_case_tests;

// Card provider
pub use card::CardProvider;

// Config
pub use config::{ProviderConfig, ProviderConfigStore};

// Coupons
pub use coupons::{evaluate_coupon, CheckCouponResult, CouponEngine};

// Crypto provider
pub use crypto::CryptoProvider;

// Error
pub use error::{EngineError, EngineResult};

// Events
pub use events::{EngineEventBuilder, EngineEventLogger, EngineEventType};

// Invites
pub use invites::InviteLinkProvisioner;

// Memberships
pub use memberships::{Membership, MembershipUpdater, MembershipUpsert};

// Orchestrator
pub use orchestrator::{CheckoutRequest, PaymentOrchestrator, PaymentOutcome, PaymentPhase};

// Pending charges
pub use pending::{
    reconcile_decision, PendingChargeStore, PendingChargeTicket, ReconcileDecision,
    ABANDON_AFTER, ASSUME_SUCCESS_AFTER,
};

// Pricing
pub use pricing::{resolve, PriceQuote};

// Providers
pub use providers::{ChargeContext, ChargeOutcome, PaymentProvider};

// Records
pub use records::{NewPaymentRecord, PaymentRecord, PaymentRecorder};

// Wallet provider
pub use wallet::WalletProvider;

// Window
pub use window::{compute_window, remaining_whole_days, SubscriptionWindow, TrialTerms};

use sqlx::PgPool;

/// Main engine service that combines all subscription functionality
#[derive(Clone)]
pub struct EngineService {
    pub coupons: CouponEngine,
    pub invites: InviteLinkProvisioner,
    pub memberships: MembershipUpdater,
    pub recorder: PaymentRecorder,
    pub pending: PendingChargeStore,
    pub orchestrator: PaymentOrchestrator,
}

impl EngineService {
    /// Create the engine from environment variables
    ///
    /// Requires `INVITE_FUNCTION_URL` (the invite-link issuing function
    /// endpoint). Provider credentials are per-community rows, not env.
    pub fn from_env(pool: PgPool) -> EngineResult<Self> {
        let function_url = std::env::var("INVITE_FUNCTION_URL").map_err(|_| {
            EngineError::Config("INVITE_FUNCTION_URL must be set".to_string())
        })?;
        Ok(Self::new(pool, function_url))
    }

    /// Create the engine with an explicit invite-function endpoint
    pub fn new(pool: PgPool, invite_function_url: impl Into<String>) -> Self {
        let provider_config = ProviderConfigStore::new(pool.clone());
        let pending = PendingChargeStore::new();

        let coupons = CouponEngine::new(pool.clone());
        let invites = InviteLinkProvisioner::new(pool.clone(), invite_function_url);
        let memberships = MembershipUpdater::new(pool.clone());
        let recorder = PaymentRecorder::new(pool.clone());

        let orchestrator = PaymentOrchestrator::new(
            pool,
            coupons.clone(),
            recorder.clone(),
            memberships.clone(),
            invites.clone(),
            CardProvider::new(provider_config.clone(), pending.clone()),
            CryptoProvider::new(provider_config.clone(), pending.clone()),
            WalletProvider::new(provider_config),
            pending.clone(),
        );

        Self {
            coupons,
            invites,
            memberships,
            recorder,
            pending,
            orchestrator,
        }
    }
}
