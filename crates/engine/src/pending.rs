//! Pending charge tickets for redirect-and-poll providers
//!
//! A redirect provider returns before its charge settles; the engine keeps a
//! ticket per provider reference and reconciles on a timer. Reconciliation
//! takes `now` explicitly so the thresholds are testable with fake clocks.
//!
//! KNOWN WEAKNESS: "assume success after 30 seconds" is a best-effort stand-
//! in for a webhook the client cannot observe. It can complete a charge the
//! provider ultimately rejects. A server-confirmed webhook path should
//! replace this heuristic before the thresholds are ever relaxed.

use std::collections::HashMap;
use std::sync::Arc;

use passhub_shared::{PaymentMethod, TelegramUser};
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Age after which an unconfirmed charge is assumed to have completed
pub const ASSUME_SUCCESS_AFTER: Duration = Duration::seconds(30);

/// Age after which an unconfirmed charge is discarded as abandoned
pub const ABANDON_AFTER: Duration = Duration::hours(1);

/// Local marker for a charge awaiting external confirmation
#[derive(Debug, Clone)]
pub struct PendingChargeTicket {
    /// Provider-issued reference id
    pub reference: String,
    pub community_id: Uuid,
    pub plan_id: Uuid,
    pub user: TelegramUser,
    pub method: PaymentMethod,
    pub amount_cents: i64,
    pub created_at: OffsetDateTime,
}

/// What reconciliation decided about one ticket at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileDecision {
    /// Younger than the completion-assumption threshold; keep waiting
    StillPending,
    /// Old enough to assume the external charge went through
    AssumeCompleted,
    /// Past the abandonment threshold; discard as expired
    Expired,
}

/// Decide a ticket's fate from its age alone
pub fn reconcile_decision(ticket: &PendingChargeTicket, now: OffsetDateTime) -> ReconcileDecision {
    let age = now - ticket.created_at;
    if age >= ABANDON_AFTER {
        ReconcileDecision::Expired
    } else if age >= ASSUME_SUCCESS_AFTER {
        ReconcileDecision::AssumeCompleted
    } else {
        ReconcileDecision::StillPending
    }
}

/// Process-wide store of pending charge tickets, keyed by reference
#[derive(Clone)]
pub struct PendingChargeStore {
    inner: Arc<RwLock<HashMap<String, PendingChargeTicket>>>,
}

impl Default for PendingChargeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingChargeStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn insert(&self, ticket: PendingChargeTicket) {
        let mut map = self.inner.write().await;
        map.insert(ticket.reference.clone(), ticket);
    }

    pub async fn get(&self, reference: &str) -> Option<PendingChargeTicket> {
        self.inner.read().await.get(reference).cloned()
    }

    pub async fn remove(&self, reference: &str) -> Option<PendingChargeTicket> {
        self.inner.write().await.remove(reference)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Remove and return every ticket whose fate is decided at `now`
    ///
    /// Returns `(assumed_completed, expired)`. Tickets still inside the
    /// completion-assumption window stay in the store untouched.
    pub async fn take_due(
        &self,
        now: OffsetDateTime,
    ) -> (Vec<PendingChargeTicket>, Vec<PendingChargeTicket>) {
        let mut map = self.inner.write().await;
        let due: Vec<String> = map
            .values()
            .filter(|t| reconcile_decision(t, now) != ReconcileDecision::StillPending)
            .map(|t| t.reference.clone())
            .collect();

        let mut completed = Vec::new();
        let mut expired = Vec::new();
        for reference in due {
            if let Some(ticket) = map.remove(&reference) {
                match reconcile_decision(&ticket, now) {
                    ReconcileDecision::AssumeCompleted => completed.push(ticket),
                    ReconcileDecision::Expired => expired.push(ticket),
                    ReconcileDecision::StillPending => {}
                }
            }
        }
        (completed, expired)
    }
}
