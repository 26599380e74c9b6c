// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Subscription Engine
//!
//! Tests critical boundary conditions in:
//! - Coupon discounts (SUB-C01 to SUB-C06)
//! - Subscription windows (SUB-W01 to SUB-W06)
//! - Pending charge reconciliation (SUB-P01 to SUB-P05)
//! - Pricing (SUB-PR01 to SUB-PR03)

#[cfg(test)]
mod coupon_edge_cases {
    use crate::coupons::evaluate_coupon;
    use passhub_shared::{Coupon, DiscountType};
    use time::macros::datetime;
    use time::OffsetDateTime;
    use uuid::Uuid;

    const NOW: OffsetDateTime = datetime!(2025-06-01 12:00 UTC);

    fn coupon(discount_type: DiscountType, amount: i64) -> Coupon {
        Coupon {
            id: Uuid::new_v4(),
            community_id: Uuid::new_v4(),
            code: "EDGE".to_string(),
            discount_type,
            discount_amount: amount,
            max_uses: None,
            used_count: 0,
            is_active: true,
            expires_at: None,
        }
    }

    // =========================================================================
    // SUB-C01: 100% discount - exactly free, not negative
    // =========================================================================
    #[test]
    fn test_full_percentage_discount_is_free() {
        let result = evaluate_coupon(&coupon(DiscountType::Percentage, 100), 2000, NOW);
        assert_eq!(result.final_price_cents, 0);
        assert_eq!(result.discount_cents, 2000);
    }

    // =========================================================================
    // SUB-C02: 0% discount - valid but changes nothing
    // =========================================================================
    #[test]
    fn test_zero_percentage_discount() {
        let result = evaluate_coupon(&coupon(DiscountType::Percentage, 0), 2000, NOW);
        assert!(result.is_valid);
        assert_eq!(result.final_price_cents, 2000);
        assert_eq!(result.discount_cents, 0);
    }

    // =========================================================================
    // SUB-C03: fixed discount equal to price - exactly free
    // =========================================================================
    #[test]
    fn test_fixed_discount_equal_to_price() {
        let result = evaluate_coupon(&coupon(DiscountType::Fixed, 2000), 2000, NOW);
        assert_eq!(result.final_price_cents, 0);
    }

    // =========================================================================
    // SUB-C04: odd-cent percentage rounds down (buyer's favor)
    // =========================================================================
    #[test]
    fn test_percentage_rounding_on_odd_price() {
        // 10% of $19.99 = 199.9 cents -> 199 off, final 1800
        let result = evaluate_coupon(&coupon(DiscountType::Percentage, 10), 1999, NOW);
        assert_eq!(result.discount_cents, 199);
        assert_eq!(result.final_price_cents, 1800);
    }

    // =========================================================================
    // SUB-C05: expiry boundary - expires exactly now is expired
    // =========================================================================
    #[test]
    fn test_expiry_at_exactly_now_is_expired() {
        let mut c = coupon(DiscountType::Percentage, 10);
        c.expires_at = Some(NOW);
        let result = evaluate_coupon(&c, 2000, NOW);
        assert!(!result.is_valid);
    }

    // =========================================================================
    // SUB-C06: last remaining use is still checkable
    // =========================================================================
    #[test]
    fn test_last_use_remaining_is_valid() {
        let mut c = coupon(DiscountType::Percentage, 10);
        c.max_uses = Some(3);
        c.used_count = 2;
        assert!(evaluate_coupon(&c, 2000, NOW).is_valid);

        c.used_count = 3;
        assert!(!evaluate_coupon(&c, 2000, NOW).is_valid);
    }
}

#[cfg(test)]
mod window_edge_cases {
    use crate::window::{compute_window, remaining_whole_days, TrialTerms};
    use passhub_shared::PlanInterval;
    use time::macros::datetime;
    use time::Duration;

    const NO_TRIAL: TrialTerms = TrialTerms {
        has_trial: false,
        trial_days: 0,
    };

    // =========================================================================
    // SUB-W01: renewal stacking end = now + R days + 1 month
    // =========================================================================
    #[test]
    fn test_renewal_stacking_formula() {
        let now = datetime!(2025-03-01 0:00 UTC);
        let remaining = 14i64;
        let active_until = now + Duration::days(remaining);

        let window = compute_window(PlanInterval::Monthly, NO_TRIAL, Some(active_until), now);
        assert_eq!(
            window.end,
            Some(datetime!(2025-04-01 0:00 UTC) + Duration::days(remaining))
        );
    }

    // =========================================================================
    // SUB-W02: carry-over is a flat day offset, not compounded per unit
    // =========================================================================
    #[test]
    fn test_carry_over_not_compounded_on_yearly() {
        let now = datetime!(2025-03-01 0:00 UTC);
        let active_until = now + Duration::days(10);

        let window = compute_window(PlanInterval::Yearly, NO_TRIAL, Some(active_until), now);
        // 10 days once, not 10 per month
        assert_eq!(window.end, Some(datetime!(2026-03-11 0:00 UTC)));
    }

    // =========================================================================
    // SUB-W03: partial remaining day floors to whole days
    // =========================================================================
    #[test]
    fn test_partial_day_floors() {
        let now = datetime!(2025-03-01 0:00 UTC);
        // 23 hours remaining -> 0 whole days carried
        let active_until = now + Duration::hours(23);

        let window = compute_window(PlanInterval::Monthly, NO_TRIAL, Some(active_until), now);
        assert_eq!(window.end, Some(datetime!(2025-04-01 0:00 UTC)));
    }

    // =========================================================================
    // SUB-W04: trial beats interval even with an active subscription
    // =========================================================================
    #[test]
    fn test_trial_ignores_carry_over() {
        let now = datetime!(2025-03-01 0:00 UTC);
        let trial = TrialTerms {
            has_trial: true,
            trial_days: 14,
        };
        let active_until = now + Duration::days(30);

        let window = compute_window(PlanInterval::Monthly, trial, Some(active_until), now);
        assert_eq!(window.end, Some(datetime!(2025-03-15 0:00 UTC)));
    }

    // =========================================================================
    // SUB-W05: lifetime with carry-over still has no expiry
    // =========================================================================
    #[test]
    fn test_lifetime_with_active_subscription_has_no_end() {
        let now = datetime!(2025-03-01 0:00 UTC);
        let active_until = now + Duration::days(30);

        let window = compute_window(PlanInterval::Lifetime, NO_TRIAL, Some(active_until), now);
        assert_eq!(window.end, None);
    }

    // =========================================================================
    // SUB-W06: remaining days display never negative
    // =========================================================================
    #[test]
    fn test_remaining_days_never_negative() {
        let now = datetime!(2025-03-01 0:00 UTC);
        assert_eq!(remaining_whole_days(now - Duration::days(400), now), 0);
        assert_eq!(remaining_whole_days(now, now), 0);
    }
}

#[cfg(test)]
mod pending_edge_cases {
    use crate::pending::{
        reconcile_decision, PendingChargeStore, PendingChargeTicket, ReconcileDecision,
        ABANDON_AFTER, ASSUME_SUCCESS_AFTER,
    };
    use passhub_shared::{PaymentMethod, TelegramUser};
    use std::sync::Arc;
    use time::macros::datetime;
    use time::{Duration, OffsetDateTime};
    use uuid::Uuid;

    const T0: OffsetDateTime = datetime!(2025-06-01 12:00 UTC);

    fn ticket(reference: &str, created_at: OffsetDateTime) -> PendingChargeTicket {
        PendingChargeTicket {
            reference: reference.to_string(),
            community_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            user: TelegramUser {
                id: "777".to_string(),
                username: None,
                first_name: None,
                last_name: None,
                photo_url: None,
            },
            method: PaymentMethod::Crypto,
            amount_cents: 2000,
            created_at,
        }
    }

    // =========================================================================
    // SUB-P01: exact threshold boundaries
    // =========================================================================
    #[test]
    fn test_exact_threshold_boundaries() {
        let t = ticket("r", T0);
        assert_eq!(
            reconcile_decision(&t, T0 + ASSUME_SUCCESS_AFTER - Duration::seconds(1)),
            ReconcileDecision::StillPending
        );
        assert_eq!(
            reconcile_decision(&t, T0 + ASSUME_SUCCESS_AFTER),
            ReconcileDecision::AssumeCompleted
        );
        assert_eq!(
            reconcile_decision(&t, T0 + ABANDON_AFTER),
            ReconcileDecision::Expired
        );
    }

    // =========================================================================
    // SUB-P02: scenario - reload at T+45s completes, reload at T+2h discards
    // =========================================================================
    #[test]
    fn test_reload_scenarios() {
        let t = ticket("r", T0);
        assert_eq!(
            reconcile_decision(&t, T0 + Duration::seconds(45)),
            ReconcileDecision::AssumeCompleted
        );
        assert_eq!(
            reconcile_decision(&t, T0 + Duration::hours(2)),
            ReconcileDecision::Expired
        );
    }

    // =========================================================================
    // SUB-P03: concurrent claims - only one caller wins a reference
    // =========================================================================
    #[tokio::test]
    async fn test_concurrent_remove_claims_once() {
        let store = Arc::new(PendingChargeStore::new());
        store.insert(ticket("contested", T0)).await;

        let mut handles = vec![];
        for _ in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(
                async move { store.remove("contested").await.is_some() },
            ));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1, "exactly one claimant should get the ticket");
    }

    // =========================================================================
    // SUB-P04: take_due leaves fresh tickets untouched
    // =========================================================================
    #[tokio::test]
    async fn test_take_due_ignores_fresh_tickets() {
        let store = PendingChargeStore::new();
        store.insert(ticket("fresh", T0)).await;

        let (completed, expired) = store.take_due(T0 + Duration::seconds(5)).await;
        assert!(completed.is_empty());
        assert!(expired.is_empty());
        assert_eq!(store.len().await, 1);
    }

    // =========================================================================
    // SUB-P05: a ticket exactly at the abandon threshold is expired,
    // not assumed complete
    // =========================================================================
    #[tokio::test]
    async fn test_abandon_wins_over_assume() {
        let store = PendingChargeStore::new();
        store.insert(ticket("old", T0)).await;

        let (completed, expired) = store.take_due(T0 + ABANDON_AFTER).await;
        assert!(completed.is_empty());
        assert_eq!(expired.len(), 1);
    }
}

#[cfg(test)]
mod pricing_edge_cases {
    use crate::coupons::CheckCouponResult;
    use crate::pricing::resolve;
    use passhub_shared::{Coupon, DiscountType, Plan, PlanInterval};
    use uuid::Uuid;

    fn plan(community_id: Uuid) -> Plan {
        Plan {
            id: Uuid::new_v4(),
            community_id,
            name: "Pro".to_string(),
            price_cents: 2000,
            interval: PlanInterval::Monthly,
            has_trial_period: false,
            trial_days: 0,
            features: vec![],
        }
    }

    // =========================================================================
    // SUB-PR01: coupon result without its coupon payload is ignored
    // =========================================================================
    #[test]
    fn test_valid_flag_without_coupon_is_ignored() {
        let community = Uuid::new_v4();
        let result = CheckCouponResult {
            is_valid: true,
            coupon: None,
            discount_cents: 500,
            final_price_cents: 1500,
            message: String::new(),
        };
        let quote = resolve(&plan(community), Some(&result));
        assert_eq!(quote.final_price_cents, 2000);
    }

    // =========================================================================
    // SUB-PR02: negative final price in a stale result clamps to zero
    // =========================================================================
    #[test]
    fn test_negative_final_price_clamps() {
        let community = Uuid::new_v4();
        let result = CheckCouponResult {
            is_valid: true,
            coupon: Some(Coupon {
                id: Uuid::new_v4(),
                community_id: community,
                code: "NEG".to_string(),
                discount_type: DiscountType::Fixed,
                discount_amount: 9999,
                max_uses: None,
                used_count: 0,
                is_active: true,
                expires_at: None,
            }),
            discount_cents: 9999,
            final_price_cents: -7999,
            message: String::new(),
        };
        let quote = resolve(&plan(community), Some(&result));
        assert_eq!(quote.final_price_cents, 0);
    }

    // =========================================================================
    // SUB-PR03: free plan stays free with any coupon
    // =========================================================================
    #[test]
    fn test_free_plan_stays_free() {
        let community = Uuid::new_v4();
        let mut p = plan(community);
        p.price_cents = 0;
        let quote = resolve(&p, None);
        assert_eq!(quote.final_price_cents, 0);
        assert_eq!(quote.discount_cents, 0);
    }
}
