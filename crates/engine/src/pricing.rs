//! Final price resolution
//!
//! Pure combination of a plan price and an optional coupon check result.
//! Callers must re-resolve whenever the selected plan changes; a coupon
//! checked against one plan is never reused against another.

use passhub_shared::Plan;

use crate::coupons::CheckCouponResult;

/// The amounts a checkout screen displays and the charge uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PriceQuote {
    /// The plan's list price
    pub display_price_cents: i64,
    /// What the buyer is actually charged
    pub final_price_cents: i64,
    /// The discount line item (0 when no valid coupon)
    pub discount_cents: i64,
}

/// Resolve the final charge amount for a plan and an optional coupon result
///
/// A coupon result is only honored when it is valid and was computed for
/// this plan's community; anything else falls back to the list price.
pub fn resolve(plan: &Plan, coupon: Option<&CheckCouponResult>) -> PriceQuote {
    let applicable = coupon.filter(|c| {
        c.is_valid
            && c.coupon
                .as_ref()
                .is_some_and(|coupon| coupon.community_id == plan.community_id)
    });

    match applicable {
        Some(c) => PriceQuote {
            display_price_cents: plan.price_cents,
            final_price_cents: c.final_price_cents.max(0),
            discount_cents: c.discount_cents,
        },
        None => PriceQuote {
            display_price_cents: plan.price_cents,
            final_price_cents: plan.price_cents,
            discount_cents: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use passhub_shared::{Coupon, DiscountType, PlanInterval};
    use uuid::Uuid;

    fn plan(community_id: Uuid, price_cents: i64) -> Plan {
        Plan {
            id: Uuid::new_v4(),
            community_id,
            name: "Monthly".to_string(),
            price_cents,
            interval: PlanInterval::Monthly,
            has_trial_period: false,
            trial_days: 0,
            features: vec![],
        }
    }

    fn valid_result(community_id: Uuid, discount: i64, final_price: i64) -> CheckCouponResult {
        CheckCouponResult {
            is_valid: true,
            coupon: Some(Coupon {
                id: Uuid::new_v4(),
                community_id,
                code: "SAVE10".to_string(),
                discount_type: DiscountType::Percentage,
                discount_amount: 10,
                max_uses: None,
                used_count: 0,
                is_active: true,
                expires_at: None,
            }),
            discount_cents: discount,
            final_price_cents: final_price,
            message: String::new(),
        }
    }

    #[test]
    fn no_coupon_means_list_price() {
        let community = Uuid::new_v4();
        let quote = resolve(&plan(community, 2000), None);
        assert_eq!(quote.final_price_cents, 2000);
        assert_eq!(quote.discount_cents, 0);
    }

    #[test]
    fn valid_coupon_discounts() {
        let community = Uuid::new_v4();
        let quote = resolve(&plan(community, 2000), Some(&valid_result(community, 200, 1800)));
        assert_eq!(quote.display_price_cents, 2000);
        assert_eq!(quote.final_price_cents, 1800);
        assert_eq!(quote.discount_cents, 200);
    }

    #[test]
    fn coupon_from_another_community_is_ignored() {
        // Switching plans (and thus communities) invalidates a prior coupon
        let community = Uuid::new_v4();
        let other = Uuid::new_v4();
        let quote = resolve(&plan(community, 2000), Some(&valid_result(other, 200, 1800)));
        assert_eq!(quote.final_price_cents, 2000);
        assert_eq!(quote.discount_cents, 0);
    }

    #[test]
    fn invalid_result_is_ignored() {
        let community = Uuid::new_v4();
        let mut result = valid_result(community, 200, 1800);
        result.is_valid = false;
        let quote = resolve(&plan(community, 2000), Some(&result));
        assert_eq!(quote.final_price_cents, 2000);
    }
}
