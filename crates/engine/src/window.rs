//! Subscription validity window math
//!
//! Calendar-aware date arithmetic for subscription windows: trial periods,
//! interval extension, and carry-over of unexpired days from an existing
//! subscription. `now` is always an explicit parameter so every rule is
//! testable with a fixed clock.

use passhub_shared::PlanInterval;
use time::{Date, Duration, OffsetDateTime};

/// Trial terms copied off the plan at purchase time
#[derive(Debug, Clone, Copy, Default)]
pub struct TrialTerms {
    pub has_trial: bool,
    pub trial_days: i32,
}

impl TrialTerms {
    fn applies(&self) -> bool {
        self.has_trial && self.trial_days > 0
    }
}

/// The computed validity window of a purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionWindow {
    pub start: OffsetDateTime,
    /// `None` for one-time/lifetime purchases: no expiry, which display
    /// logic must keep distinguishable from a real far-future date
    pub end: Option<OffsetDateTime>,
}

/// Whole days between `now` and `end`, floored and never negative
pub fn remaining_whole_days(end: OffsetDateTime, now: OffsetDateTime) -> i64 {
    (end - now).whole_days().max(0)
}

/// Add calendar months, clamping the day of month when the target month is
/// shorter (Jan 31 + 1 month -> Feb 28/29)
fn add_months(at: OffsetDateTime, months: i32) -> OffsetDateTime {
    let date = at.date();
    let zero_based = i32::from(u8::from(date.month())) - 1 + months;
    let year = date.year() + zero_based.div_euclid(12);
    let month = match time::Month::try_from((zero_based.rem_euclid(12) + 1) as u8) {
        Ok(m) => m,
        // Unreachable: rem_euclid keeps the value in 1..=12
        Err(_) => return at,
    };

    let mut day = date.day();
    loop {
        match Date::from_calendar_date(year, month, day) {
            Ok(d) => return at.replace_date(d),
            Err(_) if day > 28 => day -= 1,
            Err(_) => return at,
        }
    }
}

/// Compute the validity window for a purchase
///
/// - `start` is always `now`.
/// - A trial (`has_trial && trial_days > 0`) yields `[now, now + trial_days]`
///   and skips interval extension entirely for that purchase.
/// - Otherwise the end is `now` plus the interval's calendar months;
///   one-time/lifetime plans get no end date.
/// - If the buyer still has an active subscription, its remaining whole days
///   are added once as a flat offset on top of the new duration, so a
///   renewal stacks unused time instead of discarding it. Already-expired
///   subscriptions contribute zero, never negative.
pub fn compute_window(
    interval: PlanInterval,
    trial: TrialTerms,
    active_until: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> SubscriptionWindow {
    if trial.applies() {
        return SubscriptionWindow {
            start: now,
            end: Some(now + Duration::days(i64::from(trial.trial_days))),
        };
    }

    let Some(months) = interval.months() else {
        return SubscriptionWindow { start: now, end: None };
    };

    let carry_days = active_until.map_or(0, |end| remaining_whole_days(end, now));
    let end = add_months(now, months) + Duration::days(carry_days);

    SubscriptionWindow {
        start: now,
        end: Some(end),
    }
}
