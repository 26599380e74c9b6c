#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Passhub Shared Types
//!
//! Domain types shared between the subscription engine and the worker:
//! plans, coupons, communities, payment enums and the invite-link bundle
//! wire format. All money amounts are integer cents.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Billing interval of a subscription plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(type_name = "plan_interval", rename_all = "kebab-case")]
pub enum PlanInterval {
    Monthly,
    Quarterly,
    HalfYearly,
    Yearly,
    OneTime,
    Lifetime,
}

impl PlanInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanInterval::Monthly => "monthly",
            PlanInterval::Quarterly => "quarterly",
            PlanInterval::HalfYearly => "half-yearly",
            PlanInterval::Yearly => "yearly",
            PlanInterval::OneTime => "one-time",
            PlanInterval::Lifetime => "lifetime",
        }
    }

    /// Calendar months added per billing cycle; `None` for non-expiring plans
    pub fn months(&self) -> Option<i32> {
        match self {
            PlanInterval::Monthly => Some(1),
            PlanInterval::Quarterly => Some(3),
            PlanInterval::HalfYearly => Some(6),
            PlanInterval::Yearly => Some(12),
            PlanInterval::OneTime | PlanInterval::Lifetime => None,
        }
    }

    /// One-time and lifetime purchases never expire
    pub fn is_non_expiring(&self) -> bool {
        self.months().is_none()
    }
}

impl std::fmt::Display for PlanInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a coupon discounts the plan price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "discount_type", rename_all = "lowercase")]
pub enum DiscountType {
    /// `discount_amount` is percent points off the price (0-100+, clamped)
    Percentage,
    /// `discount_amount` is a flat amount in cents
    Fixed,
}

/// Payment provider selected by the buyer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "payment_method", rename_all = "lowercase")]
pub enum PaymentMethod {
    /// Synchronous card charge (Stripe)
    Card,
    /// Redirect-and-poll hosted crypto checkout
    Crypto,
    /// External wallet (PayPal)
    Wallet,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Crypto => "crypto",
            PaymentMethod::Wallet => "wallet",
        }
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "card" | "stripe" => Ok(PaymentMethod::Card),
            "crypto" => Ok(PaymentMethod::Crypto),
            "wallet" | "paypal" => Ok(PaymentMethod::Wallet),
            other => Err(format!("unknown payment method '{other}'")),
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a payment attempt row (append-only audit trail)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

/// A priced subscription offering tied to a community
///
/// Immutable once referenced by a payment; owned by the community-management
/// subsystem and only read by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Plan {
    pub id: Uuid,
    pub community_id: Uuid,
    pub name: String,
    pub price_cents: i64,
    pub interval: PlanInterval,
    pub has_trial_period: bool,
    pub trial_days: i32,
    pub features: Vec<String>,
}

/// A discount code scoped to a community
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Coupon {
    pub id: Uuid,
    pub community_id: Uuid,
    /// Unique per community, matched case-insensitively
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_amount: i64,
    pub max_uses: Option<i32>,
    pub used_count: i32,
    pub is_active: bool,
    pub expires_at: Option<OffsetDateTime>,
}

impl Coupon {
    /// Whether the coupon has any redemptions left
    pub fn has_uses_remaining(&self) -> bool {
        match self.max_uses {
            Some(max) => self.used_count < max,
            None => true,
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// A channel inside a group community
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_mini_app: bool,
}

/// What kind of Telegram destination a community is
///
/// The single/group distinction is a tagged union rather than optional-field
/// sniffing so downstream code cannot treat a group as a lone channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CommunityKind {
    /// One channel or group chat
    Single,
    /// A bundle of channels sold together
    Group { channels: Vec<Channel> },
}

/// A purchasable Telegram destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    pub id: Uuid,
    pub name: String,
    pub kind: CommunityKind,
}

impl Community {
    pub fn is_group(&self) -> bool {
        matches!(self.kind, CommunityKind::Group { .. })
    }
}

/// Identity of the buyer as supplied by the Telegram identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramUser {
    /// Numeric Telegram user id as a string; validated before any charge
    pub id: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub photo_url: Option<String>,
}

impl TelegramUser {
    /// Returns the id only when it is a non-empty string of ASCII digits
    pub fn numeric_id(&self) -> Option<&str> {
        if !self.id.is_empty() && self.id.bytes().all(|b| b.is_ascii_digit()) {
            Some(&self.id)
        } else {
            None
        }
    }
}

/// An invite link per channel of a group community
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInvite {
    pub id: String,
    pub name: String,
    pub invite_link: String,
    #[serde(default)]
    pub is_mini_app: bool,
}

/// The access grant handed to a buyer on successful subscription
///
/// Stored in a single string column: a plain URL for single communities, a
/// JSON document (`{"isGroup":true,...}`) for multi-channel groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteLinkBundle {
    Single(String),
    Group {
        group_name: String,
        main_group_link: Option<String>,
        channels: Vec<ChannelInvite>,
    },
}

/// JSON shape of the group variant as persisted in the link column
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupBundleWire {
    is_group: bool,
    group_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    main_group_link: Option<String>,
    channels: Vec<ChannelInvite>,
}

impl InviteLinkBundle {
    /// Encode for storage in the community's link column
    pub fn to_column_value(&self) -> Result<String, serde_json::Error> {
        match self {
            InviteLinkBundle::Single(link) => Ok(link.clone()),
            InviteLinkBundle::Group {
                group_name,
                main_group_link,
                channels,
            } => serde_json::to_string(&GroupBundleWire {
                is_group: true,
                group_name: group_name.clone(),
                main_group_link: main_group_link.clone(),
                channels: channels.clone(),
            }),
        }
    }

    /// Decode a stored column value; plain URLs are single links, JSON with
    /// `isGroup` is a group bundle. JSON that does not decode as a group
    /// bundle yields `None` so a corrupt row triggers re-issuing instead of
    /// handing the buyer raw JSON as their link.
    pub fn from_column_value(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('{') {
            let wire = serde_json::from_str::<GroupBundleWire>(trimmed).ok()?;
            if !wire.is_group {
                return None;
            }
            return Some(InviteLinkBundle::Group {
                group_name: wire.group_name,
                main_group_link: wire.main_group_link,
                channels: wire.channels,
            });
        }
        Some(InviteLinkBundle::Single(trimmed.to_string()))
    }

    /// The one URL to surface when a flat display is all the caller has room for
    pub fn primary_link(&self) -> Option<&str> {
        match self {
            InviteLinkBundle::Single(link) => Some(link),
            InviteLinkBundle::Group {
                main_group_link,
                channels,
                ..
            } => main_group_link
                .as_deref()
                .or_else(|| channels.first().map(|c| c.invite_link.as_str())),
        }
    }
}
