//! Data model for users, subscriptions, and entitlements.
//!
//! The stored `status` field is a hint for auditing and sweep queries only.
//! Wherever a live decision is made, [`Subscription::is_active_at`] is the
//! authoritative predicate; a row can be *stale-active* (status still
//! `active`, end date already past) between sweep runs.

use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Maximum length for user and subscription identifiers.
const MAX_ID_LEN: usize = 64;

fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(EngineError::InvalidId(format!("{kind} cannot be empty")));
    }
    if id.len() > MAX_ID_LEN {
        return Err(EngineError::InvalidId(format!(
            "{kind} must be {MAX_ID_LEN} characters or less"
        )));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(EngineError::InvalidId(format!(
            "{kind} can only contain alphanumeric characters, hyphens, and underscores"
        )));
    }
    Ok(())
}

/// Unique identifier for a user.
///
/// Wraps the identity-provider id with type safety and validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Creates a new user id after validation.
    ///
    /// # Errors
    ///
    /// Returns error if the id is empty, exceeds 64 characters, or contains
    /// characters other than alphanumerics, hyphens, and underscores.
    pub fn new<S: Into<String>>(id: S) -> Result<Self> {
        let id = id.into();
        validate_id("user_id", &id)?;
        Ok(Self(id))
    }

    /// Returns the inner string reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for a subscription row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Creates a new subscription id after validation.
    ///
    /// # Errors
    ///
    /// Returns error under the same rules as [`UserId::new`].
    pub fn new<S: Into<String>>(id: S) -> Result<Self> {
        let id = id.into();
        validate_id("subscription_id", &id)?;
        Ok(Self(id))
    }

    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("sub_{}", Uuid::new_v4().simple()))
    }

    /// Returns the inner string reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// User role.
///
/// The role is a denormalized cache of "does this user currently hold an
/// active subscription". It is promoted by the lifecycle manager and
/// invalidated lazily by the access guard or eagerly by the expiry sweep,
/// and never trusted as a source of truth on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Free tier.
    User,
    /// Paying subscriber.
    Pro,
    /// Operator; always allowed, never demoted.
    Admin,
}

/// Subscription plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    /// Billed every calendar month.
    Monthly,
    /// Billed every calendar year.
    Annual,
}

impl Plan {
    /// Parses a plan identifier.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidPlan`] for anything other than
    /// `monthly` or `annual`.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "monthly" => Ok(Self::Monthly),
            "annual" => Ok(Self::Annual),
            other => Err(EngineError::InvalidPlan(other.to_owned())),
        }
    }

    /// Returns the plan identifier string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Annual => "annual",
        }
    }

    /// Plan price in INR major units.
    #[must_use]
    pub fn price_inr(self) -> i64 {
        match self {
            Self::Monthly => 999,
            Self::Annual => 9990,
        }
    }

    /// Undiscounted reference price shown in the catalog.
    #[must_use]
    pub fn original_price_inr(self) -> i64 {
        match self {
            Self::Monthly => 1299,
            Self::Annual => 15588,
        }
    }

    fn months(self) -> u32 {
        match self {
            Self::Monthly => 1,
            Self::Annual => 12,
        }
    }

    /// Advances a date by one billing period, calendar-aware.
    ///
    /// Uses `chrono` month arithmetic, which clamps month-end overflow:
    /// Jan 31 + 1 month = Feb 28 (Feb 29 in leap years). Annual extension is
    /// twelve months, so Feb 29 lands on Feb 28 in non-leap years. This
    /// clamping is the documented billing-date drift behavior.
    #[must_use]
    pub fn advance(self, from: DateTime<Utc>) -> DateTime<Utc> {
        from.checked_add_months(Months::new(self.months()))
            .expect("billing dates stay within the supported calendar range")
    }
}

/// Stored subscription status.
///
/// A hint for auditing and sweep queries; see the module docs for why live
/// decisions must go through [`Subscription::is_active_at`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Grant should currently be honored (subject to the end-date check).
    Active,
    /// Auto-renewal intent withdrawn; access persists until natural expiry.
    Canceled,
    /// Past its end date, reconciled by the sweep.
    Expired,
}

impl SubscriptionStatus {
    /// Parses a status identifier, returning `None` for unknown values.
    ///
    /// Unknown filter values are ignored rather than rejected, matching the
    /// admin listing contract.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "canceled" => Some(Self::Canceled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// Gated Pro capability.
///
/// Serialized with the wire-facing camelCase keys the catalog exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    /// No monthly scan ceiling.
    UnlimitedScans,
    /// Detailed analysis reports with treatment recommendations.
    AdvancedAnalytics,
    /// CSV/PDF/JSON export.
    DataExport,
    /// Access to historical scans.
    HistoricalData,
    /// Prioritized support.
    PremiumSupport,
    /// Programmatic API access.
    ApiAccess,
}

/// The fixed capability bundle attached to a subscription.
///
/// All six flags are true for any Pro subscription in the current design;
/// the bundle is stored per row so future plans can differentiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureBundle {
    /// No monthly scan ceiling.
    pub unlimited_scans: bool,
    /// Detailed analysis reports.
    pub advanced_analytics: bool,
    /// CSV/PDF/JSON export.
    pub data_export: bool,
    /// Access to historical scans.
    pub historical_data: bool,
    /// Prioritized support.
    pub premium_support: bool,
    /// Programmatic API access.
    pub api_access: bool,
}

impl FeatureBundle {
    /// The full Pro bundle: every capability granted.
    #[must_use]
    pub fn pro() -> Self {
        Self {
            unlimited_scans: true,
            advanced_analytics: true,
            data_export: true,
            historical_data: true,
            premium_support: true,
            api_access: true,
        }
    }

    /// Whether the bundle grants a capability.
    #[must_use]
    pub fn grants(&self, capability: Capability) -> bool {
        match capability {
            Capability::UnlimitedScans => self.unlimited_scans,
            Capability::AdvancedAnalytics => self.advanced_analytics,
            Capability::DataExport => self.data_export,
            Capability::HistoricalData => self.historical_data,
            Capability::PremiumSupport => self.premium_support,
            Capability::ApiAccess => self.api_access,
        }
    }
}

impl Default for FeatureBundle {
    fn default() -> Self {
        Self::pro()
    }
}

/// Trackable usage feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Feature {
    /// A leaf-image scan.
    Scan,
    /// A data export.
    Export,
    /// An API call.
    ApiCall,
}

impl Feature {
    /// Parses a feature identifier.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidFeature`] for anything other than
    /// `scan`, `export`, or `apiCall`.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "scan" => Ok(Self::Scan),
            "export" => Ok(Self::Export),
            "apiCall" => Ok(Self::ApiCall),
            other => Err(EngineError::InvalidFeature(other.to_owned())),
        }
    }
}

/// Payment details persisted alongside a subscription.
///
/// Overwritten wholesale on each renewal so the row always reflects the
/// latest payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    /// Gateway payment id; doubles as the idempotency key for applying payments.
    pub payment_id: String,
    /// Gateway order id.
    pub order_id: String,
    /// Amount paid, in INR major units.
    pub amount: Decimal,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Order receipt string (≤40 characters, gateway constraint).
    pub receipt: String,
    /// Coupon code redeemed, if any.
    pub coupon_used: Option<String>,
    /// Whether a discount was actually applied.
    pub discount_applied: bool,
}

/// Per-user usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    /// Lifetime scan count.
    pub total_scans: u64,
    /// Scans in the current calendar month; zeroed by the monthly reset.
    pub scan_this_month: u64,
    /// Instant of the most recent scan.
    pub last_scan_date: Option<DateTime<Utc>>,
    /// Lifetime export count.
    pub exports_count: u64,
    /// Lifetime API call count.
    pub api_calls_count: u64,
}

/// A time-bounded grant of Pro capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Row identifier.
    pub id: SubscriptionId,
    /// Owning user (exactly one).
    pub user_id: UserId,
    /// Current plan; updated in place on renewal.
    pub plan: Plan,
    /// Stored status hint.
    pub status: SubscriptionStatus,
    /// Grant start.
    pub start_date: DateTime<Utc>,
    /// Grant end; invariant: `end_date >= start_date`.
    pub end_date: DateTime<Utc>,
    /// Capability bundle.
    pub features: FeatureBundle,
    /// Latest payment applied to this row.
    pub payment_details: PaymentDetails,
    /// Mirror counter incremented alongside scan usage tracking.
    pub scan_count: u64,
    /// Row creation instant.
    pub created_at: DateTime<Utc>,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Creates a fresh active subscription starting now.
    #[must_use]
    pub fn new(
        id: SubscriptionId,
        user_id: UserId,
        plan: Plan,
        payment: PaymentDetails,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            plan,
            status: SubscriptionStatus::Active,
            start_date: now,
            end_date: plan.advance(now),
            features: FeatureBundle::pro(),
            payment_details: payment,
            scan_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The authoritative "can this user use Pro features right now" check.
    ///
    /// The stored status can be stale between sweep runs, so this predicate
    /// always pairs the status with a live date comparison.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && now <= self.end_date
    }

    /// Whether the entitlement window is still open.
    ///
    /// Differs from [`is_active_at`](Self::is_active_at) for canceled rows:
    /// cancellation withdraws renewal intent, not current entitlement, so a
    /// canceled subscription keeps granting access until its end date. Only
    /// the access guard uses this; renewal and cancellation preconditions
    /// use the stricter active check.
    #[must_use]
    pub fn grants_access_at(&self, now: DateTime<Utc>) -> bool {
        self.status != SubscriptionStatus::Expired && now <= self.end_date
    }

    /// Extends the grant in place for a renewal payment.
    ///
    /// The new end date is one billing period past `max(now, end_date)`:
    /// renewing early extends from the current end, renewing a lapsed (but
    /// not yet swept) row extends from now. Status is reset to active.
    pub fn extend(&mut self, plan: Plan, now: DateTime<Utc>) {
        let base = if now > self.end_date { now } else { self.end_date };
        self.plan = plan;
        self.end_date = plan.advance(base);
        self.status = SubscriptionStatus::Active;
        self.updated_at = now;
    }
}

/// Stored user record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Identity-provider id.
    pub id: UserId,
    /// Cached entitlement projection; see [`Role`].
    pub role: Role,
    /// Link to the user's subscription row, if any.
    pub subscription: Option<SubscriptionId>,
    /// Usage counters, mutated only by the engine.
    pub usage_stats: UsageStats,
    /// Record creation instant.
    pub created_at: DateTime<Utc>,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    /// Creates a fresh free-tier record.
    #[must_use]
    pub fn new(id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            role: Role::User,
            subscription: None,
            usage_stats: UsageStats::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a record with an explicit role (admin seeding, tests).
    #[must_use]
    pub fn with_role(id: UserId, role: Role, now: DateTime<Utc>) -> Self {
        Self { role, ..Self::new(id, now) }
    }
}
