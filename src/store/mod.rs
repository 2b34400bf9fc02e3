//! Entitlement persistence abstraction.
//!
//! The store exposes *composite conditional primitives* rather than bare
//! reads and writes: each method is one atomic unit over a single user's
//! User/Subscription pair, which is the only contended resource in the
//! engine. A naive read-then-write at this seam would admit lost updates
//! (two near-simultaneous renewals both reading a stale end date and
//! under-extending), so the conditional semantics live here, behind the
//! trait.

mod memory;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::subscription::models::{
    PaymentDetails, Plan, Subscription, SubscriptionId, SubscriptionStatus, UserId, UserRecord,
};

pub use memory::MemoryStore;

/// Outcome of applying a verified payment to a user's entitlement.
#[derive(Debug, Clone)]
pub enum GrantOutcome {
    /// No active subscription existed; a new row was created and the user
    /// was promoted.
    Created(Subscription),
    /// An active subscription was extended in place.
    Extended(Subscription),
    /// The payment id was already applied; nothing changed.
    ///
    /// This is the idempotent-recovery path: a client retrying a
    /// verification after an ambiguous timeout gets a success without a
    /// double extension.
    AlreadyApplied(Subscription),
}

impl GrantOutcome {
    /// The subscription after the operation.
    #[must_use]
    pub fn subscription(&self) -> &Subscription {
        match self {
            Self::Created(sub) | Self::Extended(sub) | Self::AlreadyApplied(sub) => sub,
        }
    }

    /// Whether this was a duplicate payment submission.
    #[must_use]
    pub fn is_replay(&self) -> bool {
        matches!(self, Self::AlreadyApplied(_))
    }
}

/// One page of the admin subscription listing.
#[derive(Debug, Clone)]
pub struct SubscriptionPage {
    /// Rows in this page, newest first.
    pub subscriptions: Vec<Subscription>,
    /// Total row count across all pages.
    pub total: usize,
    /// Total page count.
    pub pages: usize,
    /// Current page number (1-based).
    pub page: usize,
}

/// Persisted entitlement state: users, subscriptions, and the
/// applied-payment ledger.
///
/// Implementations must make every method an atomic unit; callers never
/// compose reads and writes around the trait to mutate state.
pub trait EntitlementStore: Send + Sync {
    /// Inserts a new user record.
    ///
    /// # Errors
    ///
    /// Returns error if a record with the same id already exists.
    fn insert_user(&self, user: UserRecord) -> Result<()>;

    /// Fetches a user record.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`](crate::error::EngineError::NotFound)
    /// if the user does not exist.
    fn user(&self, id: &UserId) -> Result<UserRecord>;

    /// Fetches a subscription row.
    ///
    /// # Errors
    ///
    /// Returns not-found if the row does not exist.
    fn subscription(&self, id: &SubscriptionId) -> Result<Subscription>;

    /// Fetches the subscription linked to a user, if any.
    ///
    /// # Errors
    ///
    /// Returns not-found if the user does not exist.
    fn subscription_for_user(&self, id: &UserId) -> Result<Option<Subscription>>;

    /// Applies a verified payment: create, extend, or idempotent no-op.
    ///
    /// In one atomic unit: claims `payment.payment_id` in the applied-payment
    /// ledger (returning [`GrantOutcome::AlreadyApplied`] if it was claimed
    /// before), then either extends the user's currently-active subscription
    /// in place or creates a new row, links it, and promotes the user's role
    /// to pro (admins keep their role). Never creates a second row while one
    /// is active.
    ///
    /// # Errors
    ///
    /// Returns not-found if the user does not exist.
    fn grant_or_extend(
        &self,
        user_id: &UserId,
        plan: Plan,
        payment: PaymentDetails,
        now: DateTime<Utc>,
    ) -> Result<GrantOutcome>;

    /// Marks the user's subscription canceled.
    ///
    /// The end date is untouched: cancellation withdraws renewal intent, not
    /// the current entitlement. The role is not demoted here.
    ///
    /// # Errors
    ///
    /// Returns not-found if the user has no subscription.
    fn cancel_subscription(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<Subscription>;

    /// Conditionally expires a subscription: `status = active` and
    /// `end_date < now`, in one compare-and-set.
    ///
    /// On transition the owning user's role is demoted from pro to user
    /// (admins are never demoted). Returns whether the transition happened;
    /// a second invocation on the same row is a no-op returning `false`.
    ///
    /// # Errors
    ///
    /// Returns not-found if the row does not exist.
    fn expire_if_lapsed(&self, id: &SubscriptionId, now: DateTime<Utc>) -> Result<bool>;

    /// The sweep query: ids of rows with `status = active` and
    /// `end_date < now`.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable.
    fn subscriptions_due(&self, now: DateTime<Utc>) -> Result<Vec<SubscriptionId>>;

    /// Paginated listing, newest first, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable.
    fn list_subscriptions(
        &self,
        status: Option<SubscriptionStatus>,
        page: usize,
        per_page: usize,
    ) -> Result<SubscriptionPage>;

    /// Atomically records one scan: bumps the user's lifetime and monthly
    /// counters, stamps the last scan date, and bumps the linked
    /// subscription's mirror counter when one exists.
    ///
    /// # Errors
    ///
    /// Returns not-found if the user does not exist.
    fn record_scan(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<()>;

    /// Atomically records one export.
    ///
    /// # Errors
    ///
    /// Returns not-found if the user does not exist.
    fn record_export(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<()>;

    /// Atomically records one API call.
    ///
    /// # Errors
    ///
    /// Returns not-found if the user does not exist.
    fn record_api_call(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<()>;

    /// Zeroes `scan_this_month` for every user; `total_scans` is untouched.
    ///
    /// Returns the number of users whose counter was nonzero.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable.
    fn reset_monthly_scans(&self) -> Result<usize>;

    /// Demotes the user's role pro → user if currently pro.
    ///
    /// Lazy invalidation hook for the access guard. Returns whether a
    /// demotion happened.
    ///
    /// # Errors
    ///
    /// Returns not-found if the user does not exist.
    fn demote_if_pro(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<bool>;
}
