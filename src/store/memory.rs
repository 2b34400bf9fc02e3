//! In-process store implementation.
//!
//! All state sits behind one mutex, which trivially serializes the
//! composite primitives of [`EntitlementStore`]: ledger claim plus lifecycle
//! mutation are one critical section, and counter increments can never
//! interleave with themselves. A database-backed implementation would map
//! each method onto a conditional document update instead.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{EntitlementStore, GrantOutcome, SubscriptionPage};
use crate::error::{EngineError, Result};
use crate::subscription::models::{
    PaymentDetails, Plan, Role, Subscription, SubscriptionId, SubscriptionStatus, UserId,
    UserRecord,
};

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, UserRecord>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    /// Applied-payment ledger: gateway payment id → subscription it was
    /// applied to. Membership makes payment application at-most-once.
    applied_payments: HashMap<String, SubscriptionId>,
}

/// In-memory [`EntitlementStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| EngineError::Storage("state lock poisoned".to_owned()))
    }
}

fn user_not_found() -> EngineError {
    EngineError::NotFound("User not found".to_owned())
}

fn subscription_not_found() -> EngineError {
    EngineError::NotFound("No active subscription found".to_owned())
}

impl EntitlementStore for MemoryStore {
    fn insert_user(&self, user: UserRecord) -> Result<()> {
        let mut state = self.lock()?;
        if state.users.contains_key(&user.id) {
            return Err(EngineError::Storage(format!(
                "user {} already exists",
                user.id.as_str()
            )));
        }
        state.users.insert(user.id.clone(), user);
        Ok(())
    }

    fn user(&self, id: &UserId) -> Result<UserRecord> {
        self.lock()?.users.get(id).cloned().ok_or_else(user_not_found)
    }

    fn subscription(&self, id: &SubscriptionId) -> Result<Subscription> {
        self.lock()?.subscriptions.get(id).cloned().ok_or_else(subscription_not_found)
    }

    fn subscription_for_user(&self, id: &UserId) -> Result<Option<Subscription>> {
        let state = self.lock()?;
        let user = state.users.get(id).ok_or_else(user_not_found)?;
        Ok(user
            .subscription
            .as_ref()
            .and_then(|sub_id| state.subscriptions.get(sub_id))
            .cloned())
    }

    fn grant_or_extend(
        &self,
        user_id: &UserId,
        plan: Plan,
        payment: PaymentDetails,
        now: DateTime<Utc>,
    ) -> Result<GrantOutcome> {
        let mut state = self.lock()?;

        if let Some(applied_to) = state.applied_payments.get(&payment.payment_id) {
            let sub = state
                .subscriptions
                .get(applied_to)
                .cloned()
                .ok_or_else(|| EngineError::Storage("ledger points at a missing row".to_owned()))?;
            return Ok(GrantOutcome::AlreadyApplied(sub));
        }

        let user = state.users.get(user_id).cloned().ok_or_else(user_not_found)?;
        let current = user
            .subscription
            .as_ref()
            .and_then(|sub_id| state.subscriptions.get(sub_id))
            .filter(|sub| sub.is_active_at(now))
            .cloned();

        if let Some(mut sub) = current {
            // Renewal: extend in place, overwrite payment details. Never a
            // second row while one is active.
            sub.extend(plan, now);
            sub.payment_details = payment.clone();
            state.applied_payments.insert(payment.payment_id, sub.id.clone());
            state.subscriptions.insert(sub.id.clone(), sub.clone());
            debug!(subscription_id = sub.id.as_str(), "subscription extended");
            return Ok(GrantOutcome::Extended(sub));
        }

        let sub = Subscription::new(
            SubscriptionId::generate(),
            user_id.clone(),
            plan,
            payment.clone(),
            now,
        );
        state.applied_payments.insert(payment.payment_id, sub.id.clone());
        state.subscriptions.insert(sub.id.clone(), sub.clone());
        if let Some(record) = state.users.get_mut(user_id) {
            record.subscription = Some(sub.id.clone());
            if record.role == Role::User {
                record.role = Role::Pro;
            }
            record.updated_at = now;
        }
        debug!(subscription_id = sub.id.as_str(), "subscription created");
        Ok(GrantOutcome::Created(sub))
    }

    fn cancel_subscription(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<Subscription> {
        let mut state = self.lock()?;
        let sub_id = state
            .users
            .get(user_id)
            .ok_or_else(user_not_found)?
            .subscription
            .clone()
            .ok_or_else(subscription_not_found)?;
        let sub = state.subscriptions.get_mut(&sub_id).ok_or_else(subscription_not_found)?;
        sub.status = SubscriptionStatus::Canceled;
        sub.updated_at = now;
        Ok(sub.clone())
    }

    fn expire_if_lapsed(&self, id: &SubscriptionId, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.lock()?;
        let sub = state.subscriptions.get_mut(id).ok_or_else(subscription_not_found)?;
        if sub.status != SubscriptionStatus::Active || sub.end_date >= now {
            return Ok(false);
        }
        sub.status = SubscriptionStatus::Expired;
        sub.updated_at = now;
        let owner = sub.user_id.clone();
        if let Some(user) = state.users.get_mut(&owner) {
            if user.role == Role::Pro {
                user.role = Role::User;
                user.updated_at = now;
            }
        }
        Ok(true)
    }

    fn subscriptions_due(&self, now: DateTime<Utc>) -> Result<Vec<SubscriptionId>> {
        let state = self.lock()?;
        Ok(state
            .subscriptions
            .values()
            .filter(|sub| sub.status == SubscriptionStatus::Active && sub.end_date < now)
            .map(|sub| sub.id.clone())
            .collect())
    }

    fn list_subscriptions(
        &self,
        status: Option<SubscriptionStatus>,
        page: usize,
        per_page: usize,
    ) -> Result<SubscriptionPage> {
        let state = self.lock()?;
        let page = page.max(1);
        let per_page = per_page.max(1);

        let mut rows: Vec<Subscription> = state
            .subscriptions
            .values()
            .filter(|sub| status.map_or(true, |wanted| sub.status == wanted))
            .cloned()
            .collect();
        // Newest first; id as a tiebreaker keeps pagination stable.
        rows.sort_by(|a, b| {
            b.created_at.cmp(&a.created_at).then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });

        let total = rows.len();
        let pages = total.div_ceil(per_page);
        let subscriptions =
            rows.into_iter().skip((page - 1) * per_page).take(per_page).collect();
        Ok(SubscriptionPage { subscriptions, total, pages, page })
    }

    fn record_scan(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.lock()?;
        let sub_id = {
            let user = state.users.get_mut(user_id).ok_or_else(user_not_found)?;
            user.usage_stats.total_scans += 1;
            user.usage_stats.scan_this_month += 1;
            user.usage_stats.last_scan_date = Some(now);
            user.updated_at = now;
            user.subscription.clone()
        };
        if let Some(sub) = sub_id.and_then(|id| state.subscriptions.get_mut(&id)) {
            sub.scan_count += 1;
            sub.updated_at = now;
        }
        Ok(())
    }

    fn record_export(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.lock()?;
        let user = state.users.get_mut(user_id).ok_or_else(user_not_found)?;
        user.usage_stats.exports_count += 1;
        user.updated_at = now;
        Ok(())
    }

    fn record_api_call(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.lock()?;
        let user = state.users.get_mut(user_id).ok_or_else(user_not_found)?;
        user.usage_stats.api_calls_count += 1;
        user.updated_at = now;
        Ok(())
    }

    fn reset_monthly_scans(&self) -> Result<usize> {
        let mut state = self.lock()?;
        let mut reset = 0;
        for user in state.users.values_mut() {
            if user.usage_stats.scan_this_month > 0 {
                user.usage_stats.scan_this_month = 0;
                reset += 1;
            }
        }
        Ok(reset)
    }

    fn demote_if_pro(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.lock()?;
        let user = state.users.get_mut(user_id).ok_or_else(user_not_found)?;
        if user.role != Role::Pro {
            return Ok(false);
        }
        user.role = Role::User;
        user.updated_at = now;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    use super::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn payment(id: &str) -> PaymentDetails {
        PaymentDetails {
            payment_id: id.to_owned(),
            order_id: format!("order_{id}"),
            amount: Decimal::from(999),
            currency: "INR".to_owned(),
            receipt: "s_user1_abc".to_owned(),
            coupon_used: None,
            discount_applied: false,
        }
    }

    fn store_with_user(id: &str, now: DateTime<Utc>) -> (MemoryStore, UserId) {
        let store = MemoryStore::new();
        let user_id = UserId::new(id).unwrap();
        store.insert_user(UserRecord::new(user_id.clone(), now)).unwrap();
        (store, user_id)
    }

    // ========================================================================
    // Grant / Extend Tests
    // ========================================================================

    #[test]
    fn test_first_payment_creates_and_promotes() {
        let now = at(2025, 1, 1);
        let (store, user_id) = store_with_user("user-1", now);

        let outcome = store.grant_or_extend(&user_id, Plan::Annual, payment("pay_1"), now).unwrap();
        let sub = match outcome {
            GrantOutcome::Created(sub) => sub,
            other => panic!("expected Created, got {other:?}"),
        };
        assert_eq!(sub.end_date, at(2026, 1, 1));

        let user = store.user(&user_id).unwrap();
        assert_eq!(user.role, Role::Pro);
        assert_eq!(user.subscription, Some(sub.id));
    }

    #[test]
    fn test_renewal_extends_same_row() {
        let now = at(2025, 1, 1);
        let (store, user_id) = store_with_user("user-1", now);
        let first =
            store.grant_or_extend(&user_id, Plan::Monthly, payment("pay_1"), now).unwrap();
        let renewed = store
            .grant_or_extend(&user_id, Plan::Monthly, payment("pay_2"), at(2025, 1, 15))
            .unwrap();

        let sub = match renewed {
            GrantOutcome::Extended(sub) => sub,
            other => panic!("expected Extended, got {other:?}"),
        };
        assert_eq!(sub.id, first.subscription().id);
        // Extends from the prior end (2025-02-01), not from now.
        assert_eq!(sub.end_date, at(2025, 3, 1));
        assert_eq!(sub.payment_details.payment_id, "pay_2");
    }

    #[test]
    fn test_sequential_renewals_accumulate() {
        // Two distinct payments must both extend; neither may be lost.
        let now = at(2025, 1, 1);
        let (store, user_id) = store_with_user("user-1", now);
        store.grant_or_extend(&user_id, Plan::Monthly, payment("pay_1"), now).unwrap();
        store.grant_or_extend(&user_id, Plan::Monthly, payment("pay_2"), now).unwrap();
        let third = store.grant_or_extend(&user_id, Plan::Monthly, payment("pay_3"), now).unwrap();
        assert_eq!(third.subscription().end_date, at(2025, 4, 1));
    }

    #[test]
    fn test_duplicate_payment_is_noop() {
        let now = at(2025, 1, 1);
        let (store, user_id) = store_with_user("user-1", now);
        let first = store.grant_or_extend(&user_id, Plan::Monthly, payment("pay_1"), now).unwrap();
        let replay = store
            .grant_or_extend(&user_id, Plan::Monthly, payment("pay_1"), at(2025, 1, 20))
            .unwrap();

        assert!(replay.is_replay());
        // End date unchanged by the replay.
        assert_eq!(replay.subscription().end_date, first.subscription().end_date);
    }

    #[test]
    fn test_lapsed_subscription_gets_new_row() {
        let now = at(2025, 1, 1);
        let (store, user_id) = store_with_user("user-1", now);
        let first = store.grant_or_extend(&user_id, Plan::Monthly, payment("pay_1"), now).unwrap();
        store.expire_if_lapsed(&first.subscription().id, at(2025, 3, 1)).unwrap();

        let second = store
            .grant_or_extend(&user_id, Plan::Monthly, payment("pay_2"), at(2025, 3, 2))
            .unwrap();
        let sub = match second {
            GrantOutcome::Created(sub) => sub,
            other => panic!("expected Created, got {other:?}"),
        };
        assert_ne!(sub.id, first.subscription().id);
        assert_eq!(store.user(&user_id).unwrap().role, Role::Pro);
    }

    #[test]
    fn test_admin_is_not_promoted() {
        let now = at(2025, 1, 1);
        let store = MemoryStore::new();
        let admin = UserId::new("admin-1").unwrap();
        store.insert_user(UserRecord::with_role(admin.clone(), Role::Admin, now)).unwrap();

        store.grant_or_extend(&admin, Plan::Monthly, payment("pay_1"), now).unwrap();
        assert_eq!(store.user(&admin).unwrap().role, Role::Admin);
    }

    // ========================================================================
    // Cancel / Expire Tests
    // ========================================================================

    #[test]
    fn test_cancel_keeps_end_date_and_role() {
        let now = at(2025, 1, 1);
        let (store, user_id) = store_with_user("user-1", now);
        let created = store.grant_or_extend(&user_id, Plan::Monthly, payment("pay_1"), now).unwrap();

        let canceled = store.cancel_subscription(&user_id, at(2025, 1, 10)).unwrap();
        assert_eq!(canceled.status, SubscriptionStatus::Canceled);
        assert_eq!(canceled.end_date, created.subscription().end_date);
        assert_eq!(store.user(&user_id).unwrap().role, Role::Pro);
    }

    #[test]
    fn test_cancel_without_subscription_is_not_found() {
        let now = at(2025, 1, 1);
        let (store, user_id) = store_with_user("user-1", now);
        assert!(matches!(
            store.cancel_subscription(&user_id, now),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_expire_is_conditional_and_idempotent() {
        let now = at(2025, 1, 1);
        let (store, user_id) = store_with_user("user-1", now);
        let created = store.grant_or_extend(&user_id, Plan::Monthly, payment("pay_1"), now).unwrap();
        let sub_id = created.subscription().id.clone();

        // Not yet lapsed: no transition.
        assert!(!store.expire_if_lapsed(&sub_id, at(2025, 1, 15)).unwrap());
        assert_eq!(store.user(&user_id).unwrap().role, Role::Pro);

        // Lapsed: transition + demotion.
        assert!(store.expire_if_lapsed(&sub_id, at(2025, 2, 2)).unwrap());
        assert_eq!(store.subscription(&sub_id).unwrap().status, SubscriptionStatus::Expired);
        assert_eq!(store.user(&user_id).unwrap().role, Role::User);

        // Second sweep run is a no-op.
        assert!(!store.expire_if_lapsed(&sub_id, at(2025, 2, 3)).unwrap());
    }

    #[test]
    fn test_expire_never_demotes_admin() {
        let now = at(2025, 1, 1);
        let store = MemoryStore::new();
        let admin = UserId::new("admin-1").unwrap();
        store.insert_user(UserRecord::with_role(admin.clone(), Role::Admin, now)).unwrap();
        let created = store.grant_or_extend(&admin, Plan::Monthly, payment("pay_1"), now).unwrap();

        assert!(store.expire_if_lapsed(&created.subscription().id, at(2025, 2, 2)).unwrap());
        assert_eq!(store.user(&admin).unwrap().role, Role::Admin);
    }

    #[test]
    fn test_due_query_matches_sweep_contract() {
        let now = at(2025, 1, 1);
        let (store, user_id) = store_with_user("user-1", now);
        let other = UserId::new("user-2").unwrap();
        store.insert_user(UserRecord::new(other.clone(), now)).unwrap();

        store.grant_or_extend(&user_id, Plan::Monthly, payment("pay_1"), now).unwrap();
        store.grant_or_extend(&other, Plan::Annual, payment("pay_2"), now).unwrap();

        assert!(store.subscriptions_due(at(2025, 1, 15)).unwrap().is_empty());
        let due = store.subscriptions_due(at(2025, 3, 1)).unwrap();
        assert_eq!(due.len(), 1);
    }

    // ========================================================================
    // Usage Counter Tests
    // ========================================================================

    #[test]
    fn test_record_scan_updates_user_and_mirror() {
        let now = at(2025, 1, 1);
        let (store, user_id) = store_with_user("user-1", now);
        let created = store.grant_or_extend(&user_id, Plan::Monthly, payment("pay_1"), now).unwrap();

        store.record_scan(&user_id, at(2025, 1, 2)).unwrap();
        store.record_scan(&user_id, at(2025, 1, 3)).unwrap();

        let user = store.user(&user_id).unwrap();
        assert_eq!(user.usage_stats.total_scans, 2);
        assert_eq!(user.usage_stats.scan_this_month, 2);
        assert_eq!(user.usage_stats.last_scan_date, Some(at(2025, 1, 3)));
        assert_eq!(store.subscription(&created.subscription().id).unwrap().scan_count, 2);
    }

    #[test]
    fn test_record_scan_without_subscription() {
        let now = at(2025, 1, 1);
        let (store, user_id) = store_with_user("user-1", now);
        store.record_scan(&user_id, now).unwrap();
        assert_eq!(store.user(&user_id).unwrap().usage_stats.total_scans, 1);
    }

    #[test]
    fn test_monthly_reset_touches_only_monthly_counter() {
        let now = at(2025, 1, 1);
        let (store, user_id) = store_with_user("user-1", now);
        store.record_scan(&user_id, now).unwrap();
        store.record_export(&user_id, now).unwrap();

        assert_eq!(store.reset_monthly_scans().unwrap(), 1);
        let user = store.user(&user_id).unwrap();
        assert_eq!(user.usage_stats.scan_this_month, 0);
        assert_eq!(user.usage_stats.total_scans, 1);
        assert_eq!(user.usage_stats.exports_count, 1);

        // Nothing left to reset.
        assert_eq!(store.reset_monthly_scans().unwrap(), 0);
    }

    // ========================================================================
    // Listing Tests
    // ========================================================================

    #[test]
    fn test_list_subscriptions_filters_and_paginates() {
        let store = MemoryStore::new();
        for (i, day) in (1..=5).enumerate() {
            let user_id = UserId::new(format!("user-{i}")).unwrap();
            let now = at(2025, 1, u32::try_from(day).unwrap());
            store.insert_user(UserRecord::new(user_id.clone(), now)).unwrap();
            store
                .grant_or_extend(&user_id, Plan::Monthly, payment(&format!("pay_{i}")), now)
                .unwrap();
        }
        let last = UserId::new("user-4").unwrap();
        store.cancel_subscription(&last, at(2025, 1, 6)).unwrap();

        let page = store.list_subscriptions(None, 1, 2).unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.pages, 3);
        assert_eq!(page.subscriptions.len(), 2);
        // Newest first.
        assert_eq!(page.subscriptions[0].created_at, at(2025, 1, 5));

        let active = store.list_subscriptions(Some(SubscriptionStatus::Active), 1, 20).unwrap();
        assert_eq!(active.total, 4);
        let canceled =
            store.list_subscriptions(Some(SubscriptionStatus::Canceled), 1, 20).unwrap();
        assert_eq!(canceled.total, 1);
    }

    #[test]
    fn test_demote_if_pro() {
        let now = at(2025, 1, 1);
        let (store, user_id) = store_with_user("user-1", now);
        assert!(!store.demote_if_pro(&user_id, now).unwrap());

        store.grant_or_extend(&user_id, Plan::Monthly, payment("pay_1"), now).unwrap();
        assert!(store.demote_if_pro(&user_id, now).unwrap());
        assert_eq!(store.user(&user_id).unwrap().role, Role::User);
    }
}
