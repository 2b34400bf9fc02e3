//! Per-feature usage metering.
//!
//! Counters are bumped through atomic store primitives, never
//! read-modify-write, so duplicate submissions from the same user cannot
//! lose updates. The monthly reset is a separate scheduled action owned by
//! the [`sweep`](crate::sweep) scheduler.

use std::fmt;
use std::sync::Arc;

use tracing::instrument;

use crate::clock::Clock;
use crate::error::Result;
use crate::store::EntitlementStore;
use crate::subscription::models::{Feature, UserId};

/// Records and resets per-feature consumption counters.
pub struct UsageMeter {
    store: Arc<dyn EntitlementStore>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for UsageMeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsageMeter").finish_non_exhaustive()
    }
}

impl UsageMeter {
    /// Creates a meter over a store and clock.
    #[must_use]
    pub fn new(store: Arc<dyn EntitlementStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Records one use of a feature.
    ///
    /// A scan bumps the lifetime and monthly counters, stamps the last scan
    /// date, and increments the linked subscription's mirror counter when
    /// one exists. Exports and API calls bump their own counters only.
    ///
    /// # Errors
    ///
    /// Returns not-found if the user does not exist; nothing is mutated for
    /// an unknown feature because [`Feature`] is parsed upstream.
    #[instrument(skip(self), fields(user_id = user_id.as_str()))]
    pub fn record(&self, user_id: &UserId, feature: Feature) -> Result<()> {
        let now = self.clock.now();
        match feature {
            Feature::Scan => self.store.record_scan(user_id, now),
            Feature::Export => self.store.record_export(user_id, now),
            Feature::ApiCall => self.store.record_api_call(user_id, now),
        }
    }

    /// Zeroes every user's monthly scan counter.
    ///
    /// Lifetime totals are untouched. Returns the number of users whose
    /// counter was nonzero.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable.
    pub fn reset_monthly_counters(&self) -> Result<usize> {
        self.store.reset_monthly_scans()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::subscription::models::{PaymentDetails, Plan, UserRecord};

    fn setup() -> (Arc<MemoryStore>, UsageMeter, UserId) {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let store = Arc::new(MemoryStore::new());
        let meter = UsageMeter::new(
            Arc::<MemoryStore>::clone(&store),
            Arc::new(ManualClock::new(start)),
        );
        let user_id = UserId::new("user-1").unwrap();
        store.insert_user(UserRecord::new(user_id.clone(), start)).unwrap();
        (store, meter, user_id)
    }

    #[test]
    fn test_scan_updates_all_scan_fields() {
        let (store, meter, user_id) = setup();
        meter.record(&user_id, Feature::Scan).unwrap();

        let stats = store.user(&user_id).unwrap().usage_stats;
        assert_eq!(stats.total_scans, 1);
        assert_eq!(stats.scan_this_month, 1);
        assert!(stats.last_scan_date.is_some());
        assert_eq!(stats.exports_count, 0);
    }

    #[test]
    fn test_scan_bumps_subscription_mirror_counter() {
        let (store, meter, user_id) = setup();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let outcome = store
            .grant_or_extend(
                &user_id,
                Plan::Monthly,
                PaymentDetails {
                    payment_id: "pay_1".to_owned(),
                    order_id: "order_1".to_owned(),
                    amount: Decimal::from(999),
                    currency: "INR".to_owned(),
                    receipt: "r".to_owned(),
                    coupon_used: None,
                    discount_applied: false,
                },
                now,
            )
            .unwrap();

        meter.record(&user_id, Feature::Scan).unwrap();
        meter.record(&user_id, Feature::Scan).unwrap();
        assert_eq!(store.subscription(&outcome.subscription().id).unwrap().scan_count, 2);
    }

    #[test]
    fn test_export_and_api_call_touch_only_their_counters() {
        let (store, meter, user_id) = setup();
        meter.record(&user_id, Feature::Export).unwrap();
        meter.record(&user_id, Feature::ApiCall).unwrap();
        meter.record(&user_id, Feature::ApiCall).unwrap();

        let stats = store.user(&user_id).unwrap().usage_stats;
        assert_eq!(stats.exports_count, 1);
        assert_eq!(stats.api_calls_count, 2);
        assert_eq!(stats.total_scans, 0);
        assert!(stats.last_scan_date.is_none());
    }

    #[test]
    fn test_unknown_user_is_not_found() {
        let (_store, meter, _user_id) = setup();
        let ghost = UserId::new("ghost").unwrap();
        assert!(meter.record(&ghost, Feature::Scan).is_err());
    }

    #[test]
    fn test_reset_reports_touched_users() {
        let (_store, meter, user_id) = setup();
        meter.record(&user_id, Feature::Scan).unwrap();
        assert_eq!(meter.reset_monthly_counters().unwrap(), 1);
        assert_eq!(meter.reset_monthly_counters().unwrap(), 0);
    }
}
