//! Background reconciliation: the expiry sweep and the monthly counter
//! reset.
//!
//! Both jobs are plain `run_once` units so they stay testable without
//! timers; the [`Scheduler`] owns the two recurring tokio tasks that invoke
//! them. Each tick is idempotent: the sweep's per-row transition is a
//! compare-and-set and the reset only zeroes what is nonzero, so an
//! overrunning or doubled tick cannot produce double side effects.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Months, TimeZone, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use crate::clock::Clock;
use crate::error::Result;
use crate::meter::UsageMeter;
use crate::security::audit::{audit_log, AuditEvent, AuditEventType};
use crate::store::EntitlementStore;
use crate::subscription::lifecycle::LifecycleManager;

/// Interval between expiry sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Report from one expiry sweep run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Rows matched by the sweep query.
    pub due: usize,
    /// Rows actually transitioned to expired this run.
    pub expired: usize,
}

/// Reconciles time against subscription end dates.
pub struct ExpirySweep {
    store: Arc<dyn EntitlementStore>,
    lifecycle: LifecycleManager,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ExpirySweep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpirySweep").finish_non_exhaustive()
    }
}

impl ExpirySweep {
    /// Creates a sweep over a store and clock.
    #[must_use]
    pub fn new(store: Arc<dyn EntitlementStore>, clock: Arc<dyn Clock>) -> Self {
        let lifecycle =
            LifecycleManager::new(Arc::clone(&store), Arc::clone(&clock));
        Self { store, lifecycle, clock }
    }

    /// Runs one sweep pass: expire every row with `status = active` and
    /// `end_date < now`.
    ///
    /// Safe to run concurrently with itself and with live traffic: each
    /// row's transition is an independent conditional update, so a row
    /// renewed between the query and the transition is simply skipped.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable; individual row failures
    /// are logged and do not abort the pass.
    #[instrument(skip(self))]
    pub fn run_once(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let due = self.store.subscriptions_due(now)?;
        let mut expired = 0;
        for id in &due {
            match self.lifecycle.expire(id) {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => error!(subscription_id = id.as_str(), error = %e, "expire failed"),
            }
        }
        if expired > 0 {
            info!(due = due.len(), expired, "expiry sweep finished");
        }
        Ok(SweepReport { due: due.len(), expired })
    }
}

/// First instant of the calendar month after `now` (UTC).
fn next_month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let first_of_current = now
        .date_naive()
        .with_day(1)
        .expect("day 1 exists in every month")
        .checked_add_months(Months::new(1))
        .expect("calendar stays within the supported range");
    Utc.from_utc_datetime(
        &first_of_current.and_hms_opt(0, 0, 0).expect("midnight exists on every day"),
    )
}

/// Owns the two recurring background jobs.
///
/// - the expiry sweep, daily (first tick immediately, to catch up after a
///   restart)
/// - the monthly counter reset, at the start of each calendar month
pub struct Scheduler {
    sweep: Arc<ExpirySweep>,
    meter: Arc<UsageMeter>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler over the two jobs.
    #[must_use]
    pub fn new(sweep: ExpirySweep, meter: UsageMeter, clock: Arc<dyn Clock>) -> Self {
        Self { sweep: Arc::new(sweep), meter: Arc::new(meter), clock }
    }

    /// Spawns both timers onto the current tokio runtime.
    ///
    /// Ticks that overrun are delayed, not stacked, so a slow pass never
    /// runs concurrently with its successor on the same timer.
    #[must_use]
    pub fn start(self) -> SchedulerHandle {
        let sweep = Arc::clone(&self.sweep);
        let daily = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = sweep.run_once() {
                    error!(error = %e, "expiry sweep failed");
                }
            }
        });

        let meter = Arc::clone(&self.meter);
        let clock = Arc::clone(&self.clock);
        let monthly = tokio::spawn(async move {
            loop {
                let now = clock.now();
                let next = next_month_start(now);
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;
                match meter.reset_monthly_counters() {
                    Ok(count) => {
                        audit_log(
                            &AuditEvent::new(AuditEventType::CountersReset)
                                .with_count(u64::try_from(count).unwrap_or(u64::MAX)),
                        );
                        info!(users = count, "monthly scan counters reset");
                    }
                    Err(e) => error!(error = %e, "monthly counter reset failed"),
                }
            }
        });

        SchedulerHandle { tasks: vec![daily, monthly] }
    }
}

/// Handle to the running background jobs.
#[derive(Debug)]
pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stops both timers.
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::subscription::models::{
        PaymentDetails, Plan, Role, SubscriptionStatus, UserId, UserRecord,
    };

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn payment(id: &str) -> PaymentDetails {
        PaymentDetails {
            payment_id: id.to_owned(),
            order_id: "order_1".to_owned(),
            amount: Decimal::from(999),
            currency: "INR".to_owned(),
            receipt: "r".to_owned(),
            coupon_used: None,
            discount_applied: false,
        }
    }

    #[test]
    fn test_next_month_start() {
        assert_eq!(next_month_start(at(2025, 1, 15)), at(2025, 2, 1));
        assert_eq!(next_month_start(at(2025, 12, 31)), at(2026, 1, 1));
        // Already at a boundary: the next boundary, not this one.
        assert_eq!(next_month_start(at(2025, 3, 1)), at(2025, 4, 1));
    }

    #[test]
    fn test_sweep_expires_only_lapsed_rows() {
        let start = at(2025, 1, 1);
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(start);
        let sweep = ExpirySweep::new(
            Arc::<MemoryStore>::clone(&store) as Arc<dyn EntitlementStore>,
            Arc::new(clock.clone()),
        );

        let lapsing = UserId::new("user-1").unwrap();
        let fresh = UserId::new("user-2").unwrap();
        store.insert_user(UserRecord::new(lapsing.clone(), start)).unwrap();
        store.insert_user(UserRecord::new(fresh.clone(), start)).unwrap();
        store.grant_or_extend(&lapsing, Plan::Monthly, payment("pay_1"), start).unwrap();
        store.grant_or_extend(&fresh, Plan::Annual, payment("pay_2"), start).unwrap();

        clock.set(at(2025, 2, 2));
        let report = sweep.run_once().unwrap();
        assert_eq!(report, SweepReport { due: 1, expired: 1 });

        assert_eq!(store.user(&lapsing).unwrap().role, Role::User);
        assert_eq!(store.user(&fresh).unwrap().role, Role::Pro);
        let expired_sub = store.subscription_for_user(&lapsing).unwrap().unwrap();
        assert_eq!(expired_sub.status, SubscriptionStatus::Expired);
    }

    #[test]
    fn test_sweep_rerun_is_noop() {
        let start = at(2025, 1, 1);
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(start);
        let sweep = ExpirySweep::new(
            Arc::<MemoryStore>::clone(&store) as Arc<dyn EntitlementStore>,
            Arc::new(clock.clone()),
        );

        let user = UserId::new("user-1").unwrap();
        store.insert_user(UserRecord::new(user.clone(), start)).unwrap();
        store.grant_or_extend(&user, Plan::Monthly, payment("pay_1"), start).unwrap();

        clock.set(at(2025, 2, 2));
        assert_eq!(sweep.run_once().unwrap(), SweepReport { due: 1, expired: 1 });
        assert_eq!(sweep.run_once().unwrap(), SweepReport { due: 0, expired: 0 });
    }

    #[test]
    fn test_sweep_skips_canceled_rows() {
        // Canceled rows age out of access via the guard, not the sweep;
        // the sweep query matches active rows only.
        let start = at(2025, 1, 1);
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(start);
        let sweep = ExpirySweep::new(
            Arc::<MemoryStore>::clone(&store) as Arc<dyn EntitlementStore>,
            Arc::new(clock.clone()),
        );

        let user = UserId::new("user-1").unwrap();
        store.insert_user(UserRecord::new(user.clone(), start)).unwrap();
        store.grant_or_extend(&user, Plan::Monthly, payment("pay_1"), start).unwrap();
        store.cancel_subscription(&user, at(2025, 1, 5)).unwrap();

        clock.set(at(2025, 2, 2));
        assert_eq!(sweep.run_once().unwrap(), SweepReport { due: 0, expired: 0 });
    }
}
