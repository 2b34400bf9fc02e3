//! Subscription lifecycle state machine.
//!
//! States: none → active → {canceled, expired}, with renewal looping back
//! into active. The manager validates preconditions and delegates each
//! transition to one atomic store primitive, so per-user transitions are
//! serialized by the store's per-document semantics:
//!
//! ```text
//!            PaymentVerified                PaymentVerified (renewal)
//!   none ─────────────────► active ◄──────────────────────────┐
//!                             │ │                              │
//!                      Cancel │ │ Expire (sweep)               │
//!                             ▼ ▼                              │
//!                      canceled   expired ── PaymentVerified ──┘
//!                         │                       (new row)
//!                         └── natural expiry keeps access until end date
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::{info, instrument};

use super::models::{PaymentDetails, Plan, Subscription, SubscriptionId, UserId};
use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::security::audit::{audit_log, AuditEvent, AuditEventType};
use crate::store::{EntitlementStore, GrantOutcome};

/// Creates, extends, cancels, and expires subscriptions.
///
/// All mutation paths assume the caller has already authenticated the
/// triggering event: `apply_verified_payment` must only run after the
/// signature check and order reconciliation have passed.
pub struct LifecycleManager {
    store: Arc<dyn EntitlementStore>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager").finish_non_exhaustive()
    }
}

impl LifecycleManager {
    /// Creates a lifecycle manager over a store and clock.
    #[must_use]
    pub fn new(store: Arc<dyn EntitlementStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Applies a verified payment: create, extend, or idempotent no-op.
    ///
    /// The gateway payment id is the idempotency key: resubmitting an
    /// already-applied payment returns the current subscription without
    /// extending it again. Renewal of a currently-active subscription
    /// extends the same row from `max(now, end_date)`; anything else creates
    /// a fresh row and promotes the user's role.
    ///
    /// # Errors
    ///
    /// Returns not-found if the user does not exist.
    #[instrument(skip(self, payment), fields(user_id = user_id.as_str(), plan = plan.as_str()))]
    pub fn apply_verified_payment(
        &self,
        user_id: &UserId,
        plan: Plan,
        payment: PaymentDetails,
    ) -> Result<GrantOutcome> {
        let now = self.clock.now();
        let payment_id = payment.payment_id.clone();
        let order_id = payment.order_id.clone();
        let outcome = self.store.grant_or_extend(user_id, plan, payment, now)?;

        let event_type = if outcome.is_replay() {
            AuditEventType::PaymentReplayed
        } else {
            AuditEventType::PaymentApplied
        };
        audit_log(
            &AuditEvent::new(event_type)
                .with_user(user_id.as_str())
                .with_order_id(order_id)
                .with_payment_id(&payment_id)
                .with_plan(plan.as_str()),
        );

        match &outcome {
            GrantOutcome::Created(sub) => {
                info!(subscription_id = sub.id.as_str(), "subscription created, user promoted");
            }
            GrantOutcome::Extended(sub) => {
                info!(subscription_id = sub.id.as_str(), end_date = %sub.end_date, "subscription extended");
            }
            GrantOutcome::AlreadyApplied(sub) => {
                info!(subscription_id = sub.id.as_str(), "duplicate payment ignored");
            }
        }
        Ok(outcome)
    }

    /// Cancels the user's subscription.
    ///
    /// Cancellation withdraws auto-renewal intent, not current entitlement:
    /// the end date is untouched and the role is not demoted, so access
    /// persists until natural expiry.
    ///
    /// # Errors
    ///
    /// Returns not-found if the user has no currently-active subscription.
    #[instrument(skip(self), fields(user_id = user_id.as_str()))]
    pub fn cancel(&self, user_id: &UserId) -> Result<Subscription> {
        let now = self.clock.now();
        let current = self
            .store
            .subscription_for_user(user_id)?
            .ok_or_else(|| EngineError::NotFound("No active subscription found".to_owned()))?;
        if !current.is_active_at(now) {
            return Err(EngineError::NotFound("No active subscription found".to_owned()));
        }

        let canceled = self.store.cancel_subscription(user_id, now)?;
        audit_log(
            &AuditEvent::new(AuditEventType::SubscriptionCanceled).with_user(user_id.as_str()),
        );
        info!(subscription_id = canceled.id.as_str(), end_date = %canceled.end_date, "subscription canceled");
        Ok(canceled)
    }

    /// Expires a lapsed subscription; invoked only by the expiry sweep.
    ///
    /// A compare-and-set: the transition (and the companion role demotion)
    /// happens only when the row is still active and past its end date, so
    /// concurrent sweep runs produce one transition and then no-ops.
    ///
    /// # Errors
    ///
    /// Returns not-found if the subscription row does not exist.
    #[instrument(skip(self), fields(subscription_id = id.as_str()))]
    pub fn expire(&self, id: &SubscriptionId) -> Result<bool> {
        let now = self.clock.now();
        let expired = self.store.expire_if_lapsed(id, now)?;
        if expired {
            audit_log(&AuditEvent::new(AuditEventType::SubscriptionExpired));
            info!("subscription expired, role demoted");
        }
        Ok(expired)
    }
}
