//! Typed operation surface of the engine.
//!
//! One method per external route, with param structs in and response structs
//! out; authentication happens upstream, so every operation receives an
//! already-authenticated [`UserId`]. All mutation paths are guarded so that
//! verification and gateway failures short-circuit before any write.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::gateway::{OrderResponse, OrderService, PaymentGateway, SignatureVerifier};
use crate::guard::{AccessDecision, AccessGuard};
use crate::meter::UsageMeter;
use crate::security::audit::{audit_log, AuditEvent, AuditEventType};
use crate::store::{EntitlementStore, SubscriptionPage};
use crate::subscription::lifecycle::LifecycleManager;
use crate::subscription::models::{
    Capability, Feature, FeatureBundle, PaymentDetails, Plan, Role, Subscription,
    SubscriptionStatus, UserId,
};
use crate::subscription::pricing::{plan_benefits, plan_catalog, plan_price, Benefit, PlanListing};
use crate::sweep::{ExpirySweep, Scheduler};

/// Default page size for the admin listing.
const DEFAULT_PER_PAGE: usize = 20;

// ============================================================================
// Request Parameters
// ============================================================================

/// Parameters for `POST /subscriptions/create-order`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderParams {
    /// Plan identifier: `monthly` or `annual`.
    pub plan: String,
    /// Optional coupon code; unknown codes are ignored.
    pub coupon_code: Option<String>,
}

/// Parameters for `POST /subscriptions/verify-payment`.
///
/// Field names follow the gateway's callback payload verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyPaymentParams {
    /// Gateway payment id.
    pub razorpay_payment_id: String,
    /// Gateway order id.
    pub razorpay_order_id: String,
    /// Claimed HMAC signature over `"{order_id}|{payment_id}"`.
    pub razorpay_signature: String,
    /// Plan identifier the payment was for.
    pub plan: String,
    /// Coupon code submitted at order creation, if any.
    #[serde(rename = "couponCode")]
    pub coupon_code: Option<String>,
}

/// Parameters for `POST /subscriptions/track-usage`.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackUsageParams {
    /// Feature identifier: `scan`, `export`, or `apiCall`.
    pub feature: String,
}

/// Parameters for `GET /subscriptions/all` (admin).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminListParams {
    /// Optional status filter; unknown values are ignored.
    pub status: Option<String>,
    /// 1-based page number (default 1).
    pub page: Option<usize>,
    /// Page size (default 20).
    pub per_page: Option<usize>,
}

// ============================================================================
// Responses
// ============================================================================

/// Subscription summary returned after payment verification.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSummary {
    /// Subscription id.
    pub id: String,
    /// Current plan.
    pub plan: Plan,
    /// Grant start.
    pub start_date: chrono::DateTime<chrono::Utc>,
    /// Grant end.
    pub end_date: chrono::DateTime<chrono::Utc>,
    /// Capability bundle.
    pub features: FeatureBundle,
}

impl From<&Subscription> for SubscriptionSummary {
    fn from(sub: &Subscription) -> Self {
        Self {
            id: sub.id.as_str().to_owned(),
            plan: sub.plan,
            start_date: sub.start_date,
            end_date: sub.end_date,
            features: sub.features,
        }
    }
}

/// Response for `POST /subscriptions/verify-payment`.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyPaymentResponse {
    /// Always true on the success path; failures are errors.
    pub success: bool,
    /// The resulting subscription.
    pub subscription: SubscriptionSummary,
}

/// Response for `GET /subscriptions/user-subscription`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSnapshot {
    /// Subscription id.
    pub id: String,
    /// Stored status hint.
    pub status: SubscriptionStatus,
    /// Current plan.
    pub plan: Plan,
    /// Grant start.
    pub start_date: chrono::DateTime<chrono::Utc>,
    /// Grant end.
    pub end_date: chrono::DateTime<chrono::Utc>,
    /// Capability bundle.
    pub features: FeatureBundle,
    /// Live activity check at snapshot time.
    pub is_active: bool,
    /// The owner's usage counters.
    pub usage_stats: crate::subscription::models::UsageStats,
}

/// Response for `GET /subscriptions/plans`.
#[derive(Debug, Clone, Serialize)]
pub struct PlanCatalogResponse {
    /// Available plans.
    pub plans: Vec<PlanListing>,
    /// Pro benefits with feature keys.
    pub benefits: Vec<Benefit>,
}

/// Response for `GET /subscriptions/all`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSubscriptionList {
    /// Rows in this page, newest first.
    pub subscriptions: Vec<Subscription>,
    /// Total row count.
    pub total: usize,
    /// Total page count.
    pub pages: usize,
    /// Current page number.
    pub current_page: usize,
}

impl From<SubscriptionPage> for AdminSubscriptionList {
    fn from(page: SubscriptionPage) -> Self {
        Self {
            subscriptions: page.subscriptions,
            total: page.total,
            pages: page.pages,
            current_page: page.page,
        }
    }
}

// ============================================================================
// Service
// ============================================================================

/// The engine's operation surface.
pub struct SubscriptionService {
    store: Arc<dyn EntitlementStore>,
    gateway: Arc<dyn PaymentGateway>,
    orders: OrderService,
    verifier: SignatureVerifier,
    lifecycle: LifecycleManager,
    meter: UsageMeter,
    guard: AccessGuard,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for SubscriptionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionService").finish_non_exhaustive()
    }
}

impl SubscriptionService {
    /// Wires the engine together over a store, gateway, and clock.
    #[must_use]
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn EntitlementStore>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            orders: OrderService::new(Arc::clone(&gateway), Arc::clone(&clock)),
            verifier: SignatureVerifier::new(config.gateway.key_secret.clone()),
            lifecycle: LifecycleManager::new(Arc::clone(&store), Arc::clone(&clock)),
            meter: UsageMeter::new(Arc::clone(&store), Arc::clone(&clock)),
            guard: AccessGuard::new(Arc::clone(&store), Arc::clone(&clock)),
            store,
            gateway,
            clock,
        }
    }

    /// Builds the background scheduler over the same store and clock.
    #[must_use]
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            ExpirySweep::new(Arc::clone(&self.store), Arc::clone(&self.clock)),
            UsageMeter::new(Arc::clone(&self.store), Arc::clone(&self.clock)),
            Arc::clone(&self.clock),
        )
    }

    /// `POST /subscriptions/create-order`
    ///
    /// # Errors
    ///
    /// Returns validation errors for unknown plans, not-found for unknown
    /// users, and transient errors for gateway failures.
    #[instrument(skip(self, params), fields(user_id = user_id.as_str()))]
    pub async fn create_order(
        &self,
        user_id: &UserId,
        params: CreateOrderParams,
    ) -> Result<OrderResponse> {
        let plan = Plan::parse(&params.plan)?;
        self.store.user(user_id)?;
        self.orders.create_order(user_id, plan, params.coupon_code.as_deref()).await
    }

    /// `POST /subscriptions/verify-payment`
    ///
    /// Pipeline: field validation → signature verification → gateway order
    /// fetch → amount reconciliation → lifecycle transition. Each stage
    /// short-circuits before any write; a duplicate payment id is a no-op
    /// success.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SignatureMismatch`] for a forged or corrupted
    /// signature, [`EngineError::OrderMismatch`] when the fetched order does
    /// not reconcile, and transient errors for gateway failures.
    #[instrument(skip(self, params), fields(user_id = user_id.as_str()))]
    pub async fn verify_payment(
        &self,
        user_id: &UserId,
        params: VerifyPaymentParams,
    ) -> Result<VerifyPaymentResponse> {
        if params.razorpay_payment_id.is_empty()
            || params.razorpay_order_id.is_empty()
            || params.razorpay_signature.is_empty()
        {
            return Err(EngineError::Validation(
                "razorpay_payment_id, razorpay_order_id, and razorpay_signature are all required"
                    .to_owned(),
            ));
        }
        let plan = Plan::parse(&params.plan)?;
        self.store.user(user_id)?;

        if !self.verifier.verify(
            &params.razorpay_order_id,
            &params.razorpay_payment_id,
            &params.razorpay_signature,
        ) {
            audit_log(
                &AuditEvent::new(AuditEventType::SignatureRejected)
                    .with_user(user_id.as_str())
                    .with_order_id(params.razorpay_order_id.clone())
                    .with_payment_id(&params.razorpay_payment_id),
            );
            return Err(EngineError::SignatureMismatch);
        }

        let order = self.gateway.fetch_order(&params.razorpay_order_id).await?;
        let (expected_amount, discount_applied) =
            plan_price(plan, params.coupon_code.as_deref());
        if order.amount_major() != expected_amount {
            audit_log(
                &AuditEvent::new(AuditEventType::OrderRejected)
                    .with_user(user_id.as_str())
                    .with_order_id(order.id.clone())
                    .with_reason(format!(
                        "order amount {} does not match plan price {expected_amount}",
                        order.amount_major()
                    )),
            );
            return Err(EngineError::OrderMismatch(
                "order amount does not match the selected plan".to_owned(),
            ));
        }

        let payment = PaymentDetails {
            payment_id: params.razorpay_payment_id,
            amount: order.amount_major().into(),
            order_id: order.id,
            currency: order.currency,
            receipt: order.receipt,
            coupon_used: params.coupon_code,
            discount_applied,
        };
        let outcome = self.lifecycle.apply_verified_payment(user_id, plan, payment)?;

        Ok(VerifyPaymentResponse {
            success: true,
            subscription: SubscriptionSummary::from(outcome.subscription()),
        })
    }

    /// `GET /subscriptions/user-subscription`
    ///
    /// # Errors
    ///
    /// Returns not-found when the user has no subscription at all.
    #[instrument(skip(self), fields(user_id = user_id.as_str()))]
    pub fn user_subscription(&self, user_id: &UserId) -> Result<SubscriptionSnapshot> {
        let user = self.store.user(user_id)?;
        let sub = self
            .store
            .subscription_for_user(user_id)?
            .ok_or_else(|| EngineError::NotFound("No active subscription found".to_owned()))?;
        Ok(SubscriptionSnapshot {
            id: sub.id.as_str().to_owned(),
            status: sub.status,
            plan: sub.plan,
            start_date: sub.start_date,
            end_date: sub.end_date,
            features: sub.features,
            is_active: sub.is_active_at(self.clock.now()),
            usage_stats: user.usage_stats,
        })
    }

    /// `POST /subscriptions/cancel`
    ///
    /// # Errors
    ///
    /// Returns not-found when the user has no currently-active subscription.
    #[instrument(skip(self), fields(user_id = user_id.as_str()))]
    pub fn cancel(&self, user_id: &UserId) -> Result<()> {
        self.lifecycle.cancel(user_id).map(|_| ())
    }

    /// `POST /subscriptions/track-usage`
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidFeature`] for unknown features (no
    /// mutation) and not-found for unknown users.
    #[instrument(skip(self, params), fields(user_id = user_id.as_str()))]
    pub fn track_usage(&self, user_id: &UserId, params: &TrackUsageParams) -> Result<()> {
        let feature = Feature::parse(&params.feature)?;
        self.meter.record(user_id, feature)
    }

    /// `GET /subscriptions/plans` (public)
    #[must_use]
    pub fn plans(&self) -> PlanCatalogResponse {
        PlanCatalogResponse { plans: plan_catalog(), benefits: plan_benefits() }
    }

    /// `GET /subscriptions/all` (admin only)
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Forbidden`] for non-admin callers.
    #[instrument(skip(self, params), fields(requester = requester.as_str()))]
    pub fn all_subscriptions(
        &self,
        requester: &UserId,
        params: &AdminListParams,
    ) -> Result<AdminSubscriptionList> {
        let user = self.store.user(requester)?;
        if user.role != Role::Admin {
            return Err(EngineError::Forbidden("Access denied".to_owned()));
        }
        let status = params.status.as_deref().and_then(SubscriptionStatus::parse);
        let page = params.page.unwrap_or(1);
        let per_page = params.per_page.unwrap_or(DEFAULT_PER_PAGE);
        Ok(self.store.list_subscriptions(status, page, per_page)?.into())
    }

    /// Request-time entitlement check for upstream middleware.
    ///
    /// # Errors
    ///
    /// Returns not-found for unknown users.
    pub fn check_access(
        &self,
        user_id: &UserId,
        capability: Option<Capability>,
    ) -> Result<AccessDecision> {
        self.guard.check_access(user_id, capability)
    }

    /// Scan quota check for upstream middleware.
    ///
    /// # Errors
    ///
    /// Returns not-found for unknown users.
    pub fn check_scan_quota(&self, user_id: &UserId) -> Result<AccessDecision> {
        self.guard.check_scan_quota(user_id)
    }
}
