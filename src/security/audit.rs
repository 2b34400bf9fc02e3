//! Audit logging for entitlement-relevant events.
//!
//! Provides structured audit logging with sensitive data redaction and
//! unique correlation IDs for tracking a request across the order →
//! verification → grant pipeline. Audit events carry payment identifiers in
//! redacted form; they never carry gateway secrets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Types of auditable events.
///
/// Each variant represents a money- or entitlement-relevant transition that
/// should be traceable for reconciliation and incident response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// A gateway order was created for a plan selection.
    OrderCreated,
    /// A claimed payment failed signature verification.
    SignatureRejected,
    /// The fetched gateway order did not reconcile with the plan pricing.
    OrderRejected,
    /// A verified payment created or extended a subscription.
    PaymentApplied,
    /// A verified payment id had already been applied; no-op.
    PaymentReplayed,
    /// A subscription was canceled by its owner.
    SubscriptionCanceled,
    /// The sweep (or a lazy check) expired a subscription.
    SubscriptionExpired,
    /// A stale pro role was demoted outside the sweep.
    RoleDemoted,
    /// An access check denied a feature.
    AccessDenied,
    /// The monthly usage counters were reset.
    CountersReset,
}

/// Details for an audit log entry.
///
/// Optional fields are skipped when not applicable so entries stay compact.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuditDetails {
    /// Acting or affected user id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Gateway order id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    /// Gateway payment id, partially redacted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    /// Subscription plan involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    /// Human-readable reason (denials, rejections).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Row/record count (sweep and reset reports).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event timestamp.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub event_type: AuditEventType,
    /// Correlation id for tracking across operations.
    pub request_id: Uuid,
    /// Contextual details.
    pub details: AuditDetails,
}

impl AuditEvent {
    /// Creates a new audit event with a fresh correlation id.
    #[must_use]
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            request_id: Uuid::new_v4(),
            details: AuditDetails::default(),
        }
    }

    /// Adds the acting user.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.details.user_id = Some(user_id.into());
        self
    }

    /// Adds the gateway order id.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.details.order_id = Some(order_id.into());
        self
    }

    /// Adds the gateway payment id, automatically redacted.
    #[must_use]
    pub fn with_payment_id(mut self, payment_id: &str) -> Self {
        self.details.payment_id = Some(redact_payment_id(payment_id));
        self
    }

    /// Adds the plan.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.details.plan = Some(plan.into());
        self
    }

    /// Adds a reason.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.details.reason = Some(reason.into());
        self
    }

    /// Adds a record count.
    #[must_use]
    pub fn with_count(mut self, count: u64) -> Self {
        self.details.count = Some(count);
        self
    }
}

/// Logs an audit event to tracing with target `audit`.
///
/// Audit logs use a dedicated target for easy filtering and routing to
/// separate log files or SIEM systems.
pub fn audit_log(event: &AuditEvent) {
    tracing::info!(
        target: "audit",
        timestamp = %event.timestamp,
        event_type = ?event.event_type,
        request_id = %event.request_id,
        details = ?event.details,
        "AUDIT"
    );
}

/// Redacts a gateway payment id to a prefix plus the last 4 characters.
///
/// Gateway ids carry a type prefix (`pay_…`, `order_…`); the prefix stays
/// intact for correlation while the body is masked.
///
/// # Examples
///
/// ```
/// use leafpro_entitlements::security::audit::redact_payment_id;
///
/// assert_eq!(redact_payment_id("pay_LxGTyq4wEXAMPLE"), "pay_********MPLE");
/// assert_eq!(redact_payment_id("tiny"), "tiny");
/// ```
#[must_use]
#[allow(
    clippy::string_slice,
    reason = "slicing is safe: payment ids are validated ASCII"
)]
pub fn redact_payment_id(payment_id: &str) -> String {
    if payment_id.len() <= 4 || !payment_id.is_ascii() {
        return payment_id.to_owned();
    }
    let prefix_len = payment_id.find('_').map_or(0, |pos| pos + 1);
    let len = payment_id.len();
    if prefix_len + 4 >= len {
        return payment_id.to_owned();
    }
    let masked = "*".repeat(len - prefix_len - 4);
    format!("{}{masked}{}", &payment_id[..prefix_len], &payment_id[len - 4..])
}
