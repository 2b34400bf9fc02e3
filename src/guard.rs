//! Request-time access decisions.
//!
//! The guard consults the entitlement store and answers allow/deny; it
//! performs no state changes except the lazy role demotion below. Denials
//! are decisions, not errors: an absent user is an error, a free user
//! asking for a Pro feature is a denial.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;

use crate::clock::Clock;
use crate::error::Result;
use crate::security::audit::{audit_log, AuditEvent, AuditEventType};
use crate::store::EntitlementStore;
use crate::subscription::models::{Capability, Role, Subscription, UserId};

/// Scans per calendar month for authenticated free users.
///
/// Guests get exactly one lifetime scan, but that allowance is tracked
/// client-side before authentication and never reaches the engine.
pub const FREE_MONTHLY_SCAN_LIMIT: u64 = 5;

/// Outcome of an access check.
#[derive(Debug, Clone)]
pub enum AccessDecision {
    /// The feature may be used.
    Granted(AccessGrant),
    /// The feature may not be used.
    Denied(AccessDenial),
}

impl AccessDecision {
    /// Whether access was granted.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }
}

/// Context attached to a granted decision.
#[derive(Debug, Clone)]
pub struct AccessGrant {
    /// The caller's role at decision time.
    pub role: Role,
    /// The active subscription backing the grant, when one exists (admins
    /// are granted without one).
    pub subscription: Option<Subscription>,
}

/// Context attached to a denied decision.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDenial {
    /// User-facing explanation.
    pub message: String,
    /// Whether upgrading to Pro would lift the denial.
    pub requires_upgrade: bool,
}

/// Middleware-shaped entitlement checks.
pub struct AccessGuard {
    store: Arc<dyn EntitlementStore>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for AccessGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessGuard").finish_non_exhaustive()
    }
}

impl AccessGuard {
    /// Creates a guard over a store and clock.
    #[must_use]
    pub fn new(store: Arc<dyn EntitlementStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Checks whether a user may use a Pro feature.
    ///
    /// With no capability this is the general subscription gate: allowed iff
    /// the user's entitlement window is still open (a canceled subscription
    /// keeps granting access until its end date). With a capability it
    /// additionally requires the subscription's bundle to grant it. Admins
    /// always pass.
    ///
    /// Side effect: when the general gate denies a user whose cached role is
    /// still `pro`, the role is demoted on the spot. This keeps the role
    /// cache eventually consistent even if the sweep has not run yet.
    ///
    /// # Errors
    ///
    /// Returns not-found if the user does not exist.
    #[instrument(skip(self), fields(user_id = user_id.as_str()))]
    pub fn check_access(
        &self,
        user_id: &UserId,
        capability: Option<Capability>,
    ) -> Result<AccessDecision> {
        let now = self.clock.now();
        let user = self.store.user(user_id)?;

        if user.role == Role::Admin {
            return Ok(AccessDecision::Granted(AccessGrant {
                role: Role::Admin,
                subscription: self.store.subscription_for_user(user_id)?,
            }));
        }

        let subscription = self
            .store
            .subscription_for_user(user_id)?
            .filter(|sub| sub.grants_access_at(now));

        match (subscription, capability) {
            (Some(sub), None) => Ok(AccessDecision::Granted(AccessGrant {
                role: user.role,
                subscription: Some(sub),
            })),
            (Some(sub), Some(capability)) if sub.features.grants(capability) => {
                Ok(AccessDecision::Granted(AccessGrant {
                    role: user.role,
                    subscription: Some(sub),
                }))
            }
            (_, capability) => {
                if capability.is_none() && user.role == Role::Pro {
                    // Stale-active detected before the sweep ran; reconcile
                    // the role cache now.
                    self.store.demote_if_pro(user_id, now)?;
                    audit_log(
                        &AuditEvent::new(AuditEventType::RoleDemoted).with_user(user_id.as_str()),
                    );
                }
                let denial = AccessDenial {
                    message: capability.map_or_else(
                        || "This feature requires an active Pro subscription".to_owned(),
                        |c| format!("This feature requires a Pro subscription with {c:?} access"),
                    ),
                    requires_upgrade: true,
                };
                audit_log(
                    &AuditEvent::new(AuditEventType::AccessDenied)
                        .with_user(user_id.as_str())
                        .with_reason(denial.message.clone()),
                );
                Ok(AccessDecision::Denied(denial))
            }
        }
    }

    /// Checks the scan-specific quota path.
    ///
    /// Scans are not gated on subscription alone: admins and users whose
    /// active subscription grants unlimited scans pass unconditionally;
    /// everyone else is held to [`FREE_MONTHLY_SCAN_LIMIT`] per calendar
    /// month.
    ///
    /// # Errors
    ///
    /// Returns not-found if the user does not exist.
    #[instrument(skip(self), fields(user_id = user_id.as_str()))]
    pub fn check_scan_quota(&self, user_id: &UserId) -> Result<AccessDecision> {
        let now = self.clock.now();
        let user = self.store.user(user_id)?;

        if user.role == Role::Admin {
            return Ok(AccessDecision::Granted(AccessGrant {
                role: Role::Admin,
                subscription: None,
            }));
        }

        let subscription = self
            .store
            .subscription_for_user(user_id)?
            .filter(|sub| sub.grants_access_at(now) && sub.features.unlimited_scans);
        if let Some(sub) = subscription {
            return Ok(AccessDecision::Granted(AccessGrant {
                role: user.role,
                subscription: Some(sub),
            }));
        }

        if user.usage_stats.scan_this_month < FREE_MONTHLY_SCAN_LIMIT {
            return Ok(AccessDecision::Granted(AccessGrant { role: user.role, subscription: None }));
        }

        let denial = AccessDenial {
            message: format!(
                "Monthly scan limit of {FREE_MONTHLY_SCAN_LIMIT} reached; upgrade to Pro for unlimited scans"
            ),
            requires_upgrade: true,
        };
        audit_log(
            &AuditEvent::new(AuditEventType::AccessDenied)
                .with_user(user_id.as_str())
                .with_reason(denial.message.clone()),
        );
        Ok(AccessDecision::Denied(denial))
    }
}
