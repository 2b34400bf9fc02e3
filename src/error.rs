//! Error types for the entitlement engine.
//!
//! This module defines all error types that can occur during engine
//! operations. All errors implement the standard [`std::error::Error`] trait
//! via [`thiserror::Error`].
//!
//! # Error Categories
//!
//! - **Validation errors** ([`EngineError::Validation`], [`EngineError::InvalidPlan`],
//!   [`EngineError::InvalidFeature`]): input rejected before any mutation
//! - **Payment errors** ([`EngineError::SignatureMismatch`],
//!   [`EngineError::OrderMismatch`]): a claimed payment failed authentication
//!   or reconciliation
//! - **Gateway errors** ([`EngineError::Http`], [`EngineError::Gateway`]):
//!   communication with the payment gateway failed
//! - **Lookup errors** ([`EngineError::NotFound`], [`EngineError::Forbidden`]):
//!   the requested record is absent or the caller lacks the role
//!
//! # Examples
//!
//! ```
//! use leafpro_entitlements::error::{EngineError, Result};
//!
//! fn require_plan(plan: &str) -> Result<()> {
//!     if plan != "monthly" && plan != "annual" {
//!         return Err(EngineError::InvalidPlan(plan.to_owned()));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Result type alias for engine operations.
///
/// This is a convenience type that uses [`EngineError`] as the error type.
/// All fallible functions in this crate return this type.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in the entitlement engine.
///
/// All variants include contextual information about what went wrong.
/// The error messages are designed to be user-facing and actionable;
/// internal detail belongs in tracing fields, never in these messages.
///
/// # Error Recovery
///
/// - **Transient errors** ([`Http`](Self::Http), [`Gateway`](Self::Gateway)):
///   retry with exponential backoff; no local state was written
/// - **Validation errors**: fix the input and retry
/// - **[`SignatureMismatch`](Self::SignatureMismatch)**: hard rejection, the
///   claimed payment did not originate from the gateway; do not retry
/// - **[`OrderMismatch`](Self::OrderMismatch)**: the gateway order does not
///   reconcile with the selected plan; investigate before retrying
#[must_use = "errors should be handled, propagated, or explicitly panicked"]
#[derive(Debug, Error)]
pub enum EngineError {
    /// Request input failed validation.
    ///
    /// Covers missing or empty required fields. No mutation has occurred.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown subscription plan.
    ///
    /// Only `monthly` and `annual` are valid plan identifiers.
    #[error("invalid subscription plan: {0}")]
    InvalidPlan(String),

    /// Unknown usage feature.
    ///
    /// Only `scan`, `export`, and `apiCall` are trackable features.
    #[error("invalid feature: {0}")]
    InvalidFeature(String),

    /// An identifier failed validation.
    ///
    /// User and subscription ids must be non-empty, at most 64 characters,
    /// and contain only alphanumeric characters, hyphens, and underscores.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The claimed payment signature does not match the expected HMAC.
    ///
    /// This is the engine's sole authentication of "a real payment occurred".
    /// Callers MUST treat this as a hard rejection with no partial
    /// processing; nothing has been written.
    #[error("payment signature verification failed")]
    SignatureMismatch,

    /// The fetched gateway order does not reconcile with the request.
    ///
    /// Raised when the order amount disagrees with the recomputed plan and
    /// coupon pricing. Nothing has been written.
    #[error("gateway order mismatch: {0}")]
    OrderMismatch(String),

    /// HTTP request to the payment gateway failed.
    ///
    /// Wraps [`reqwest::Error`]: timeouts, connection failures, TLS errors.
    /// Safe to retry: order creation and fetch precede any local write.
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The payment gateway rejected the request or returned a malformed
    /// response.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// The requested user or subscription does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The caller's role does not permit the operation.
    #[error("access denied: {0}")]
    Forbidden(String),

    /// The persistence layer failed.
    ///
    /// Detail is intentionally generic; the underlying cause is logged.
    #[error("storage error: {0}")]
    Storage(String),

    /// Engine configuration is missing or out of bounds.
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Returns true for errors that are safe to retry.
    ///
    /// Transient gateway failures happen before any local write, so the
    /// caller may retry without risking duplicate state.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Gateway(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = EngineError::InvalidPlan("weekly".into());
        assert_eq!(error.to_string(), "invalid subscription plan: weekly");
    }

    #[test]
    fn test_signature_mismatch_display() {
        let error = EngineError::SignatureMismatch;
        assert_eq!(error.to_string(), "payment signature verification failed");
    }

    #[test]
    fn test_not_found_passes_message_through() {
        let error = EngineError::NotFound("No active subscription found".into());
        assert_eq!(error.to_string(), "No active subscription found");
    }

    #[test]
    fn test_transient_classification() {
        assert!(EngineError::Gateway("status 502".into()).is_transient());
        assert!(!EngineError::SignatureMismatch.is_transient());
        assert!(!EngineError::Validation("missing field".into()).is_transient());
    }
}
