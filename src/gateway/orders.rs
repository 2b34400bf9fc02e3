//! Order construction for a plan selection.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use super::client::{CreateOrderRequest, PaymentGateway};
use crate::clock::Clock;
use crate::error::Result;
use crate::security::audit::{audit_log, AuditEvent, AuditEventType};
use crate::subscription::models::{Plan, UserId};
use crate::subscription::pricing::plan_price;

/// Hard cap on receipt length, an external gateway constraint.
const MAX_RECEIPT_LEN: usize = 40;

/// All plans are priced in INR.
const CURRENCY: &str = "INR";

/// Response returned to the client after order creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    /// Gateway order id, used later during payment verification.
    pub order_id: String,
    /// Final amount in INR major units.
    pub amount: i64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Receipt identifier attached to the order.
    pub receipt: String,
    /// Whether a coupon discount was applied.
    pub discount_applied: bool,
}

/// Builds gateway payment orders for plan selections.
pub struct OrderService {
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for OrderService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderService").finish_non_exhaustive()
    }
}

impl OrderService {
    /// Creates an order service over a gateway and clock.
    #[must_use]
    pub fn new(gateway: Arc<dyn PaymentGateway>, clock: Arc<dyn Clock>) -> Self {
        Self { gateway, clock }
    }

    /// Creates a gateway order for a plan selection.
    ///
    /// Eligible coupons apply a flat 15% discount; unknown coupons are
    /// silently ignored. The gateway receives the amount in minor units and
    /// metadata notes tracing the order back to the user.
    ///
    /// # Errors
    ///
    /// Returns a transient error if the gateway call fails; no local state
    /// exists afterwards, so the client may simply retry with a fresh order.
    #[instrument(skip(self), fields(user_id = user_id.as_str(), plan = plan.as_str()))]
    pub async fn create_order(
        &self,
        user_id: &UserId,
        plan: Plan,
        coupon_code: Option<&str>,
    ) -> Result<OrderResponse> {
        let (amount, discount_applied) = plan_price(plan, coupon_code);
        let receipt = build_receipt(user_id, self.clock.now());

        let mut notes = BTreeMap::new();
        notes.insert("userId".to_owned(), user_id.as_str().to_owned());
        notes.insert("plan".to_owned(), plan.as_str().to_owned());
        notes.insert("couponCode".to_owned(), coupon_code.unwrap_or("none").to_owned());

        let order = self
            .gateway
            .create_order(CreateOrderRequest {
                amount: amount * 100,
                currency: CURRENCY.to_owned(),
                receipt,
                notes,
            })
            .await?;

        audit_log(
            &AuditEvent::new(AuditEventType::OrderCreated)
                .with_user(user_id.as_str())
                .with_order_id(&*order.id)
                .with_plan(plan.as_str()),
        );

        Ok(OrderResponse {
            amount: order.amount_major(),
            order_id: order.id,
            currency: order.currency,
            receipt: order.receipt,
            discount_applied,
        })
    }
}

/// Builds the order receipt: a short user-id prefix plus the creation time
/// in base36, truncated as a safety net against the 40-character gateway
/// limit.
fn build_receipt(user_id: &UserId, now: DateTime<Utc>) -> String {
    let prefix: String = user_id.as_str().chars().take(8).collect();
    #[allow(
        clippy::cast_sign_loss,
        reason = "timestamps after 1970 are non-negative; clamped anyway"
    )]
    let millis = now.timestamp_millis().max(0) as u64;
    let mut receipt = format!("s_{prefix}_{}", to_base36(millis));
    receipt.truncate(MAX_RECEIPT_LEN);
    receipt
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_owned();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ASCII")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::clock::ManualClock;
    use crate::error::EngineError;
    use crate::gateway::client::GatewayOrder;

    /// Gateway double that records the last creation request.
    #[derive(Debug, Default)]
    struct RecordingGateway {
        last_request: Mutex<Option<CreateOrderRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl PaymentGateway for RecordingGateway {
        async fn create_order(&self, request: CreateOrderRequest) -> Result<GatewayOrder> {
            if self.fail {
                return Err(EngineError::Gateway("status 502".to_owned()));
            }
            let order = GatewayOrder {
                id: "order_test_1".to_owned(),
                amount: request.amount,
                currency: request.currency.clone(),
                receipt: request.receipt.clone(),
                status: Some("created".to_owned()),
                notes: request.notes.clone(),
            };
            *self.last_request.lock().unwrap() = Some(request);
            Ok(order)
        }

        async fn fetch_order(&self, _order_id: &str) -> Result<GatewayOrder> {
            unimplemented!("not used by order creation tests")
        }
    }

    fn service(gateway: Arc<RecordingGateway>) -> OrderService {
        let clock =
            ManualClock::new(Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap());
        OrderService::new(gateway, Arc::new(clock))
    }

    #[tokio::test]
    async fn test_create_order_converts_to_minor_units() {
        let gateway = Arc::new(RecordingGateway::default());
        let svc = service(Arc::clone(&gateway));
        let user = UserId::new("64a1f09e2b3c4d5e6f708192").unwrap();

        let response = svc.create_order(&user, Plan::Monthly, None).await.unwrap();
        assert_eq!(response.amount, 999);
        assert!(!response.discount_applied);

        let request = gateway.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.amount, 99_900);
        assert_eq!(request.currency, "INR");
        assert_eq!(request.notes.get("plan").map(String::as_str), Some("monthly"));
        assert_eq!(request.notes.get("couponCode").map(String::as_str), Some("none"));
    }

    #[tokio::test]
    async fn test_create_order_applies_coupon() {
        let gateway = Arc::new(RecordingGateway::default());
        let svc = service(Arc::clone(&gateway));
        let user = UserId::new("user-1").unwrap();

        let response = svc.create_order(&user, Plan::Monthly, Some("PLANT15")).await.unwrap();
        assert_eq!(response.amount, 849);
        assert!(response.discount_applied);

        let request = gateway.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.amount, 84_900);
        assert_eq!(request.notes.get("couponCode").map(String::as_str), Some("PLANT15"));
    }

    #[tokio::test]
    async fn test_unknown_coupon_is_ignored_not_rejected() {
        let gateway = Arc::new(RecordingGateway::default());
        let svc = service(Arc::clone(&gateway));
        let user = UserId::new("user-1").unwrap();

        let response = svc.create_order(&user, Plan::Annual, Some("SPRING20")).await.unwrap();
        assert_eq!(response.amount, 9990);
        assert!(!response.discount_applied);
    }

    #[tokio::test]
    async fn test_gateway_failure_surfaces_as_transient() {
        let gateway = Arc::new(RecordingGateway { fail: true, ..RecordingGateway::default() });
        let svc = service(gateway);
        let user = UserId::new("user-1").unwrap();

        let error = svc.create_order(&user, Plan::Monthly, None).await.unwrap_err();
        assert!(error.is_transient());
    }

    #[test]
    fn test_receipt_shape_and_length() {
        let user = UserId::new("64a1f09e2b3c4d5e6f708192").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap();
        let receipt = build_receipt(&user, now);

        assert!(receipt.starts_with("s_64a1f09e_"));
        assert!(receipt.len() <= MAX_RECEIPT_LEN);
    }

    #[test]
    fn test_receipt_is_deterministic_for_fixed_clock() {
        let user = UserId::new("user-1").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap();
        assert_eq!(build_receipt(&user, now), build_receipt(&user, now));
    }

    #[test]
    fn test_receipt_never_exceeds_cap_for_max_length_ids() {
        // 8-char prefix + separators + 13 base36 digits stays under 40, but
        // the hard truncate guards against future format drift.
        let user = UserId::new("a".repeat(64)).unwrap();
        let now = Utc.with_ymd_and_hms(2100, 12, 31, 23, 59, 59).unwrap();
        assert!(build_receipt(&user, now).len() <= MAX_RECEIPT_LEN);
    }

    #[test]
    fn test_base36_encoding() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1_000_000), "lfls");
    }
}
