//! Payment gateway integration.
//!
//! Three pieces, leaf-first:
//!
//! - [`signature`]: HMAC verification that a claimed payment event actually
//!   originated from the gateway; the sole authentication of "a real
//!   payment occurred"
//! - [`client`]: the outbound order-creation/fetch API, behind the
//!   [`PaymentGateway`] trait so tests can substitute a local gateway
//! - [`orders`]: order construction for a plan selection: pricing, coupon
//!   discounts, and the length-capped receipt identifier

pub mod client;
pub mod orders;
pub mod signature;

pub use client::{CreateOrderRequest, GatewayOrder, HttpPaymentGateway, PaymentGateway};
pub use orders::{OrderResponse, OrderService};
pub use signature::SignatureVerifier;
