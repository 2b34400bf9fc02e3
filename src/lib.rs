//! Subscription & Entitlement Engine for the LeafPro plant-disease
//! detection service.
//!
//! This crate turns payment-gateway transactions into durable, time-bounded
//! grants of premium capability, enforces per-feature usage quotas, and
//! autonomously degrades expired grants. Everything else the product does
//! (inference, identity, file storage, presentation) is an external
//! collaborator consumed through an interface.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  create-order   ┌─────────────────────────────────────┐
//! │   Client   │────────────────►│ OrderService ──► PaymentGateway ────┼──► gateway
//! │            │  verify-payment │                                     │
//! │            │────────────────►│ SignatureVerifier                   │
//! └────────────┘                 │      │ verified                     │
//!                                │      ▼                              │
//!        feature calls           │ LifecycleManager ──► EntitlementStore
//!       ────────────────────────►│      ▲                    ▲  ▲      │
//!        (AccessGuard,           │      │ daily              │  │      │
//!         UsageMeter)            │ ExpirySweep ──────────────┘  │      │
//!                                │ MonthlyReset ────────────────┘      │
//!                                └─────────────────────────────────────┘
//! ```
//!
//! The invariants that matter are money correctness (an order's amount is
//! recomputed and reconciled before any grant), idempotent state transitions
//! (the gateway payment id is an idempotency key: a payment is applied at
//! most once), time-based expiry (the stored status is a hint; the derived
//! activity predicate is authoritative), and at-most-once quota counting
//! (counter bumps are atomic store primitives).
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use leafpro_entitlements::{
//!     api::{CreateOrderParams, SubscriptionService},
//!     clock::SystemClock,
//!     config::EngineConfig,
//!     gateway::HttpPaymentGateway,
//!     store::MemoryStore,
//!     subscription::models::UserId,
//! };
//!
//! # async fn example() -> leafpro_entitlements::error::Result<()> {
//! let config = EngineConfig::from_env()?;
//! let service = SubscriptionService::new(
//!     &config,
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(HttpPaymentGateway::new(&config.gateway)?),
//!     Arc::new(SystemClock),
//! );
//!
//! // Background jobs: daily expiry sweep + monthly counter reset.
//! let scheduler = service.scheduler().start();
//!
//! let user = UserId::new("user-123")?;
//! let order = service
//!     .create_order(
//!         &user,
//!         CreateOrderParams { plan: "monthly".to_owned(), coupon_code: None },
//!     )
//!     .await?;
//! println!("pay order {} for ₹{}", order.order_id, order.amount);
//! # scheduler.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`api`]: the typed operation surface, one method per external route
//! - [`gateway`]: signature verification and the order-creation/fetch API
//! - [`subscription`]: data model, pricing, and the lifecycle state machine
//! - [`store`]: the entitlement store trait and its in-memory implementation
//! - [`guard`], [`meter`]: request-time access decisions and usage counters
//! - [`sweep`]: the expiry sweep, monthly reset, and their scheduler
//! - [`clock`], [`config`], [`error`]: ambient plumbing
//! - [`reliability`], [`security`]: retry with backoff, audit logging

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod guard;
pub mod meter;
pub mod reliability;
pub mod security;
pub mod store;
pub mod subscription;
pub mod sweep;

pub use api::SubscriptionService;
pub use error::{EngineError, Result};
