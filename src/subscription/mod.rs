//! Subscription domain: data model, pricing, and the lifecycle state
//! machine.

pub mod lifecycle;
pub mod models;
pub mod pricing;

pub use lifecycle::LifecycleManager;
pub use models::{
    Capability, Feature, FeatureBundle, PaymentDetails, Plan, Role, Subscription, SubscriptionId,
    SubscriptionStatus, UserId, UserRecord,
};
