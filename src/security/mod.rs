//! Security-relevant plumbing: structured audit logging.

pub mod audit;

pub use audit::{audit_log, AuditEvent, AuditEventType};
