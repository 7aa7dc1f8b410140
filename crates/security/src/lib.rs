//! Governance for toolloop: the reference policy gate and audit logging.
//!
//! Provides:
//! - **Policy gate**: deny lists, caller allow-lists, autonomy rules and
//!   per-tool rate limits behind the `GovernanceGate` trait
//! - **Audit logging**: structured record of denials and executions

pub mod audit;
pub mod policy;

pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use policy::PolicyGate;
