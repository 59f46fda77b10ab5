//! Audit trail
//!
//! One append-only record per attempted gated operation: `success` and
//! `failure` come from the caller after the operation ran, `denied` from
//! the gateway when it refused. Writing a record never fails the caller.

pub mod log;
pub mod record;
pub mod sink;

pub use log::AuditLog;
pub use record::{AuditEvent, AuditOutcome, AuditQuery, AuditRecord, sanitize_context};
pub use sink::{AuditSink, FanoutAuditSink, MemoryAuditSink, TracingAuditSink};
