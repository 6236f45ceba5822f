//! Governance Module
//!
//! Redacted audit logging for every request outcome.

pub mod audit;

pub use audit::{
    hash_identifier, record_best_effort, AuditError, AuditEvent, AuditSink, NullAuditSink,
    PgAuditSink,
};
