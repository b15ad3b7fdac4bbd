//! SQL access-control validation engine.
//!
//! Given a candidate SQL statement and the requester's identity, the engine
//! extracts the statement's intent (with a semantic strategy falling back to
//! deterministic pattern matching), evaluates it against the permission
//! policy, and either denies execution or hands back the statement — possibly
//! rewritten to inject a mandatory identity-scoping predicate. Every decision
//! is recorded in an append-only audit log.
//!
//! The engine fails closed: parser uncertainty, extractor errors, and rewrite
//! ambiguity all resolve to a denial, never to permissive execution.

mod audit;
mod engine;
mod evaluate;
mod rewrite;

pub use audit::{AuditLog, AuditRecord};
pub use engine::{Validation, ValidationEngine};
pub use evaluate::{AuthorizationEvaluator, Decision, DenyReason};
pub use rewrite::{rewrite, RewriteError};
