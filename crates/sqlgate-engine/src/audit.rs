//! Append-only decision audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlgate_intent::QueryIntent;
use sqlgate_policy::Identity;
use std::sync::Mutex;
use uuid::Uuid;

use crate::Decision;

/// Immutable record of one evaluated request. Written once, never updated,
/// and never consulted for authorization — each request is evaluated fresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub request_id: Uuid,
    pub identity: Identity,
    pub raw_text: String,
    pub intent: QueryIntent,
    pub decision: Decision,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        request_id: Uuid,
        identity: &Identity,
        raw_text: &str,
        intent: &QueryIntent,
        decision: &Decision,
    ) -> Self {
        Self {
            request_id,
            identity: identity.clone(),
            raw_text: raw_text.to_string(),
            intent: intent.clone(),
            decision: decision.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only log. The mutex makes each append atomic so concurrent
/// requests never interleave partial records.
#[derive(Debug, Default)]
pub struct AuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, record: AuditRecord) {
        tracing::info!(
            request_id = %record.request_id,
            user_id = %record.identity.user_id,
            role = %record.identity.role,
            decision = ?record.decision,
            "decision audited"
        );
        self.records
            .lock()
            .expect("audit log mutex poisoned")
            .push(record);
    }

    /// Snapshot for post-hoc review and tests.
    pub fn snapshot(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .expect("audit log mutex poisoned")
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("audit log mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlgate_policy::Role;

    #[test]
    fn test_append_and_snapshot() {
        let log = AuditLog::new();
        assert!(log.is_empty());

        let identity = Identity::new("4", Role::Student);
        let intent = QueryIntent::unparseable("nope");
        let decision = Decision::deny(crate::DenyReason::UnrecognizedQuery);
        log.append(AuditRecord::new(
            Uuid::new_v4(),
            &identity,
            "nope",
            &intent,
            &decision,
        ));

        let records = log.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity.user_id, "4");
        assert_eq!(records[0].decision, decision);
    }

    #[test]
    fn test_concurrent_appends() {
        use std::sync::Arc;

        let log = Arc::new(AuditLog::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let log = log.clone();
            handles.push(std::thread::spawn(move || {
                let identity = Identity::new(i.to_string(), Role::Student);
                let intent = QueryIntent::unparseable("x");
                let decision = Decision::Allow;
                for _ in 0..50 {
                    log.append(AuditRecord::new(
                        Uuid::new_v4(),
                        &identity,
                        "x",
                        &intent,
                        &decision,
                    ));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.len(), 400);
    }
}
