//! Request pipeline: extract → evaluate → rewrite → audit.

use sqlgate_intent::{clean_sql, IntentExtractor, PatternExtractor, QueryIntent};
use sqlgate_policy::{Identity, PolicyStore};
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditLog, AuditRecord};
use crate::evaluate::{AuthorizationEvaluator, Decision, DenyReason};
use crate::rewrite::rewrite;

/// Result of validating one candidate statement. `final_sql` is the text the
/// executor may run, and only when the decision allows it.
#[derive(Debug, Clone)]
pub struct Validation {
    pub request_id: Uuid,
    pub final_sql: String,
    pub decision: Decision,
}

/// The validation engine. Owns the read-only policy, the extractor
/// strategies, and the audit log; holds no per-request state, so one
/// instance serves concurrent requests.
pub struct ValidationEngine {
    primary: Option<Box<dyn IntentExtractor>>,
    fallback: PatternExtractor,
    evaluator: AuthorizationEvaluator,
    audit: AuditLog,
}

impl ValidationEngine {
    /// Engine with only the deterministic pattern strategy.
    pub fn new(policy: Arc<PolicyStore>) -> Self {
        Self {
            primary: None,
            fallback: PatternExtractor::new(),
            evaluator: AuthorizationEvaluator::new(policy),
            audit: AuditLog::new(),
        }
    }

    /// Install a primary (semantic) extractor. The pattern strategy remains
    /// the fallback whenever the primary fails.
    pub fn with_primary(mut self, extractor: Box<dyn IntentExtractor>) -> Self {
        self.primary = Some(extractor);
        self
    }

    /// Validate a candidate statement for the given requester.
    ///
    /// Never returns an error: every per-request failure is converted into a
    /// `Deny` decision. Only the allowed paths produce SQL the executor
    /// should run.
    pub async fn validate(&self, identity: &Identity, raw_sql: &str) -> Validation {
        let request_id = Uuid::new_v4();
        let cleaned = clean_sql(raw_sql);

        let intent = self.extract(&cleaned).await;
        let decision = self.evaluator.evaluate(identity, &intent);

        let (final_sql, decision) = match decision {
            Decision::AllowWithRewrite { predicate } => match rewrite(&cleaned, &predicate) {
                Ok(sql) => (sql, Decision::AllowWithRewrite { predicate }),
                Err(err) => {
                    // Never execute a statement we could not scope.
                    tracing::warn!(%request_id, error = %err, "rewrite refused, denying");
                    (cleaned.clone(), Decision::deny(DenyReason::RewriteFailed))
                }
            },
            other => (cleaned.clone(), other),
        };

        self.audit.append(AuditRecord::new(
            request_id, identity, &cleaned, &intent, &decision,
        ));

        Validation {
            request_id,
            final_sql,
            decision,
        }
    }

    /// Run the primary strategy if configured, falling back to pattern
    /// matching on any failure. Both failing yields the terminal
    /// unparseable intent, which evaluates to Deny.
    async fn extract(&self, cleaned_sql: &str) -> QueryIntent {
        if let Some(primary) = &self.primary {
            match primary.extract(cleaned_sql).await {
                Ok(intent) if !intent.is_unparseable() => return intent,
                Ok(_) => {
                    tracing::debug!("primary extractor returned ambiguous intent, falling back");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "primary extractor failed, falling back");
                }
            }
        }

        match self.fallback.extract_sync(cleaned_sql) {
            Ok(intent) => intent,
            Err(err) => {
                tracing::warn!(error = %err, "pattern extractor failed");
                QueryIntent::unparseable(cleaned_sql)
            }
        }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlgate_intent::ExtractionFailure;
    use sqlgate_policy::{PolicyDocument, Role};

    struct FailingExtractor;

    #[async_trait::async_trait]
    impl IntentExtractor for FailingExtractor {
        async fn extract(&self, _raw_sql: &str) -> Result<QueryIntent, ExtractionFailure> {
            Err(ExtractionFailure::Timeout(5))
        }
    }

    fn fixture_policy() -> Arc<PolicyStore> {
        let yaml = r#"
tables:
  - Students
roles:
  student:
    - table: Students
      allowed_operations: [SELECT]
      allowed_columns: all
      conditions:
        - "StudentID = {current_user_id}"
"#;
        let doc: PolicyDocument = serde_yaml::from_str(yaml).unwrap();
        Arc::new(PolicyStore::from_document(doc).unwrap())
    }

    #[tokio::test]
    async fn test_failed_primary_falls_back_to_pattern() {
        let engine =
            ValidationEngine::new(fixture_policy()).with_primary(Box::new(FailingExtractor));
        let identity = Identity::new("4", Role::Student);

        let validation = engine.validate(&identity, "SELECT * FROM Students").await;
        assert!(validation.decision.is_allowed());
        assert_eq!(
            validation.final_sql,
            "SELECT * FROM Students WHERE StudentID = '4'"
        );
    }

    #[tokio::test]
    async fn test_garbled_input_denied_not_crashed() {
        let engine =
            ValidationEngine::new(fixture_policy()).with_primary(Box::new(FailingExtractor));
        let identity = Identity::new("4", Role::Student);

        let validation = engine.validate(&identity, "?!? nonsense ?!?").await;
        assert_eq!(
            validation.decision,
            Decision::deny(DenyReason::UnrecognizedQuery)
        );
    }

    #[tokio::test]
    async fn test_every_request_is_audited() {
        let engine = ValidationEngine::new(fixture_policy());
        let identity = Identity::new("4", Role::Student);

        engine.validate(&identity, "SELECT * FROM Students").await;
        engine.validate(&identity, "DELETE FROM Students").await;

        let records = engine.audit().snapshot();
        assert_eq!(records.len(), 2);
        assert!(records[0].decision.is_allowed());
        assert!(!records[1].decision.is_allowed());
    }

    #[tokio::test]
    async fn test_markdown_fences_stripped() {
        let engine = ValidationEngine::new(fixture_policy());
        let identity = Identity::new("4", Role::Student);

        let validation = engine
            .validate(&identity, "```sql\nSELECT * FROM Students\n```")
            .await;
        assert_eq!(
            validation.final_sql,
            "SELECT * FROM Students WHERE StudentID = '4'"
        );
    }
}
