//! HTTP surface for the validation engine.
//!
//! `POST /validate` takes a user id and a candidate SQL statement, resolves
//! the identity, and returns the decision plus the final SQL the caller's
//! executor may run. Denials report only the reason category, never rule
//! internals.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use sqlgate_engine::{Decision, ValidationEngine};
use sqlgate_policy::IdentityResolver;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ValidationEngine>,
    pub resolver: Arc<dyn IdentityResolver>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/validate", post(validate))
        .route("/healthz", get(healthz))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub user_id: String,
    pub sql: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub request_id: Uuid,
    pub decision: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Present only when the decision permits execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_sql: Option<String>,
}

async fn validate(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> Response {
    let identity = match state.resolver.resolve(&request.user_id) {
        Ok(identity) => identity,
        Err(err) => {
            tracing::warn!(user_id = %request.user_id, "identity not found");
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": err.to_string() })),
            )
                .into_response();
        }
    };

    let validation = state.engine.validate(&identity, &request.sql).await;

    let response = match &validation.decision {
        Decision::Allow => ValidateResponse {
            request_id: validation.request_id,
            decision: "allow",
            reason: None,
            final_sql: Some(validation.final_sql.clone()),
        },
        Decision::AllowWithRewrite { .. } => ValidateResponse {
            request_id: validation.request_id,
            decision: "allow_with_rewrite",
            reason: None,
            final_sql: Some(validation.final_sql.clone()),
        },
        Decision::Deny { reason } => ValidateResponse {
            request_id: validation.request_id,
            decision: "deny",
            reason: Some(reason.to_string()),
            final_sql: None,
        },
    };

    Json(response).into_response()
}

async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlgate_policy::{PolicyDocument, PolicyStore, Role, StaticIdentityResolver};
    use std::collections::HashMap;

    fn state() -> AppState {
        let yaml = r#"
tables: [Students]
roles:
  student:
    - table: Students
      allowed_operations: [SELECT]
      allowed_columns: all
      conditions:
        - "StudentID = {current_user_id}"
"#;
        let doc: PolicyDocument = serde_yaml::from_str(yaml).unwrap();
        let policy = Arc::new(PolicyStore::from_document(doc).unwrap());

        let mut users = HashMap::new();
        users.insert("4".to_string(), Role::Student);

        AppState {
            engine: Arc::new(ValidationEngine::new(policy)),
            resolver: Arc::new(StaticIdentityResolver::new(users)),
        }
    }

    #[tokio::test]
    async fn test_validate_allows_with_rewrite() {
        let state = state();
        let identity = state.resolver.resolve("4").unwrap();
        let validation = state.engine.validate(&identity, "SELECT * FROM Students").await;

        assert!(validation.decision.is_allowed());
        assert_eq!(
            validation.final_sql,
            "SELECT * FROM Students WHERE StudentID = '4'"
        );
    }

    #[tokio::test]
    async fn test_unknown_user_rejected_before_evaluation() {
        let state = state();
        assert!(state.resolver.resolve("999").is_err());
        // Nothing reached the engine, so nothing was audited.
        assert!(state.engine.audit().is_empty());
    }

    #[test]
    fn test_deny_response_reports_category_only() {
        let response = ValidateResponse {
            request_id: Uuid::new_v4(),
            decision: "deny",
            reason: Some("protected table".to_string()),
            final_sql: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["decision"], "deny");
        assert_eq!(json["reason"], "protected table");
        assert!(json.get("final_sql").is_none());
    }
}
