//! Role-based permission policy for the validation engine.
//!
//! The `PolicyStore` indexes one `PermissionRule` per (role, table) pair,
//! loaded from a YAML document and validated fail-fast: a single malformed
//! entry rejects the whole load, because a partially loaded policy is a
//! security hazard. The store is read-only after load, so concurrent
//! evaluators share it behind an `Arc` without locking.

use serde::{Deserialize, Serialize};
use sqlgate_intent::SqlOperation;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use thiserror::Error;

mod store;

pub use store::{PolicyDocument, PolicyStore, RuleEntry};

/// Tables no rule may ever grant access to, independent of policy data.
/// The Users table holds credentials; even a misconfigured policy file
/// cannot expose it.
pub const PROTECTED_TABLES: &[&str] = &["users"];

/// True if `table` is structurally excluded from all access.
pub fn is_protected_table(table: &str) -> bool {
    PROTECTED_TABLES
        .iter()
        .any(|p| p.eq_ignore_ascii_case(table.trim()))
}

/// Coarse authorization category. Closed set: adding a role forces a
/// compile-time review of every match site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Student => f.write_str("student"),
            Role::Teacher => f.write_str("teacher"),
        }
    }
}

/// The authenticated requester. Resolved once per session, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
}

/// The only placeholder a condition template may carry.
pub const PLACEHOLDER_USER_ID: &str = "{current_user_id}";

/// A predicate pattern bound to the requester's identity at evaluation time,
/// e.g. `StudentID = {current_user_id}`. Never a raw literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionTemplate(String);

impl ConditionTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reject templates with unrecognized `{...}` placeholders or none at
    /// all. A template without an identity binding would be a constant
    /// predicate, which is never what row scoping means.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut found_binding = false;
        let mut rest = self.0.as_str();
        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start..].find('}') else {
                return Err(ConfigError::MalformedCondition {
                    template: self.0.clone(),
                });
            };
            let placeholder = &rest[start..start + len + 1];
            if placeholder != PLACEHOLDER_USER_ID {
                return Err(ConfigError::UnknownPlaceholder {
                    template: self.0.clone(),
                    placeholder: placeholder.to_string(),
                });
            }
            found_binding = true;
            rest = &rest[start + len + 1..];
        }
        if !found_binding {
            return Err(ConfigError::MalformedCondition {
                template: self.0.clone(),
            });
        }
        Ok(())
    }

    /// Resolve the placeholder against the live identity, producing a SQL
    /// predicate. The bound value is always the requester's own id, quoted
    /// with embedded quotes doubled.
    pub fn bind(&self, identity: &Identity) -> String {
        let quoted = format!("'{}'", identity.user_id.replace('\'', "''"));
        self.0.replace(PLACEHOLDER_USER_ID, &quoted)
    }
}

/// Which columns a rule exposes: an explicit list, or everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnSet {
    /// The literal string `all` in the policy document.
    Wildcard(String),
    Columns(Vec<String>),
}

impl ColumnSet {
    pub fn all() -> Self {
        ColumnSet::Wildcard("all".to_string())
    }

    pub fn permits(&self, column: &str) -> bool {
        match self {
            ColumnSet::Wildcard(_) => true,
            ColumnSet::Columns(cols) => cols.iter().any(|c| c.eq_ignore_ascii_case(column)),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            ColumnSet::Wildcard(w) if w.eq_ignore_ascii_case("all") => Ok(()),
            ColumnSet::Wildcard(w) => Err(ConfigError::BadColumnSet { value: w.clone() }),
            ColumnSet::Columns(_) => Ok(()),
        }
    }
}

/// Policy unit binding a (role, table) pair to allowed operations, columns,
/// and mandatory row-scoping conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    pub role: Role,
    pub table: String,
    pub allowed_operations: BTreeSet<SqlOperation>,
    pub allowed_columns: ColumnSet,
    pub required_conditions: Vec<ConditionTemplate>,
}

/// Malformed policy at load time. Fatal: the process must not start with a
/// partial policy.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read policy file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse policy YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("rule for role '{role}' references unknown table '{table}'")]
    UnknownTable { role: Role, table: String },

    #[error("rule for role '{role}' references protected table '{table}'")]
    ProtectedTable { role: Role, table: String },

    #[error("duplicate rule for role '{role}' and table '{table}'")]
    DuplicateRule { role: Role, table: String },

    #[error("rule for role '{role}' on table '{table}' allows operation OTHER")]
    UnsupportedOperation { role: Role, table: String },

    #[error("allowed_columns must be a list or the string 'all', got '{value}'")]
    BadColumnSet { value: String },

    #[error("condition template '{template}' has no identity placeholder or is malformed")]
    MalformedCondition { template: String },

    #[error("condition template '{template}' uses unrecognized placeholder '{placeholder}'")]
    UnknownPlaceholder { template: String, placeholder: String },
}

/// Boundary to the external identity resolution collaborator.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, user_id: &str) -> Result<Identity, IdentityNotFound>;
}

#[derive(Debug, Error)]
#[error("no identity found for user id '{user_id}'")]
pub struct IdentityNotFound {
    pub user_id: String,
}

/// Resolver backed by a fixed user table, typically built from server
/// configuration. The production database lookup lives outside the engine.
#[derive(Debug, Default)]
pub struct StaticIdentityResolver {
    users: HashMap<String, Role>,
}

impl StaticIdentityResolver {
    pub fn new(users: HashMap<String, Role>) -> Self {
        Self { users }
    }
}

impl IdentityResolver for StaticIdentityResolver {
    fn resolve(&self, user_id: &str) -> Result<Identity, IdentityNotFound> {
        self.users
            .get(user_id)
            .map(|role| Identity::new(user_id, *role))
            .ok_or_else(|| IdentityNotFound {
                user_id: user_id.to_string(),
            })
    }
}

// Re-exported so callers can load a policy without importing the store
// module path.
pub fn load_policy<P: AsRef<Path>>(path: P) -> Result<PolicyStore, ConfigError> {
    PolicyStore::load(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protected_table_casing() {
        assert!(is_protected_table("Users"));
        assert!(is_protected_table("users"));
        assert!(is_protected_table(" USERS "));
        assert!(!is_protected_table("students"));
    }

    #[test]
    fn test_condition_bind_quotes_user_id() {
        let tmpl = ConditionTemplate::new("StudentID = {current_user_id}");
        let identity = Identity::new("4", Role::Student);
        assert_eq!(tmpl.bind(&identity), "StudentID = '4'");
    }

    #[test]
    fn test_condition_bind_escapes_quotes() {
        let tmpl = ConditionTemplate::new("TeacherID = {current_user_id}");
        let identity = Identity::new("o'brien", Role::Teacher);
        assert_eq!(tmpl.bind(&identity), "TeacherID = 'o''brien'");
    }

    #[test]
    fn test_condition_validate_rejects_unknown_placeholder() {
        let tmpl = ConditionTemplate::new("StudentID = {other_user_id}");
        assert!(matches!(
            tmpl.validate(),
            Err(ConfigError::UnknownPlaceholder { .. })
        ));
    }

    #[test]
    fn test_condition_validate_requires_binding() {
        let tmpl = ConditionTemplate::new("StudentID = 1");
        assert!(matches!(
            tmpl.validate(),
            Err(ConfigError::MalformedCondition { .. })
        ));
    }

    #[test]
    fn test_column_set_permits() {
        let all = ColumnSet::all();
        assert!(all.permits("anything"));

        let list = ColumnSet::Columns(vec!["FullName".into(), "Email".into()]);
        assert!(list.permits("fullname"));
        assert!(!list.permits("password"));
    }

    #[test]
    fn test_static_resolver() {
        let mut users = HashMap::new();
        users.insert("4".to_string(), Role::Student);
        let resolver = StaticIdentityResolver::new(users);

        let identity = resolver.resolve("4").unwrap();
        assert_eq!(identity.role, Role::Student);
        assert!(resolver.resolve("999").is_err());
    }
}
