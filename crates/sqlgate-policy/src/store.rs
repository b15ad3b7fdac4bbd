//! Policy document loading and the read-only rule index.

use serde::{Deserialize, Serialize};
use sqlgate_intent::SqlOperation;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use crate::{
    is_protected_table, ColumnSet, ConditionTemplate, ConfigError, PermissionRule, Role,
};

/// On-disk policy format.
///
/// ```yaml
/// tables:
///   - Students
///   - Enrollments
/// roles:
///   student:
///     - table: Students
///       allowed_operations: [SELECT]
///       allowed_columns: all
///       conditions:
///         - "StudentID = {current_user_id}"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// Known schema tables. Every rule must reference one of these.
    pub tables: Vec<String>,

    /// Rule entries per role. A role may be absent or empty, in which case
    /// every request for it is denied by default.
    #[serde(default)]
    pub roles: BTreeMap<Role, Vec<RuleEntry>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEntry {
    pub table: String,
    pub allowed_operations: BTreeSet<SqlOperation>,
    #[serde(default = "ColumnSet::all")]
    pub allowed_columns: ColumnSet,
    #[serde(default)]
    pub conditions: Vec<ConditionTemplate>,
}

/// Indexed, validated permission rules. Immutable after load.
#[derive(Debug)]
pub struct PolicyStore {
    rules: HashMap<(Role, String), PermissionRule>,
    tables: BTreeSet<String>,
}

impl PolicyStore {
    /// Load and validate a policy file. Any malformed entry fails the whole
    /// load.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let document: PolicyDocument = serde_yaml::from_str(&contents)?;
        Self::from_document(document)
    }

    /// Build a store from an already-parsed document, validating:
    /// - every rule references a known, non-protected table
    /// - at most one rule per (role, table) pair
    /// - no rule allows operation OTHER
    /// - every condition template carries a recognized identity placeholder
    pub fn from_document(document: PolicyDocument) -> Result<Self, ConfigError> {
        let tables: BTreeSet<String> = document
            .tables
            .iter()
            .map(|t| t.trim().to_lowercase())
            .collect();

        let mut rules = HashMap::new();

        for (role, entries) in document.roles {
            for entry in entries {
                let table_key = entry.table.trim().to_lowercase();

                if is_protected_table(&table_key) {
                    return Err(ConfigError::ProtectedTable {
                        role,
                        table: entry.table,
                    });
                }
                if !tables.contains(&table_key) {
                    return Err(ConfigError::UnknownTable {
                        role,
                        table: entry.table,
                    });
                }
                if entry.allowed_operations.contains(&SqlOperation::Other) {
                    return Err(ConfigError::UnsupportedOperation {
                        role,
                        table: entry.table,
                    });
                }
                entry.allowed_columns.validate()?;
                for condition in &entry.conditions {
                    condition.validate()?;
                }

                let rule = PermissionRule {
                    role,
                    table: entry.table.clone(),
                    allowed_operations: entry.allowed_operations,
                    allowed_columns: entry.allowed_columns,
                    required_conditions: entry.conditions,
                };

                if rules.insert((role, table_key), rule).is_some() {
                    // Duplicate (role, table) pairs are a load-time error,
                    // not a silent last-wins override.
                    return Err(ConfigError::DuplicateRule {
                        role,
                        table: entry.table,
                    });
                }
            }
        }

        tracing::info!(
            rules = rules.len(),
            tables = tables.len(),
            "policy loaded"
        );

        Ok(Self { rules, tables })
    }

    /// Case-insensitive rule lookup by the natural (role, table) key.
    pub fn lookup(&self, role: Role, table: &str) -> Option<&PermissionRule> {
        self.rules.get(&(role, table.trim().to_lowercase()))
    }

    pub fn known_tables(&self) -> &BTreeSet<String> {
        &self.tables
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}
