//! Diff computation for resource inputs and plans

use crate::planner::{Operation, OperationKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Change of a single top-level input attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Input key
    pub key: String,
    /// Value when last applied (None if newly added)
    pub before: Option<Value>,
    /// Desired value (None if removed)
    pub after: Option<Value>,
}

impl AttributeChange {
    pub fn is_addition(&self) -> bool {
        self.before.is_none() && self.after.is_some()
    }

    pub fn is_removal(&self) -> bool {
        self.before.is_some() && self.after.is_none()
    }
}

/// Differences between last-applied and desired inputs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputDiff {
    pub changes: Vec<AttributeChange>,
}

impl InputDiff {
    /// Compare two resolved input maps, key by key.
    pub fn between(before: &BTreeMap<String, Value>, after: &BTreeMap<String, Value>) -> Self {
        let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
        let changes = keys
            .into_iter()
            .filter_map(|key| {
                let old = before.get(key);
                let new = after.get(key);
                (old != new).then(|| AttributeChange {
                    key: key.clone(),
                    before: old.cloned(),
                    after: new.cloned(),
                })
            })
            .collect();
        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Keys that changed, in key order.
    pub fn keys(&self) -> Vec<&str> {
        self.changes.iter().map(|c| c.key.as_str()).collect()
    }
}

/// Plan summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Number of resources to create
    pub creates: usize,
    /// Number of resources to update in place
    pub updates: usize,
    /// Number of resources to delete
    pub deletes: usize,
    /// Number of resources already up to date
    pub unchanged: usize,
    /// Number of resources replaced because their type changed
    pub replacements: usize,
}

impl DiffSummary {
    /// Create a summary from a list of operations
    pub fn from_operations(operations: &[Operation]) -> Self {
        let mut summary = Self::default();
        for op in operations {
            match op.kind {
                OperationKind::Create => {
                    summary.creates += 1;
                    if op.replacement {
                        summary.replacements += 1;
                    }
                }
                OperationKind::Update => summary.updates += 1,
                OperationKind::Delete => summary.deletes += 1,
                OperationKind::NoOp => summary.unchanged += 1,
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.creates + self.updates + self.deletes
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Group operations by resource type
pub fn group_by_type(operations: &[Operation]) -> BTreeMap<&str, Vec<&Operation>> {
    let mut groups: BTreeMap<&str, Vec<&Operation>> = BTreeMap::new();
    for op in operations {
        groups.entry(op.resource_type.as_str()).or_default().push(op);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_input_diff() {
        let before = BTreeMap::from([
            ("cpu".to_string(), json!("1")),
            ("memory".to_string(), json!("1Gi")),
            ("legacy".to_string(), json!(true)),
        ]);
        let after = BTreeMap::from([
            ("cpu".to_string(), json!("1")),
            ("memory".to_string(), json!("2Gi")),
            ("concurrency".to_string(), json!(80)),
        ]);

        let diff = InputDiff::between(&before, &after);
        assert_eq!(diff.keys(), vec!["concurrency", "legacy", "memory"]);
        assert!(diff.changes[0].is_addition());
        assert!(diff.changes[1].is_removal());
        assert_eq!(diff.changes[2].after, Some(json!("2Gi")));
    }

    #[test]
    fn test_identical_inputs_have_empty_diff() {
        let inputs = BTreeMap::from([("a".to_string(), json!([1, 2]))]);
        assert!(InputDiff::between(&inputs, &inputs).is_empty());
    }
}
