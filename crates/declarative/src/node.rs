//! Resource declarations
//!
//! A `ResourceNode` is what a declaration source hands to the engine: an id,
//! a provider type and the desired inputs. Outputs and run status are not
//! stored on the node; the graph stays read-only while a run tracks them.

use crate::value::{AttrValue, Reference, ResolveError};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A declared unit of infrastructure.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    /// Unique identifier within the graph (e.g., "secret", "docker-service-account")
    pub id: String,
    /// Provider type, `family:kind` (e.g., "core:data", "random:string")
    pub resource_type: String,
    /// Desired inputs, possibly referencing other nodes' outputs
    pub inputs: BTreeMap<String, AttrValue>,
    /// Output keys this node promises to produce; empty means "not declared"
    pub declared_outputs: BTreeSet<String>,
    /// Ordering-only dependencies
    pub depends_on: Vec<String>,
}

impl ResourceNode {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            inputs: BTreeMap::new(),
            declared_outputs: BTreeSet::new(),
            depends_on: Vec::new(),
        }
    }

    /// Set an input attribute.
    pub fn input(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    /// Set a literal input attribute.
    pub fn literal(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.input(key, AttrValue::literal(value))
    }

    /// Declare an output key.
    pub fn output(mut self, key: impl Into<String>) -> Self {
        self.declared_outputs.insert(key.into());
        self
    }

    /// Add an ordering-only dependency.
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }

    /// Every reference in this node's inputs, in input key order.
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        for value in self.inputs.values() {
            value.visit_references(&mut |r| refs.push(r));
        }
        refs
    }

    /// Resolve every input to a literal using `lookup` for referenced outputs.
    pub fn resolve_inputs<F>(&self, lookup: &F) -> Result<BTreeMap<String, Value>, ResolveError>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        self.inputs
            .iter()
            .map(|(key, value)| value.resolve(lookup).map(|v| (key.clone(), v)))
            .collect()
    }

    /// Whether `key` is a valid output to reference on this node.
    pub fn provides(&self, key: &str) -> bool {
        self.declared_outputs.is_empty() || self.declared_outputs.contains(key)
    }
}

/// Lifecycle of a node within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Planned,
    Applying,
    Applied,
    Failed,
    Cancelled,
}

impl NodeStatus {
    /// Whether the node has reached a terminal state for this run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Planned => "planned",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_references() {
        let node = ResourceNode::new("invoker", "core:data")
            .input("service", AttrValue::reference("service", "name"))
            .literal("role", "roles/run.invoker")
            .literal("member", "allUsers")
            .depends_on("service")
            .depends_on("service");

        assert_eq!(node.inputs.len(), 3);
        assert_eq!(node.depends_on, vec!["service"]);
        assert_eq!(node.references(), vec![&Reference::new("service", "name")]);
    }

    #[test]
    fn test_resolve_inputs() {
        let node = ResourceNode::new("sa-access", "core:data")
            .input("secretId", AttrValue::reference("secret", "id"))
            .literal("role", "roles/secretmanager.secretAccessor");

        let lookup = |r: &Reference| (r.node == "secret").then(|| Value::from("config"));
        let inputs = node.resolve_inputs(&lookup).unwrap();
        assert_eq!(inputs["secretId"], Value::from("config"));

        let err = node.resolve_inputs(&|_: &Reference| None).unwrap_err();
        assert_eq!(err, ResolveError::Unresolved(Reference::new("secret", "id")));
    }

    #[test]
    fn test_provides() {
        let open = ResourceNode::new("a", "core:data");
        assert!(open.provides("anything"));

        let declared = ResourceNode::new("b", "core:data").output("id");
        assert!(declared.provides("id"));
        assert!(!declared.provides("email"));
    }

    #[test]
    fn test_terminal_status() {
        assert!(NodeStatus::Applied.is_terminal());
        assert!(NodeStatus::Cancelled.is_terminal());
        assert!(!NodeStatus::Applying.is_terminal());
    }
}
