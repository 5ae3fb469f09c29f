//! Plan engine - diffs declarations against last-applied state
//!
//! Non-delete operations follow the dependency order of the current graph.
//! Deletes follow the reverse dependency order of the prior graph, which is
//! rebuilt from the `dependencies` recorded in each state record.
//!
//! A type change deletes the old resource before creating the new one. The
//! sequence is: operations untouched by any replacement, deletes that must
//! clear the way for a replacement, operations on replaced nodes and their
//! dependents, then the remaining deletes. A surviving node that moves off a
//! removed node only to depend on a replaced one is the one case where a
//! delete runs before its former dependent has been updated.

use crate::diff::{DiffSummary, InputDiff};
use crate::error::Result;
use crate::graph::Graph;
use crate::node::ResourceNode;
use crate::state::{StateRecord, StateStore};
use crate::value::{Reference, ResolveError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::fmt;

/// What an operation does to its resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    NoOp,
}

impl OperationKind {
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoOp)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        f.write_str(s)
    }
}

/// One step of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub node_id: String,
    /// Type the operation acts on (the old type for a replacement delete)
    pub resource_type: String,
    pub kind: OperationKind,
    /// Human-readable reason for the operation
    pub reason: String,
    /// Part of a delete + create pair caused by a type change
    #[serde(default)]
    pub replacement: bool,
    /// Input changes for updates whose new inputs are fully known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<InputDiff>,
}

impl Operation {
    fn new(node_id: &str, resource_type: &str, kind: OperationKind, reason: String) -> Self {
        Self {
            node_id: node_id.to_string(),
            resource_type: resource_type.to_string(),
            kind,
            reason,
            replacement: false,
            diff: None,
        }
    }
}

/// Ordered operations reconciling declarations with prior state
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub operations: Vec<Operation>,
    prior: BTreeMap<String, StateRecord>,
}

impl Plan {
    /// State the plan was computed against.
    pub fn prior(&self) -> &BTreeMap<String, StateRecord> {
        &self.prior
    }

    pub fn prior_record(&self, node_id: &str) -> Option<&StateRecord> {
        self.prior.get(node_id)
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary::from_operations(&self.operations)
    }

    pub fn has_changes(&self) -> bool {
        self.operations.iter().any(|op| op.kind.is_change())
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Operations that change something.
    pub fn changes(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(|op| op.kind.is_change())
    }

    /// Index of the first operation of `kind` on `node_id`.
    pub fn position(&self, node_id: &str, kind: OperationKind) -> Option<usize> {
        self.operations
            .iter()
            .position(|op| op.node_id == node_id && op.kind == kind)
    }
}

/// Plan against the records currently held by `store`.
pub fn plan(graph: &Graph, store: &dyn StateStore) -> Result<Plan> {
    Ok(plan_with_state(graph, store.load()?))
}

/// Plan against an explicit set of prior records.
pub fn plan_with_state(graph: &Graph, prior: BTreeMap<String, StateRecord>) -> Plan {
    let replaced: BTreeSet<&str> = graph
        .nodes()
        .filter(|n| {
            prior
                .get(&n.id)
                .is_some_and(|r| r.resource_type != n.resource_type)
        })
        .map(|n| n.id.as_str())
        .collect();

    // Outputs known before anything runs; replaced nodes will get new ones
    let known = |r: &Reference| -> Option<Value> {
        if replaced.contains(r.node.as_str()) {
            return None;
        }
        prior.get(&r.node)?.last_outputs.get(&r.key).cloned()
    };

    // Nodes that must wait for a replacement: the replaced nodes and
    // everything that now depends on them
    let mut downstream: BTreeSet<&str> = BTreeSet::new();
    let mut independent = Vec::with_capacity(graph.len());
    let mut forward = Vec::new();
    for node in graph.topological_order() {
        let op = plan_node(node, prior.get(&node.id), &known);
        let waits = replaced.contains(node.id.as_str())
            || graph
                .dependencies(&node.id)
                .iter()
                .any(|d| downstream.contains(d));
        if waits {
            downstream.insert(node.id.as_str());
            forward.push(op);
        } else {
            independent.push(op);
        }
    }

    let removed: BTreeSet<&str> = prior
        .keys()
        .map(String::as_str)
        .filter(|id| !graph.contains(id))
        .collect();

    // Removed nodes that depended on a replaced node must go before its
    // replacement delete
    let mut early: BTreeSet<&str> = replaced.clone();
    loop {
        let before = early.len();
        for id in &removed {
            let depends_on_early = prior[*id]
                .dependencies
                .iter()
                .any(|d| early.contains(d.as_str()));
            if depends_on_early {
                early.insert(id);
            }
        }
        if early.len() == before {
            break;
        }
    }

    let delete_order = reverse_dependency_order(&prior);
    let delete_op = |id: &str| -> Operation {
        let record = &prior[id];
        match graph.get(id) {
            Some(node) => {
                let mut op = Operation::new(
                    id,
                    &record.resource_type,
                    OperationKind::Delete,
                    format!(
                        "type changed from {} to {}",
                        record.resource_type, node.resource_type
                    ),
                );
                op.replacement = true;
                op
            }
            None => Operation::new(
                id,
                &record.resource_type,
                OperationKind::Delete,
                "no longer declared".to_string(),
            ),
        }
    };

    let mut operations = Vec::with_capacity(graph.len() + removed.len());
    operations.extend(independent);
    operations.extend(
        delete_order
            .iter()
            .filter(|id| early.contains(*id))
            .map(|id| delete_op(id)),
    );
    operations.extend(forward);
    operations.extend(
        delete_order
            .iter()
            .filter(|id| removed.contains(*id) && !early.contains(*id))
            .map(|id| delete_op(id)),
    );

    log::debug!(
        "planned {} operations ({} replaced, {} removed)",
        operations.len(),
        replaced.len(),
        removed.len()
    );

    Plan { operations, prior }
}

fn plan_node<F>(node: &ResourceNode, record: Option<&StateRecord>, known: &F) -> Operation
where
    F: Fn(&Reference) -> Option<Value>,
{
    let Some(record) = record else {
        return Operation::new(
            &node.id,
            &node.resource_type,
            OperationKind::Create,
            "not yet created".to_string(),
        );
    };

    if record.resource_type != node.resource_type {
        let mut op = Operation::new(
            &node.id,
            &node.resource_type,
            OperationKind::Create,
            format!("replaces {}", record.resource_type),
        );
        op.replacement = true;
        return op;
    }

    match node.resolve_inputs(known) {
        Ok(inputs) if inputs == record.last_inputs => Operation::new(
            &node.id,
            &node.resource_type,
            OperationKind::NoOp,
            "up to date".to_string(),
        ),
        Ok(inputs) => {
            let diff = InputDiff::between(&record.last_inputs, &inputs);
            let mut op = Operation::new(
                &node.id,
                &node.resource_type,
                OperationKind::Update,
                format!("inputs changed: {}", diff.keys().join(", ")),
            );
            op.diff = Some(diff);
            op
        }
        Err(ResolveError::Unresolved(r)) => Operation::new(
            &node.id,
            &node.resource_type,
            OperationKind::Update,
            format!("{r} is known only after apply"),
        ),
        Err(ResolveError::Compute { function, message }) => Operation::new(
            &node.id,
            &node.resource_type,
            OperationKind::Update,
            format!("`{function}` cannot be evaluated yet: {message}"),
        ),
    }
}

/// Prior records ordered so that dependents come before their dependencies.
///
/// Unconstrained records keep key order. Records caught in a cycle (only
/// possible with hand-edited state) are appended in key order.
fn reverse_dependency_order(prior: &BTreeMap<String, StateRecord>) -> Vec<&str> {
    let ids: Vec<&str> = prior.keys().map(String::as_str).collect();
    let position: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let deps: Vec<BTreeSet<usize>> = ids
        .iter()
        .map(|id| {
            prior[*id]
                .dependencies
                .iter()
                .filter_map(|d| position.get(d.as_str()).copied())
                .collect()
        })
        .collect();

    let mut dependents_left = vec![0usize; ids.len()];
    for set in &deps {
        for &d in set {
            dependents_left[d] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = dependents_left
        .iter()
        .enumerate()
        .filter(|&(_, &n)| n == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut done = vec![false; ids.len()];
    let mut order = Vec::with_capacity(ids.len());
    while let Some(Reverse(i)) = ready.pop() {
        done[i] = true;
        order.push(ids[i]);
        for &d in &deps[i] {
            dependents_left[d] -= 1;
            if dependents_left[d] == 0 {
                ready.push(Reverse(d));
            }
        }
    }

    order.extend(ids.iter().zip(&done).filter(|(_, d)| !**d).map(|(id, _)| *id));
    order
}
