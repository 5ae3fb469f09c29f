//! Core types for apply runs

use crate::error::ErrorCategory;
use crate::node::NodeStatus;
use crate::planner::OperationKind;
use crate::provider::{Inputs, Outputs};
use crate::retry::RetryConfig;
use crate::value::{AttrValue, Reference, ResolveError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Outcome of one plan operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationReport {
    pub node_id: String,
    pub resource_type: String,
    /// Kind as executed (a no-op whose inputs moved runs as an update)
    pub kind: OperationKind,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Category of the provider error, when one caused the failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
    /// Node whose failure prevented this operation from running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
    /// Provider calls made, including retries
    pub attempts: u32,
    /// Inputs handed to the provider, once resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_inputs: Option<Inputs>,
}

impl OperationReport {
    pub(crate) fn new(
        node_id: &str,
        resource_type: &str,
        kind: OperationKind,
        status: NodeStatus,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            resource_type: resource_type.to_string(),
            kind,
            status,
            error: None,
            category: None,
            blocked_by: None,
            attempts: 0,
            resolved_inputs: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == NodeStatus::Applied
    }

    /// Failed because something it depends on failed
    pub fn is_blocked(&self) -> bool {
        self.blocked_by.is_some()
    }

    /// Whether a provider call changed something
    pub fn is_change(&self) -> bool {
        self.is_success() && self.kind.is_change()
    }
}

/// A failed operation together with the operations it prevented
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureChain {
    pub origin: String,
    pub error: String,
    pub blocked: Vec<String>,
}

/// Result of applying a plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyResult {
    /// One report per plan operation, in plan order
    pub operations: Vec<OperationReport>,
    /// Outputs of every node applied in this run, including no-ops
    pub outputs: BTreeMap<String, Outputs>,
}

impl ApplyResult {
    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for report in &self.operations {
            summary.add_report(report);
        }
        summary
    }

    pub fn is_success(&self) -> bool {
        self.operations.iter().all(OperationReport::is_success)
    }

    /// Last report for a node; a replacement's create wins over its delete.
    pub fn report(&self, node_id: &str) -> Option<&OperationReport> {
        self.operations.iter().rev().find(|r| r.node_id == node_id)
    }

    pub fn status(&self, node_id: &str) -> Option<NodeStatus> {
        self.report(node_id).map(|r| r.status)
    }

    pub fn outputs_of(&self, node_id: &str) -> Option<&Outputs> {
        self.outputs.get(node_id)
    }

    pub fn resolved_inputs(&self, node_id: &str) -> Option<&Inputs> {
        self.report(node_id)?.resolved_inputs.as_ref()
    }

    /// Group failures by the operation that caused them.
    pub fn failures(&self) -> Vec<FailureChain> {
        let mut chains: Vec<FailureChain> = self
            .operations
            .iter()
            .filter(|r| r.status == NodeStatus::Failed && !r.is_blocked())
            .map(|r| FailureChain {
                origin: r.node_id.clone(),
                error: r.error.clone().unwrap_or_default(),
                blocked: Vec::new(),
            })
            .collect();

        for report in &self.operations {
            let Some(origin) = &report.blocked_by else {
                continue;
            };
            if let Some(chain) = chains.iter_mut().find(|c| &c.origin == origin) {
                chain.blocked.push(report.node_id.clone());
            }
        }
        chains
    }

    /// Resolve a value against the outputs of this run.
    pub fn resolve(&self, value: &AttrValue) -> Result<Value, ResolveError> {
        value.resolve(&|r: &Reference| self.outputs.get(&r.node)?.get(&r.key).cloned())
    }

    /// Resolve stack exports; unresolvable ones are left out.
    pub fn exports(&self, exports: &BTreeMap<String, AttrValue>) -> BTreeMap<String, Value> {
        exports
            .iter()
            .filter_map(|(name, value)| match self.resolve(value) {
                Ok(v) => Some((name.clone(), v)),
                Err(e) => {
                    log::debug!("export {name} not available: {e:?}");
                    None
                }
            })
            .collect()
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    /// Failed on their own
    pub failed: usize,
    /// Failed because a dependency failed
    pub blocked: usize,
    pub cancelled: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    /// Check if execution was fully successful
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.blocked == 0 && self.cancelled == 0
    }

    /// Total number of operations reported
    pub fn total(&self) -> usize {
        self.total_changes() + self.unchanged + self.failed + self.blocked + self.cancelled
    }

    /// Add a report to the summary
    pub fn add_report(&mut self, report: &OperationReport) {
        match report.status {
            NodeStatus::Applied => match report.kind {
                OperationKind::Create => self.created += 1,
                OperationKind::Update => self.updated += 1,
                OperationKind::Delete => self.deleted += 1,
                OperationKind::NoOp => self.unchanged += 1,
            },
            NodeStatus::Failed if report.is_blocked() => self.blocked += 1,
            NodeStatus::Failed => self.failed += 1,
            NodeStatus::Cancelled => self.cancelled += 1,
            NodeStatus::Pending | NodeStatus::Planned | NodeStatus::Applying => {}
        }
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Compute and report the plan without applying it
    pub dry_run: bool,
    /// Maximum number of provider calls in flight
    pub parallelism: usize,
    /// Backoff policy for retryable provider errors
    pub retry: RetryConfig,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            parallelism: 4,
            retry: RetryConfig::default(),
        }
    }
}
