//! Dependency graph builder
//!
//! Edges are never authored directly: they are discovered by walking every
//! node's input tree for references (plus explicit `depends_on` entries).
//! An edge points from the dependency to the dependent.

use crate::error::{Error, Result};
use crate::node::ResourceNode;
use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Validated, acyclic set of resource declarations.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    graph: DiGraph<ResourceNode, ()>,
    index: HashMap<String, NodeIndex>,
}

/// Build a dependency graph from declarations.
///
/// Node indices follow declaration order, which is used as the tie-break
/// for every ordering the graph produces.
pub fn build(nodes: impl IntoIterator<Item = ResourceNode>) -> Result<Graph> {
    let mut graph = DiGraph::new();
    let mut index = HashMap::new();

    for node in nodes {
        if index.contains_key(&node.id) {
            return Err(Error::DuplicateNode(node.id));
        }
        let id = node.id.clone();
        let idx = graph.add_node(node);
        index.insert(id, idx);
    }

    let mut edges = Vec::new();
    for target in graph.node_indices() {
        let node = &graph[target];

        for reference in node.references() {
            let source = *index
                .get(&reference.node)
                .ok_or_else(|| Error::DanglingReference {
                    node: node.id.clone(),
                    source_id: reference.node.clone(),
                    key: reference.key.clone(),
                })?;
            if !graph[source].provides(&reference.key) {
                return Err(Error::DanglingReference {
                    node: node.id.clone(),
                    source_id: reference.node.clone(),
                    key: reference.key.clone(),
                });
            }
            edges.push((source, target));
        }

        for dep in &node.depends_on {
            let source = *index.get(dep).ok_or_else(|| Error::DanglingReference {
                node: node.id.clone(),
                source_id: dep.clone(),
                key: String::new(),
            })?;
            edges.push((source, target));
        }
    }

    for (source, target) in edges {
        // update_edge collapses duplicates
        graph.update_edge(source, target, ());
    }

    if let Err(cycle) = toposort(&graph, None) {
        return Err(Error::Cycle {
            nodes: cycle_members(&graph, cycle.node_id()),
        });
    }

    log::debug!(
        "built dependency graph: {} nodes, {} edges",
        graph.node_count(),
        graph.edge_count()
    );

    Ok(Graph { graph, index })
}

/// Ids of the strongly connected component containing `start`, in
/// declaration order.
fn cycle_members(graph: &DiGraph<ResourceNode, ()>, start: NodeIndex) -> Vec<String> {
    let mut members = tarjan_scc(graph)
        .into_iter()
        .find(|scc| scc.contains(&start))
        .unwrap_or_else(|| vec![start]);
    members.sort();
    members.into_iter().map(|i| graph[i].id.clone()).collect()
}

impl Graph {
    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&ResourceNode> {
        self.index.get(id).map(|&i| &self.graph[i])
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.graph.node_indices().map(|i| &self.graph[i])
    }

    /// Position of a node in declaration order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).map(|i| i.index())
    }

    /// Ids this node depends on, in declaration order.
    pub fn dependencies(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Ids depending on this node, in declaration order.
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<&str> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        found.sort();
        found.into_iter().map(|i| self.graph[i].id.as_str()).collect()
    }

    /// All `(dependency, dependent)` edges, ordered by dependent then dependency.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        let mut edges: Vec<(NodeIndex, NodeIndex)> = self
            .graph
            .edge_references()
            .map(|e| (e.source(), e.target()))
            .collect();
        edges.sort_by_key(|&(s, t)| (t, s));
        edges
            .into_iter()
            .map(|(s, t)| (self.graph[s].id.as_str(), self.graph[t].id.as_str()))
            .collect()
    }

    /// Every node after all of its dependencies; unconstrained nodes keep
    /// declaration order.
    pub fn topological_order(&self) -> Vec<&ResourceNode> {
        let mut remaining: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|i| {
                (
                    i,
                    self.graph.neighbors_directed(i, Direction::Incoming).count(),
                )
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<NodeIndex>> = remaining
            .iter()
            .filter(|&(_, &count)| count == 0)
            .map(|(&i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(&self.graph[idx]);
            for dependent in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(count) = remaining.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse(dependent));
                    }
                }
            }
        }
        order
    }

    /// Render the graph in Graphviz dot format.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph resources {\n    rankdir=LR;\n");
        for node in self.nodes() {
            out.push_str(&format!(
                "    \"{}\" [label=\"{}\\n{}\"];\n",
                node.id, node.id, node.resource_type
            ));
        }
        for (from, to) in self.edges() {
            out.push_str(&format!("    \"{from}\" -> \"{to}\";\n"));
        }
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::AttrValue;
    use std::collections::BTreeSet;

    fn secret_stack() -> Vec<ResourceNode> {
        vec![
            ResourceNode::new("secret", "core:data")
                .literal("secretId", "config")
                .output("id")
                .output("secretId"),
            ResourceNode::new("secret-version", "core:data")
                .input("secret", AttrValue::reference("secret", "id"))
                .literal("data", "{}"),
            ResourceNode::new("account", "core:data").literal("accountId", "docker"),
            ResourceNode::new("secret-access", "core:data")
                .input(
                    "member",
                    AttrValue::template("serviceAccount:${account.email}").unwrap(),
                )
                .input("secretId", AttrValue::reference("secret", "id")),
        ]
    }

    #[test]
    fn test_edges_match_references() {
        let nodes = secret_stack();
        let mut expected = BTreeSet::new();
        for node in &nodes {
            for r in node.references() {
                expected.insert((r.node.clone(), node.id.clone()));
            }
        }

        let graph = build(nodes).unwrap();
        let edges: BTreeSet<(String, String)> = graph
            .edges()
            .into_iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        assert_eq!(edges, expected);
        assert_eq!(graph.dependencies("secret-access"), vec!["secret", "account"]);
        assert_eq!(graph.dependents("secret"), vec!["secret-version", "secret-access"]);
    }

    #[test]
    fn test_duplicate_references_collapse() {
        let graph = build(vec![
            ResourceNode::new("a", "core:data"),
            ResourceNode::new("b", "core:data")
                .input("x", AttrValue::reference("a", "id"))
                .input("y", AttrValue::reference("a", "id"))
                .depends_on("a"),
        ])
        .unwrap();
        assert_eq!(graph.edges(), vec![("a", "b")]);
    }

    #[test]
    fn test_cycle_names_both_nodes() {
        let err = build(vec![
            ResourceNode::new("a", "core:data").input("x", AttrValue::reference("b", "out")),
            ResourceNode::new("b", "core:data").input("y", AttrValue::reference("a", "out")),
        ])
        .unwrap_err();

        match err {
            Error::Cycle { nodes } => assert_eq!(nodes, vec!["a", "b"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let err = build(vec![
            ResourceNode::new("a", "core:data").input("x", AttrValue::reference("a", "id")),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Cycle { nodes } if nodes == vec!["a"]));
    }

    #[test]
    fn test_dangling_reference() {
        let err = build(vec![
            ResourceNode::new("b", "core:data").input("x", AttrValue::reference("missing", "id")),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            Error::DanglingReference { ref source_id, .. } if source_id == "missing"
        ));
    }

    #[test]
    fn test_undeclared_output_key() {
        let err = build(vec![
            ResourceNode::new("secret", "core:data").output("id"),
            ResourceNode::new("v", "core:data").input("x", AttrValue::reference("secret", "email")),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::DanglingReference { ref key, .. } if key == "email"));
    }

    #[test]
    fn test_duplicate_node() {
        let err = build(vec![
            ResourceNode::new("a", "core:data"),
            ResourceNode::new("a", "random:string"),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateNode(id) if id == "a"));
    }

    #[test]
    fn test_topological_order_keeps_declaration_order() {
        let graph = build(vec![
            ResourceNode::new("service", "core:data")
                .input("sa", AttrValue::reference("account", "email")),
            ResourceNode::new("image", "core:data"),
            ResourceNode::new("account", "core:data"),
        ])
        .unwrap();

        let order: Vec<&str> = graph
            .topological_order()
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(order, vec!["image", "account", "service"]);
    }

    #[test]
    fn test_to_dot() {
        let graph = build(secret_stack()).unwrap();
        let dot = graph.to_dot();
        assert!(dot.starts_with("digraph resources {"));
        assert!(dot.contains("\"secret\" -> \"secret-version\";"));
    }
}
