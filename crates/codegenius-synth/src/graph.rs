//! Topological ordering of the planned file graph with deterministic
//! cycle-breaking. Mutual dependencies between files are common in real
//! codebases, so a cycle downgrades to a warning instead of failing the
//! session.

use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use codegenius_core::FileNode;

pub struct TopoOrder {
    /// File paths in generation order: every dependency precedes its
    /// dependents.
    pub order: Vec<String>,
    /// `(source, target)` dependency edges dropped to break cycles.
    pub broken_edges: Vec<(String, String)>,
}

pub fn topological_order(nodes: &[FileNode]) -> TopoOrder {
    let known: BTreeSet<&str> = nodes.iter().map(|n| n.path.as_str()).collect();

    // remaining dependency edges per node; edges to unknown paths are not
    // ordering constraints
    let mut pending: BTreeMap<String, BTreeSet<String>> = nodes
        .iter()
        .map(|node| {
            let deps: BTreeSet<String> = node
                .depends_on
                .iter()
                .filter(|dep| known.contains(dep.as_str()))
                .cloned()
                .collect();
            (node.path.clone(), deps)
        })
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    let mut broken_edges = Vec::new();

    while !pending.is_empty() {
        let ready: Vec<String> = pending
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(path, _)| path.clone())
            .collect();

        if ready.is_empty() {
            // stalled on a cycle: drop the lexicographically largest
            // (source, target) edge among the remaining nodes and resume
            let (source, target) = pending
                .iter()
                .flat_map(|(path, deps)| deps.iter().map(move |dep| (path.clone(), dep.clone())))
                .max()
                .expect("stalled graph must have at least one remaining edge");
            warn!(from = %source, to = %target, "breaking dependency cycle");
            if let Some(deps) = pending.get_mut(&source) {
                deps.remove(&target);
            }
            broken_edges.push((source, target));
            continue;
        }

        // BTreeMap iteration makes `ready` lexicographic, so the full order
        // is deterministic
        for path in ready {
            pending.remove(&path);
            for deps in pending.values_mut() {
                deps.remove(&path);
            }
            order.push(path);
        }
    }

    TopoOrder { order, broken_edges }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn node(path: &str, deps: &[&str]) -> FileNode {
        FileNode {
            path: path.into(),
            responsibility: format!("content of {}", path),
            declared_exports: BTreeSet::new(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn position(order: &[String], path: &str) -> usize {
        order.iter().position(|p| p == path).unwrap()
    }

    #[test]
    fn dependencies_precede_dependents() {
        let nodes = vec![
            node("c.py", &["b.py"]),
            node("b.py", &["a.py"]),
            node("a.py", &[]),
        ];
        let topo = topological_order(&nodes);
        assert!(topo.broken_edges.is_empty());
        assert!(position(&topo.order, "a.py") < position(&topo.order, "b.py"));
        assert!(position(&topo.order, "b.py") < position(&topo.order, "c.py"));
    }

    #[test]
    fn two_node_cycle_drops_exactly_one_edge() {
        let nodes = vec![node("a.py", &["b.py"]), node("b.py", &["a.py"])];
        let topo = topological_order(&nodes);
        assert_eq!(topo.order.len(), 2);
        // the lexicographically largest (source, target) pair goes
        assert_eq!(topo.broken_edges, vec![("b.py".to_string(), "a.py".to_string())]);
        assert!(position(&topo.order, "b.py") < position(&topo.order, "a.py"));
    }

    #[test]
    fn unknown_dependencies_are_not_constraints() {
        let nodes = vec![node("a.py", &["vendored/lib.py"])];
        let topo = topological_order(&nodes);
        assert_eq!(topo.order, vec!["a.py".to_string()]);
        assert!(topo.broken_edges.is_empty());
    }

    #[test]
    fn nested_cycles_all_get_broken() {
        let nodes = vec![
            node("a.py", &["b.py"]),
            node("b.py", &["a.py"]),
            node("c.py", &["d.py"]),
            node("d.py", &["c.py"]),
        ];
        let topo = topological_order(&nodes);
        assert_eq!(topo.order.len(), 4);
        assert_eq!(topo.broken_edges.len(), 2);
    }

    #[test]
    fn order_is_deterministic() {
        let nodes = vec![
            node("x.py", &[]),
            node("m.py", &[]),
            node("a.py", &[]),
        ];
        let topo = topological_order(&nodes);
        assert_eq!(topo.order, vec!["a.py", "m.py", "x.py"]);
    }
}
