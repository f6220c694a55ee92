//! Step dependency graph
//!
//! Edges run from a dependency to the step that depends on it, so a
//! topological order is also a valid execution order.

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::planner::WorkflowStep;

/// A dependency cycle, reported as its member step ids in plan order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    pub steps: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StepGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
    missing: Vec<(String, String)>,
    duplicates: Vec<String>,
}

impl StepGraph {
    pub fn build(steps: &[WorkflowStep]) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let mut duplicates = Vec::new();

        for step in steps {
            if index.contains_key(&step.id) {
                duplicates.push(step.id.clone());
                continue;
            }
            let node = graph.add_node(step.id.clone());
            index.insert(step.id.clone(), node);
        }

        let mut missing = Vec::new();
        let mut seen = HashSet::new();
        for step in steps {
            // Edges of a duplicated id are taken from its first declaration only
            if !seen.insert(step.id.as_str()) {
                continue;
            }
            let to = index[&step.id];
            for dep in &step.depends_on {
                match index.get(dep) {
                    Some(&from) => {
                        graph.update_edge(from, to, ());
                    }
                    None => missing.push((step.id.clone(), dep.clone())),
                }
            }
        }

        Self {
            graph,
            index,
            missing,
            duplicates,
        }
    }

    /// `(step, dependency)` pairs naming undeclared steps
    pub fn missing_dependencies(&self) -> &[(String, String)] {
        &self.missing
    }

    pub fn duplicate_ids(&self) -> &[String] {
        &self.duplicates
    }

    pub fn topological_order(&self) -> Result<Vec<String>, Cycle> {
        toposort(&self.graph, None)
            .map(|order| order.into_iter().map(|n| self.graph[n].clone()).collect())
            .map_err(|_| Cycle {
                steps: self.cycle_members(),
            })
    }

    pub fn has_cycle(&self) -> bool {
        self.topological_order().is_err()
    }

    /// Steps taking part in any cycle, self-dependencies included
    pub fn cycle_members(&self) -> Vec<String> {
        let mut members: Vec<NodeIndex> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&n| self.graph.contains_edge(n, n))
            })
            .flatten()
            .collect();
        members.sort();
        members.into_iter().map(|n| self.graph[n].clone()).collect()
    }

    /// Every step `step_id` depends on, directly or transitively
    pub fn ancestors(&self, step_id: &str) -> BTreeSet<String> {
        let Some(&start) = self.index.get(step_id) else {
            return BTreeSet::new();
        };

        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, start);
        let mut ancestors = BTreeSet::new();
        while let Some(node) = dfs.next(reversed) {
            if node != start {
                ancestors.insert(self.graph[node].clone());
            }
        }
        ancestors
    }

    /// Every step that depends on `step_id`, directly or transitively
    pub fn dependents(&self, step_id: &str) -> BTreeSet<String> {
        let Some(&start) = self.index.get(step_id) else {
            return BTreeSet::new();
        };

        let mut dfs = Dfs::new(&self.graph, start);
        let mut dependents = BTreeSet::new();
        while let Some(node) = dfs.next(&self.graph) {
            if node != start {
                dependents.insert(self.graph[node].clone());
            }
        }
        dependents
    }

    /// Batches of steps whose members can run together once all earlier
    /// batches are done. Members keep plan order.
    pub fn ready_sets(&self) -> Result<Vec<Vec<String>>, Cycle> {
        if self.has_cycle() {
            return Err(Cycle {
                steps: self.cycle_members(),
            });
        }

        let mut remaining: Vec<NodeIndex> = self.graph.node_indices().collect();
        let mut done: HashSet<NodeIndex> = HashSet::new();
        let mut batches = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|&n| {
                self.graph
                    .neighbors_directed(n, petgraph::Direction::Incoming)
                    .all(|dep| done.contains(&dep))
            });
            done.extend(ready.iter().copied());
            batches.push(ready.into_iter().map(|n| self.graph[n].clone()).collect());
            remaining = blocked;
        }

        Ok(batches)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Arguments, RiskTier};

    fn step(id: &str, deps: &[&str]) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            description: String::new(),
            operation_name: "search_workbooks".to_string(),
            arguments: Arguments::new(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            risk_tier: RiskTier::Low,
            destructive: false,
            rollback_operation: None,
        }
    }

    #[test]
    fn test_topological_order_respects_dependencies() {
        let steps = vec![step("c", &["b"]), step("a", &[]), step("b", &["a"])];
        let order = StepGraph::build(&steps).topological_order().unwrap();
        let pos = |id: &str| order.iter().position(|s| s == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn test_cycle_is_reported_with_members() {
        let steps = vec![step("a", &["c"]), step("b", &["a"]), step("c", &["b"]), step("d", &[])];
        let graph = StepGraph::build(&steps);
        let cycle = graph.topological_order().unwrap_err();
        assert_eq!(cycle.steps, vec!["a", "b", "c"]);
        assert!(graph.ready_sets().is_err());
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let graph = StepGraph::build(&[step("a", &["a"])]);
        assert!(graph.has_cycle());
        assert_eq!(graph.cycle_members(), vec!["a"]);
    }

    #[test]
    fn test_missing_and_duplicate_ids() {
        let steps = vec![step("a", &["ghost"]), step("a", &[]), step("b", &["a"])];
        let graph = StepGraph::build(&steps);
        assert_eq!(
            graph.missing_dependencies(),
            &[("a".to_string(), "ghost".to_string())]
        );
        assert_eq!(graph.duplicate_ids(), &["a".to_string()]);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_ancestors_are_transitive() {
        let steps = vec![
            step("analyze", &[]),
            step("confirm", &["analyze"]),
            step("archive", &["confirm"]),
            step("other", &[]),
        ];
        let graph = StepGraph::build(&steps);
        let ancestors = graph.ancestors("archive");
        assert_eq!(
            ancestors.into_iter().collect::<Vec<_>>(),
            vec!["analyze", "confirm"]
        );
        assert!(graph.ancestors("analyze").is_empty());
        assert_eq!(
            graph.dependents("analyze").into_iter().collect::<Vec<_>>(),
            vec!["archive", "confirm"]
        );
    }

    #[test]
    fn test_ready_sets_group_independent_steps() {
        let steps = vec![
            step("a", &[]),
            step("b", &[]),
            step("c", &["a", "b"]),
            step("d", &["a"]),
        ];
        let batches = StepGraph::build(&steps).ready_sets().unwrap();
        assert_eq!(
            batches,
            vec![vec!["a", "b"], vec!["c", "d"]]
                .into_iter()
                .map(|b| b.into_iter().map(String::from).collect::<Vec<_>>())
                .collect::<Vec<_>>()
        );
    }
}
