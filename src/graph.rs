// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Dependency graph over the templates of a solution

use crate::error::{Result, SolutionError};
use crate::types::ItemTemplate;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;

/// Templates as nodes, edges pointing from a dependency to its dependent
pub struct DependencyGraph {
    /// The underlying directed graph
    graph: DiGraph<String, ()>,
    /// Map from source item id to node index
    node_indices: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Build the graph; dependencies outside `templates` are ignored
    #[must_use]
    pub fn from_templates(templates: &[ItemTemplate]) -> Self {
        let mut graph = DiGraph::new();
        let mut node_indices = HashMap::new();

        for template in templates {
            if !node_indices.contains_key(&template.item_id) {
                let idx = graph.add_node(template.item_id.clone());
                node_indices.insert(template.item_id.clone(), idx);
            }
        }

        for template in templates {
            let to_idx = node_indices[&template.item_id];
            for dependency in &template.dependencies {
                if let Some(&from_idx) = node_indices.get(dependency) {
                    if from_idx != to_idx && graph.find_edge(from_idx, to_idx).is_none() {
                        graph.add_edge(from_idx, to_idx, ());
                    }
                }
            }
        }

        Self { graph, node_indices }
    }

    /// Get node count
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get edge count
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Ids of templates that directly depend on `item_id`
    #[must_use]
    pub fn dependents_of(&self, item_id: &str) -> Vec<&str> {
        self.neighbors(item_id, Direction::Outgoing)
    }

    /// Ids of templates `item_id` directly depends on
    #[must_use]
    pub fn dependencies_of(&self, item_id: &str) -> Vec<&str> {
        self.neighbors(item_id, Direction::Incoming)
    }

    fn neighbors(&self, item_id: &str, direction: Direction) -> Vec<&str> {
        let Some(&idx) = self.node_indices.get(item_id) else {
            return Vec::new();
        };
        let mut ids: Vec<&str> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].as_str())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Every template after all of its dependencies
    pub fn deploy_order(&self) -> Result<Vec<String>> {
        toposort(&self.graph, None)
            .map(|order| order.into_iter().map(|n| self.graph[n].clone()).collect())
            .map_err(|cycle| SolutionError::CyclicDependency(self.graph[cycle.node_id()].clone()))
    }

    /// Templates grouped so each dependency sits in an earlier level.
    ///
    /// A template's level is the length of the longest dependency chain
    /// leading to it; members of one level never depend on each other.
    pub fn deploy_levels(&self) -> Result<Vec<Vec<String>>> {
        let order = toposort(&self.graph, None)
            .map_err(|cycle| SolutionError::CyclicDependency(self.graph[cycle.node_id()].clone()))?;

        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        for &node in &order {
            let level = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .filter_map(|parent| depth.get(&parent))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(node, level);
        }

        let count = depth.values().copied().max().map_or(0, |d| d + 1);
        let mut levels = vec![Vec::new(); count];
        for node in order {
            levels[depth[&node]].push(self.graph[node].clone());
        }
        for level in &mut levels {
            level.sort();
        }
        Ok(levels)
    }

    /// Export to DOT format for Graphviz
    #[must_use]
    pub fn to_dot(&self, templates: &[ItemTemplate]) -> String {
        let mut dot = String::from("digraph solution {\n");
        dot.push_str("  rankdir=LR;\n");
        dot.push_str("  node [shape=box, style=rounded];\n\n");

        for template in templates {
            let title = template
                .item
                .get("title")
                .and_then(serde_json::Value::as_str)
                .unwrap_or(&template.item_id)
                .replace('"', "'");
            dot.push_str(&format!(
                "  \"{}\" [label=\"{}\\n{}\"];\n",
                template.item_id, title, template.item_type
            ));
        }

        dot.push('\n');

        for edge in self.graph.raw_edges() {
            dot.push_str(&format!(
                "  \"{}\" -> \"{}\";\n",
                self.graph[edge.source()],
                self.graph[edge.target()]
            ));
        }

        dot.push_str("}\n");
        dot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_template(id: &str, deps: &[&str]) -> ItemTemplate {
        let mut t = ItemTemplate::initialize(&json!({"id": id, "type": "Web Map", "title": id}));
        for d in deps {
            t.add_dependency(d);
        }
        t
    }

    #[test]
    fn test_deploy_order_puts_dependencies_first() {
        let templates = vec![
            make_template("app", &["map"]),
            make_template("map", &["svc"]),
            make_template("svc", &[]),
        ];
        let graph = DependencyGraph::from_templates(&templates);
        let order = graph.deploy_order().unwrap();
        let pos = |id: &str| order.iter().position(|o| o == id).unwrap();

        assert!(pos("svc") < pos("map"));
        assert!(pos("map") < pos("app"));
    }

    #[test]
    fn test_external_dependencies_ignored() {
        let templates = vec![make_template("map", &["elsewhere"])];
        let graph = DependencyGraph::from_templates(&templates);
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.deploy_order().unwrap(), vec!["map".to_string()]);
    }

    #[test]
    fn test_cycle_detected() {
        let templates = vec![make_template("a", &["b"]), make_template("b", &["a"])];
        let graph = DependencyGraph::from_templates(&templates);
        assert!(matches!(graph.deploy_order(), Err(SolutionError::CyclicDependency(_))));
        assert!(graph.deploy_levels().is_err());
    }

    #[test]
    fn test_deploy_levels() {
        let templates = vec![
            make_template("dash", &["map", "svc"]),
            make_template("map", &["svc"]),
            make_template("svc", &[]),
            make_template("nb", &[]),
        ];
        let graph = DependencyGraph::from_templates(&templates);
        let levels = graph.deploy_levels().unwrap();
        assert_eq!(
            levels,
            vec![
                vec!["nb".to_string(), "svc".to_string()],
                vec!["map".to_string()],
                vec!["dash".to_string()],
            ]
        );
        assert_eq!(graph.dependents_of("svc"), vec!["dash", "map"]);
        assert_eq!(graph.dependencies_of("dash"), vec!["map", "svc"]);
    }

    #[test]
    fn test_to_dot() {
        let templates = vec![make_template("map", &["svc"]), make_template("svc", &[])];
        let dot = DependencyGraph::from_templates(&templates).to_dot(&templates);
        assert!(dot.contains("digraph solution"));
        assert!(dot.contains("\"svc\" -> \"map\""));
    }
}
