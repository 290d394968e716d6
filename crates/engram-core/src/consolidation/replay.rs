//! Replay association graph.
//!
//! A directed weighted graph over episode/memory ids. Nodes are plain
//! ids; edges carry association weights in [0, 1]. The collection owns
//! every edge.

use ordered_float::OrderedFloat;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One weighted association edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Association {
    /// Source id.
    pub from: String,
    /// Target id.
    pub to: String,
    /// Association weight in [0, 1].
    pub weight: f64,
}

/// Directed weighted association graph with id-based lookup.
#[derive(Default)]
pub struct AssociationGraph {
    graph: DiGraph<String, f64>,
    index: HashMap<String, NodeIndex>,
}

impl AssociationGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, id: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(id.to_string());
        self.index.insert(id.to_string(), idx);
        idx
    }

    /// Add or update an association. Weight is clamped to [0, 1]; when
    /// the edge already exists the stronger weight wins.
    pub fn associate(&mut self, from: &str, to: &str, weight: f64) {
        if from == to {
            return;
        }
        let weight = weight.clamp(0.0, 1.0);
        let a = self.node(from);
        let b = self.node(to);
        match self.graph.find_edge(a, b) {
            Some(edge) => {
                let current = self.graph[edge];
                if weight > current {
                    self.graph[edge] = weight;
                }
            }
            None => {
                self.graph.add_edge(a, b, weight);
            }
        }
    }

    /// Outgoing associations of an id, strongest first.
    pub fn associations_of(&self, id: &str) -> Vec<Association> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<Association> = self
            .graph
            .edges(idx)
            .map(|edge| Association {
                from: id.to_string(),
                to: self.graph[edge.target()].clone(),
                weight: *edge.weight(),
            })
            .collect();
        out.sort_by(|a, b| OrderedFloat(b.weight).cmp(&OrderedFloat(a.weight)));
        out
    }

    /// Every edge in the collection, for persistence.
    pub fn edges(&self) -> Vec<Association> {
        self.graph
            .edge_indices()
            .filter_map(|edge| {
                let (a, b) = self.graph.edge_endpoints(edge)?;
                Some(Association {
                    from: self.graph[a].clone(),
                    to: self.graph[b].clone(),
                    weight: self.graph[edge],
                })
            })
            .collect()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }
}
