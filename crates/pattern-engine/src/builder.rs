//! Fluent builder for pattern graphs
//!
//! Provides a compact API for constructing patterns programmatically, used
//! by the built-in catalogue and by tests.

use crate::types::{NodeType, PatternEdge, PatternGraph, PatternNode};

/// Fluent builder for constructing pattern graphs
///
/// # Example
///
/// ```ignore
/// let graph = PatternBuilder::new("chain", "Prompt Chaining")
///     .input("in", "User Input")
///     .node("draft", NodeType::Llm, "Draft")
///     .output("out", "Answer")
///     .edge("in", "draft")
///     .edge("draft", "out")
///     .build();
/// ```
pub struct PatternBuilder {
    id: String,
    name: String,
    description: String,
    nodes: Vec<PatternNode>,
    edges: Vec<PatternEdge>,
    edge_counter: usize,
}

impl PatternBuilder {
    /// Create a new pattern builder
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            edge_counter: 0,
        }
    }

    /// Set the pattern description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a node to the pattern
    pub fn node(
        mut self,
        id: impl Into<String>,
        node_type: NodeType,
        label: impl Into<String>,
    ) -> Self {
        self.nodes.push(PatternNode::new(id, node_type, label));
        self
    }

    /// Add the input node
    pub fn input(self, id: impl Into<String>, label: impl Into<String>) -> Self {
        self.node(id, NodeType::Input, label)
    }

    /// Add a language model node
    pub fn llm(self, id: impl Into<String>, label: impl Into<String>) -> Self {
        self.node(id, NodeType::Llm, label)
    }

    /// Add an output node
    pub fn output(self, id: impl Into<String>, label: impl Into<String>) -> Self {
        self.node(id, NodeType::Output, label)
    }

    /// Add an edge between two nodes (auto-generates edge ID)
    pub fn edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.edge_counter += 1;
        let id = format!("edge-{}", self.edge_counter);
        self.edges.push(PatternEdge::new(id, source, target));
        self
    }

    /// Add an edge with an explicit ID
    pub fn edge_with_id(
        mut self,
        edge_id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.edges.push(PatternEdge::new(edge_id, source, target));
        self
    }

    /// Chain the given nodes with edges, in order
    pub fn chain(mut self, node_ids: &[&str]) -> Self {
        for pair in node_ids.windows(2) {
            self = self.edge(pair[0], pair[1]);
        }
        self
    }

    /// Build the pattern without validation
    pub fn build(self) -> PatternGraph {
        let mut graph = PatternGraph::new(self.id, self.name);
        graph.description = self.description;
        graph.nodes = self.nodes;
        graph.edges = self.edges;
        graph
    }
}
