//! Pattern graph validation
//!
//! Checks that a pattern can be run before any session is created. Cycles
//! are legal (agent↔tool loops) and are not reported.

use std::collections::HashSet;

use crate::types::{NodeType, PatternGraph};

/// Validation error with location context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The pattern has no nodes at all
    EmptyGraph,
    /// No node of type `input`
    MissingInputNode,
    /// More than one node of type `input`
    MultipleInputNodes { node_ids: Vec<String> },
    /// Two nodes share an ID
    DuplicateNodeId { node_id: String },
    /// Two edges share an ID
    DuplicateEdgeId { edge_id: String },
    /// An edge references a non-existent node
    UnknownNode { edge_id: String, node_id: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyGraph => write!(f, "Pattern has no nodes"),
            Self::MissingInputNode => write!(f, "Pattern has no input node"),
            Self::MultipleInputNodes { node_ids } => {
                write!(f, "Pattern has multiple input nodes: {}", node_ids.join(", "))
            }
            Self::DuplicateNodeId { node_id } => {
                write!(f, "Node ID '{}' is used more than once", node_id)
            }
            Self::DuplicateEdgeId { edge_id } => {
                write!(f, "Edge ID '{}' is used more than once", edge_id)
            }
            Self::UnknownNode { edge_id, node_id } => {
                write!(f, "Edge '{}' references unknown node '{}'", edge_id, node_id)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a pattern graph
///
/// Returns all validation errors found (not just the first).
pub fn validate_pattern(graph: &PatternGraph) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if graph.nodes.is_empty() {
        errors.push(ValidationError::EmptyGraph);
        return errors;
    }

    validate_input_presence(graph, &mut errors);
    validate_unique_ids(graph, &mut errors);
    validate_unique_edge_ids(graph, &mut errors);
    validate_edge_references(graph, &mut errors);

    errors
}

/// Check that exactly one input node exists
fn validate_input_presence(graph: &PatternGraph, errors: &mut Vec<ValidationError>) {
    let inputs: Vec<String> = graph
        .nodes_of_type(NodeType::Input)
        .map(|n| n.id.clone())
        .collect();

    match inputs.len() {
        0 => errors.push(ValidationError::MissingInputNode),
        1 => {}
        _ => errors.push(ValidationError::MultipleInputNodes { node_ids: inputs }),
    }
}

/// Check that node IDs are unique
fn validate_unique_ids(graph: &PatternGraph, errors: &mut Vec<ValidationError>) {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut reported: HashSet<&str> = HashSet::new();

    for node in &graph.nodes {
        if !seen.insert(node.id.as_str()) && reported.insert(node.id.as_str()) {
            errors.push(ValidationError::DuplicateNodeId {
                node_id: node.id.clone(),
            });
        }
    }
}

/// Check that edge IDs are unique
fn validate_unique_edge_ids(graph: &PatternGraph, errors: &mut Vec<ValidationError>) {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut reported: HashSet<&str> = HashSet::new();

    for edge in &graph.edges {
        if !seen.insert(edge.id.as_str()) && reported.insert(edge.id.as_str()) {
            errors.push(ValidationError::DuplicateEdgeId {
                edge_id: edge.id.clone(),
            });
        }
    }
}

/// Check that all edge source/target nodes exist
fn validate_edge_references(graph: &PatternGraph, errors: &mut Vec<ValidationError>) {
    let node_ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();

    for edge in &graph.edges {
        if !node_ids.contains(edge.source.as_str()) {
            errors.push(ValidationError::UnknownNode {
                edge_id: edge.id.clone(),
                node_id: edge.source.clone(),
            });
        }
        if !node_ids.contains(edge.target.as_str()) {
            errors.push(ValidationError::UnknownNode {
                edge_id: edge.id.clone(),
                node_id: edge.target.clone(),
            });
        }
    }
}
