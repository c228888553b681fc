//! Core types for pattern graphs
//!
//! These types describe the static structure of an agent pattern (nodes,
//! edges) and the per-run state the engine tracks for each node.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Unique identifier for a node
pub type NodeId = String;

/// Unique identifier for an edge
pub type EdgeId = String;

/// The role a node plays in an agent pattern
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Entry point receiving the user's input (exactly one per pattern)
    Input,
    /// Language model call
    Llm,
    /// Tool invocation
    Tool,
    /// Routing decision (the only node type that can fail on its own)
    Router,
    /// Combines the results of several branches
    Aggregator,
    /// Breaks a task into steps
    Planner,
    /// Carries out planned steps
    Executor,
    /// Judges an intermediate result
    Evaluator,
    /// Final answer returned to the user
    Output,
    /// Anything else
    #[default]
    Default,
}

impl NodeType {
    /// Get a human-readable label for this node type
    pub fn label(&self) -> &'static str {
        match self {
            NodeType::Input => "Input",
            NodeType::Llm => "LLM",
            NodeType::Tool => "Tool",
            NodeType::Router => "Router",
            NodeType::Aggregator => "Aggregator",
            NodeType::Planner => "Planner",
            NodeType::Executor => "Executor",
            NodeType::Evaluator => "Evaluator",
            NodeType::Output => "Output",
            NodeType::Default => "Step",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A node in a pattern graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternNode {
    /// Unique identifier for this node
    pub id: NodeId,
    /// Role of this node in the pattern
    #[serde(rename = "type", default)]
    pub node_type: NodeType,
    /// Label shown on the diagram
    pub label: String,
}

impl PatternNode {
    /// Create a new node
    pub fn new(id: impl Into<String>, node_type: NodeType, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type,
            label: label.into(),
        }
    }

    /// Whether this node handles failures of its upstream node
    ///
    /// A node is a failure handler when its label mentions "fail",
    /// case-insensitively ("Failure Handler", "On Fail", "FAILSAFE").
    pub fn is_failure_handler(&self) -> bool {
        self.label.to_lowercase().contains("fail")
    }
}

/// A directed edge between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternEdge {
    /// Unique identifier for this edge
    pub id: EdgeId,
    /// Source node ID
    pub source: NodeId,
    /// Target node ID
    pub target: NodeId,
}

impl PatternEdge {
    /// Create a new edge
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
        }
    }
}

/// A complete pattern graph
///
/// Edges keep their declaration order; traversal visits the outgoing edges
/// of a node in that order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternGraph {
    /// Unique identifier for this pattern
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// What the pattern demonstrates
    #[serde(default)]
    pub description: String,
    /// Nodes in the pattern
    pub nodes: Vec<PatternNode>,
    /// Edges connecting nodes
    pub edges: Vec<PatternEdge>,
}

impl PatternGraph {
    /// Create a new empty pattern
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Parse a pattern from its JSON representation
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Find a node by ID
    pub fn find_node(&self, id: &str) -> Option<&PatternNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Find an edge by ID
    pub fn find_edge(&self, id: &str) -> Option<&PatternEdge> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// Find the node where runs begin
    pub fn find_input_node(&self) -> Option<&PatternNode> {
        self.nodes.iter().find(|n| n.node_type == NodeType::Input)
    }

    /// Get all nodes of a given type
    pub fn nodes_of_type(&self, node_type: NodeType) -> impl Iterator<Item = &PatternNode> {
        self.nodes.iter().filter(move |n| n.node_type == node_type)
    }

    /// Get edges going out of a node, in declaration order
    pub fn outgoing_edges<'a>(
        &'a self,
        node_id: &'a str,
    ) -> impl Iterator<Item = &'a PatternEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// Get edges coming into a node
    pub fn incoming_edges<'a>(
        &'a self,
        node_id: &'a str,
    ) -> impl Iterator<Item = &'a PatternEdge> + 'a {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    /// Whether an edge leads into a failure handler
    pub fn leads_to_failure_handler(&self, edge: &PatternEdge) -> bool {
        self.find_node(&edge.target)
            .is_some_and(PatternNode::is_failure_handler)
    }
}

/// Status of a node within one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Idle,
    Running,
    Complete,
    Failed,
}

/// Mutable per-run state of a single node
///
/// Timestamps are offsets from the moment the run started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRunState {
    pub status: NodeStatus,
    pub result: Option<String>,
    pub started_at: Option<Duration>,
    pub ended_at: Option<Duration>,
}

/// How suspension points at edge crossings resolve
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Resume after a speed-scaled delay
    #[default]
    Auto,
    /// Resume only when the user advances
    Step,
}

/// Playback speed multiplier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum SpeedFactor {
    /// 0.5x
    Half,
    /// 1x
    #[default]
    Normal,
    /// 2x
    Double,
}

impl SpeedFactor {
    /// The multiplier applied to rates (delays are divided by it)
    pub fn as_f64(&self) -> f64 {
        match self {
            SpeedFactor::Half => 0.5,
            SpeedFactor::Normal => 1.0,
            SpeedFactor::Double => 2.0,
        }
    }

    /// Scale a base delay to this speed
    pub fn scale(&self, base: Duration) -> Duration {
        base.div_f64(self.as_f64())
    }
}

impl From<SpeedFactor> for f64 {
    fn from(speed: SpeedFactor) -> Self {
        speed.as_f64()
    }
}

impl TryFrom<f64> for SpeedFactor {
    type Error = EngineError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if value == 0.5 {
            Ok(SpeedFactor::Half)
        } else if value == 1.0 {
            Ok(SpeedFactor::Normal)
        } else if value == 2.0 {
            Ok(SpeedFactor::Double)
        } else {
            Err(EngineError::InvalidSpeed(value))
        }
    }
}

impl fmt::Display for SpeedFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.as_f64())
    }
}
