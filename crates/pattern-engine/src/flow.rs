//! Flow messages
//!
//! Every edge crossing produces a message that travels from the source
//! node to the target node as `progress` goes from 0 to 1. Messages are
//! advanced by a fixed-cadence tick, independently of how fast traversal
//! moves, and are removed once they arrive.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{EdgeId, NodeId, NodeType, PatternEdge};

/// Progress within this distance of 1.0 counts as delivered
const DELIVERY_EPSILON: f64 = 1e-9;

/// What a message represents in agent terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    Query,
    Response,
    ToolCall,
    Observation,
    Message,
    Data,
    Error,
}

impl MessageKind {
    /// Classify the message crossing an edge from `source` to `target`
    pub fn for_edge(source: NodeType, target: NodeType, failed: bool) -> Self {
        if failed {
            return MessageKind::Error;
        }
        match (source, target) {
            (NodeType::Input, _) => MessageKind::Query,
            (_, NodeType::Tool) => MessageKind::ToolCall,
            (NodeType::Tool, _) => MessageKind::Observation,
            (_, NodeType::Output) => MessageKind::Response,
            (NodeType::Llm, _) | (NodeType::Evaluator, _) => MessageKind::Message,
            _ => MessageKind::Data,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MessageKind::Query => "Query",
            MessageKind::Response => "Response",
            MessageKind::ToolCall => "Tool Call",
            MessageKind::Observation => "Observation",
            MessageKind::Message => "Message",
            MessageKind::Data => "Data",
            MessageKind::Error => "Error",
        }
    }
}

/// Screen coordinates of an edge's ends, supplied by the rendering surface
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeEndpoints {
    pub source_x: f64,
    pub source_y: f64,
    pub target_x: f64,
    pub target_y: f64,
}

impl EdgeEndpoints {
    /// Point along the edge at the given progress
    pub fn interpolate(&self, progress: f64) -> (f64, f64) {
        let t = progress.clamp(0.0, 1.0);
        (
            self.source_x + (self.target_x - self.source_x) * t,
            self.source_y + (self.target_y - self.source_y) * t,
        )
    }
}

/// Edge geometry lookup provided by the rendering surface
///
/// The engine has no notion of layout; it only attaches whatever endpoints
/// the surface reports so markers can be drawn.
pub trait EdgeGeometry: Send + Sync {
    fn edge_endpoints(&self, edge_id: &str) -> Option<EdgeEndpoints>;
}

/// Geometry for surfaces that do not draw markers
pub struct NoGeometry;

impl EdgeGeometry for NoGeometry {
    fn edge_endpoints(&self, _edge_id: &str) -> Option<EdgeEndpoints> {
        None
    }
}

impl EdgeGeometry for HashMap<EdgeId, EdgeEndpoints> {
    fn edge_endpoints(&self, edge_id: &str) -> Option<EdgeEndpoints> {
        self.get(edge_id).copied()
    }
}

/// A message travelling along one edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowMessage {
    pub id: String,
    pub edge_id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub content: String,
    pub kind: MessageKind,
    /// In [0, 1]
    pub progress: f64,
    pub label: Option<String>,
    pub endpoints: Option<EdgeEndpoints>,
}

impl FlowMessage {
    /// Where to draw the marker, if the surface reported the edge's geometry
    pub fn position(&self) -> Option<(f64, f64)> {
        self.endpoints.map(|e| e.interpolate(self.progress))
    }

    pub fn is_delivered(&self) -> bool {
        self.progress >= 1.0
    }
}

/// Owner of the active message set
pub struct FlowEmitter {
    active: Vec<FlowMessage>,
    base_rate: f64,
    geometry: Arc<dyn EdgeGeometry>,
}

impl FlowEmitter {
    /// Create an emitter; `base_rate` is the progress added per tick at 1x
    pub fn new(base_rate: f64, geometry: Arc<dyn EdgeGeometry>) -> Self {
        Self {
            active: Vec::new(),
            base_rate,
            geometry,
        }
    }

    /// Start a message along an edge at progress 0
    pub fn emit(
        &mut self,
        edge: &PatternEdge,
        content: impl Into<String>,
        kind: MessageKind,
    ) -> FlowMessage {
        let message = FlowMessage {
            id: format!("msg-{}", uuid::Uuid::new_v4()),
            edge_id: edge.id.clone(),
            source: edge.source.clone(),
            target: edge.target.clone(),
            content: content.into(),
            kind,
            progress: 0.0,
            label: Some(kind.label().to_string()),
            endpoints: self.geometry.edge_endpoints(&edge.id),
        };
        self.active.push(message.clone());
        message
    }

    /// Advance every active message by one tick
    ///
    /// Returns the messages that arrived, already removed from the active
    /// set.
    pub fn tick(&mut self, speed: f64) -> Vec<FlowMessage> {
        let increment = self.base_rate * speed;
        for message in &mut self.active {
            let next = message.progress + increment;
            message.progress = if next >= 1.0 - DELIVERY_EPSILON { 1.0 } else { next };
        }

        let (delivered, in_flight): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(FlowMessage::is_delivered);
        self.active = in_flight;
        delivered
    }

    /// Messages currently in flight
    pub fn active(&self) -> &[FlowMessage] {
        &self.active
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }
}
