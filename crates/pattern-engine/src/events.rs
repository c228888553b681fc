//! Event types for streaming simulation progress
//!
//! Events are sent from the engine to the rendering surface (or any other
//! consumer) as node statuses change and messages travel along edges.
//! They carry the same information as [`crate::RunSnapshot`]s, as discrete
//! transitions.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::flow::MessageKind;
use crate::types::{ExecutionMode, NodeId};

/// Trait for sending simulation events
///
/// This abstracts over the transport mechanism (mpsc channel, UI bridge,
/// test collector). Events are sent from the session's tasks after the
/// session lock is released, so a sink may take snapshots but should not
/// block.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: SimulationEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted during a simulated run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SimulationEvent {
    /// A run started
    #[serde(rename_all = "camelCase")]
    RunStarted {
        run_id: String,
        pattern_id: String,
        mode: ExecutionMode,
    },

    /// A node became Running
    #[serde(rename_all = "camelCase")]
    NodeStarted {
        run_id: String,
        node_id: NodeId,
        iteration: u32,
    },

    /// A node completed
    #[serde(rename_all = "camelCase")]
    NodeCompleted {
        run_id: String,
        node_id: NodeId,
        result: String,
    },

    /// A node failed
    #[serde(rename_all = "camelCase")]
    NodeFailed {
        run_id: String,
        node_id: NodeId,
        error: String,
    },

    /// A failed node handed control to a failure handler
    #[serde(rename_all = "camelCase")]
    Rerouted {
        run_id: String,
        from_node: NodeId,
        to_node: NodeId,
    },

    /// A message started travelling along an edge
    #[serde(rename_all = "camelCase")]
    MessageEmitted {
        run_id: String,
        message_id: String,
        edge_id: String,
        kind: MessageKind,
    },

    /// A message reached its target node
    #[serde(rename_all = "camelCase")]
    MessageDelivered {
        run_id: String,
        message_id: String,
        target: NodeId,
    },

    /// Traversal is suspended at an edge until the user advances
    #[serde(rename_all = "camelCase")]
    AwaitingStep { run_id: String, edge_id: String },

    /// The run finished successfully
    #[serde(rename_all = "camelCase")]
    RunCompleted {
        run_id: String,
        output: String,
        iterations: u32,
    },

    /// The run was aborted by a run-level error
    #[serde(rename_all = "camelCase")]
    RunFailed {
        run_id: String,
        error: String,
        iterations: u32,
    },

    /// The session was wiped
    #[serde(rename_all = "camelCase")]
    RunReset { run_id: String },
}

impl SimulationEvent {
    /// The run this event belongs to
    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::NodeStarted { run_id, .. }
            | Self::NodeCompleted { run_id, .. }
            | Self::NodeFailed { run_id, .. }
            | Self::Rerouted { run_id, .. }
            | Self::MessageEmitted { run_id, .. }
            | Self::MessageDelivered { run_id, .. }
            | Self::AwaitingStep { run_id, .. }
            | Self::RunCompleted { run_id, .. }
            | Self::RunFailed { run_id, .. }
            | Self::RunReset { run_id } => run_id,
        }
    }

    /// Whether this event ends a run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RunCompleted { .. } | Self::RunFailed { .. } | Self::RunReset { .. }
        )
    }
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: SimulationEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: parking_lot::Mutex<Vec<SimulationEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<SimulationEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: SimulationEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// An event sink that forwards events into an unbounded tokio channel
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<SimulationEvent>,
}

impl ChannelEventSink {
    /// Create a sink and the receiver that drains it
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SimulationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: SimulationEvent) -> Result<(), EventError> {
        self.tx.send(event).map_err(|_| EventError::channel_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(node_id: &str) -> SimulationEvent {
        SimulationEvent::NodeStarted {
            run_id: "run1".to_string(),
            node_id: node_id.to_string(),
            iteration: 1,
        }
    }

    #[test]
    fn test_vec_event_sink() {
        let sink = VecEventSink::new();
        sink.send(started("input")).unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            SimulationEvent::NodeStarted { node_id, iteration, .. } => {
                assert_eq!(node_id, "input");
                assert_eq!(*iteration, 1);
            }
            _ => panic!("Expected NodeStarted event"),
        }

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_null_event_sink() {
        let sink = NullEventSink;
        // Should not panic
        sink.send(started("input")).unwrap();
    }

    #[tokio::test]
    async fn test_channel_event_sink() {
        let (sink, mut rx) = ChannelEventSink::new();
        sink.send(started("llm")).unwrap();
        assert_eq!(rx.recv().await, Some(started("llm")));

        drop(rx);
        assert!(sink.send(started("llm")).is_err());
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = SimulationEvent::MessageEmitted {
            run_id: "r".to_string(),
            message_id: "m".to_string(),
            edge_id: "e1".to_string(),
            kind: MessageKind::ToolCall,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "messageEmitted");
        assert_eq!(json["edgeId"], "e1");
        assert_eq!(json["kind"], "toolCall");
        assert_eq!(event.run_id(), "r");
        assert!(!event.is_terminal());
    }
}
