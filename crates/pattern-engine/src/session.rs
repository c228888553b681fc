//! Run session state
//!
//! A [`RunSession`] is everything one run mutates: node states, in-flight
//! messages, the iteration counter and the outcome. It lives in a
//! [`SessionCell`] shared by the controller and the session's tasks. Every
//! mutation names the generation it belongs to and is discarded when that
//! generation is no longer current, so work from a reset run can never leak
//! into the next one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::RunError;
use crate::events::{EventSink, SimulationEvent};
use crate::flow::{FlowEmitter, FlowMessage, MessageKind};
use crate::scheduler::Cancelled;
use crate::types::{
    ExecutionMode, NodeId, NodeRunState, NodeStatus, NodeType, PatternEdge, PatternGraph,
    SpeedFactor,
};

/// How a run ended, if it has
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum RunOutcome {
    /// No run has been started since the last reset
    #[default]
    Idle,
    /// Traversal is still in progress
    Running,
    /// An output node was reached; `output` is the latest one's result
    Completed { output: String },
    /// The run was aborted
    Failed { error: RunError },
}

impl RunOutcome {
    /// Whether the run has finished, successfully or not
    pub fn is_finished(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. } | RunOutcome::Failed { .. })
    }
}

/// Per-node view included in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub node_id: NodeId,
    pub label: String,
    pub node_type: NodeType,
    pub state: NodeRunState,
}

/// Read-only copy of everything a rendering surface needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub run_id: Option<String>,
    pub pattern_id: String,
    /// In pattern declaration order
    pub nodes: Vec<NodeSnapshot>,
    pub messages: Vec<FlowMessage>,
    pub iteration_count: u32,
    pub outcome: RunOutcome,
    pub mode: ExecutionMode,
    pub speed: SpeedFactor,
    pub paused: bool,
    /// Traversal is blocked until the user advances
    pub awaiting_step: bool,
    /// Edge the next advance will cross
    pub next_step_edge: Option<String>,
}

impl RunSnapshot {
    pub fn node(&self, node_id: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    /// Status of a node; unknown nodes read as idle
    pub fn status(&self, node_id: &str) -> NodeStatus {
        self.node(node_id)
            .map(|n| n.state.status)
            .unwrap_or_default()
    }

    pub fn final_output(&self) -> Option<&str> {
        match &self.outcome {
            RunOutcome::Completed { output } => Some(output),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&RunError> {
        match &self.outcome {
            RunOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// Nodes currently in the given status
    pub fn nodes_with_status(&self, status: NodeStatus) -> impl Iterator<Item = &NodeSnapshot> {
        self.nodes.iter().filter(move |n| n.state.status == status)
    }
}

/// Mutable state of one run
pub(crate) struct RunSession {
    run_id: Option<String>,
    generation: u64,
    graph: Arc<PatternGraph>,
    states: HashMap<NodeId, NodeRunState>,
    flow: FlowEmitter,
    iteration_count: u32,
    outcome: RunOutcome,
    started_at: Option<Instant>,
    final_output: Option<String>,
}

impl RunSession {
    /// A session with no run, shown after construction and reset
    pub(crate) fn idle(generation: u64, graph: Arc<PatternGraph>, flow: FlowEmitter) -> Self {
        Self {
            run_id: None,
            generation,
            graph,
            states: HashMap::new(),
            flow,
            iteration_count: 0,
            outcome: RunOutcome::Idle,
            started_at: None,
            final_output: None,
        }
    }

    /// A fresh run with every node idle
    pub(crate) fn running(
        run_id: String,
        generation: u64,
        graph: Arc<PatternGraph>,
        flow: FlowEmitter,
    ) -> Self {
        Self {
            run_id: Some(run_id),
            outcome: RunOutcome::Running,
            started_at: Some(Instant::now()),
            ..Self::idle(generation, graph, flow)
        }
    }

    fn run_id(&self) -> String {
        self.run_id.clone().unwrap_or_default()
    }

    fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    fn state_mut(&mut self, node_id: &str) -> &mut NodeRunState {
        self.states.entry(node_id.to_string()).or_default()
    }
}

/// Shared home of the live session
pub(crate) struct SessionCell {
    session: Mutex<RunSession>,
    revision: watch::Sender<u64>,
    events: Arc<dyn EventSink>,
}

impl SessionCell {
    pub(crate) fn new(session: RunSession, events: Arc<dyn EventSink>) -> Self {
        Self {
            session: Mutex::new(session),
            revision: watch::Sender::new(0),
            events,
        }
    }

    /// Handle for tasks working on behalf of the given generation
    pub(crate) fn handle(self: &Arc<Self>, generation: u64) -> SessionHandle {
        SessionHandle {
            cell: self.clone(),
            generation,
        }
    }

    /// Install a new session
    ///
    /// Returns the run id of the session it replaced, if that was a run.
    pub(crate) fn replace(&self, session: RunSession) -> Option<String> {
        let previous = std::mem::replace(&mut *self.session.lock(), session).run_id;
        self.revision.send_modify(|revision| *revision += 1);
        previous
    }

    /// Send a lifecycle event that is not tied to a generation check
    pub(crate) fn announce(&self, event: SimulationEvent) {
        self.publish(vec![event]);
    }

    /// Wake subscribers after a change outside the session (mode, speed,
    /// pause)
    pub(crate) fn touch(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.session.lock().outcome == RunOutcome::Running
    }

    pub(crate) fn outcome(&self) -> RunOutcome {
        self.session.lock().outcome.clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Copy the session into a snapshot, together with scheduler state read
    /// by the caller
    pub(crate) fn snapshot(
        &self,
        mode: ExecutionMode,
        speed: SpeedFactor,
        paused: bool,
        next_step_edge: Option<String>,
    ) -> RunSnapshot {
        let session = self.session.lock();
        let nodes = session
            .graph
            .nodes
            .iter()
            .map(|node| NodeSnapshot {
                node_id: node.id.clone(),
                label: node.label.clone(),
                node_type: node.node_type,
                state: session.states.get(&node.id).cloned().unwrap_or_default(),
            })
            .collect();

        RunSnapshot {
            run_id: session.run_id.clone(),
            pattern_id: session.graph.id.clone(),
            nodes,
            messages: session.flow.active().to_vec(),
            iteration_count: session.iteration_count,
            outcome: session.outcome.clone(),
            mode,
            speed,
            paused,
            awaiting_step: next_step_edge.is_some(),
            next_step_edge,
        }
    }

    /// Apply a mutation if `generation` is still current
    ///
    /// Events are collected under the lock and sent after it is released.
    fn mutate<R>(
        &self,
        generation: u64,
        f: impl FnOnce(&mut RunSession, &mut Vec<SimulationEvent>) -> R,
    ) -> Result<R, Cancelled> {
        let mut events = Vec::new();
        let value = {
            let mut session = self.session.lock();
            if session.generation != generation {
                log::debug!(
                    "Discarding update from stale session generation {} (current {})",
                    generation,
                    session.generation
                );
                return Err(Cancelled);
            }
            f(&mut session, &mut events)
        };
        self.publish(events);
        Ok(value)
    }

    fn publish(&self, events: Vec<SimulationEvent>) {
        for event in events {
            if let Err(e) = self.events.send(event) {
                log::debug!("Dropped simulation event: {}", e);
            }
        }
        self.revision.send_modify(|revision| *revision += 1);
    }
}

/// Generation-bound access to the session
///
/// Every method fails with [`Cancelled`] once the session has been reset or
/// replaced.
#[derive(Clone)]
pub(crate) struct SessionHandle {
    cell: Arc<SessionCell>,
    generation: u64,
}

impl SessionHandle {
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Enter a new Running phase; returns the run's activation count
    pub(crate) fn node_started(&self, node_id: &str) -> Result<u32, Cancelled> {
        self.cell.mutate(self.generation, |session, events| {
            let now = session.elapsed();
            session.iteration_count += 1;
            *session.state_mut(node_id) = NodeRunState {
                status: NodeStatus::Running,
                result: None,
                started_at: Some(now),
                ended_at: None,
            };
            events.push(SimulationEvent::NodeStarted {
                run_id: session.run_id(),
                node_id: node_id.to_string(),
                iteration: session.iteration_count,
            });
            session.iteration_count
        })
    }

    pub(crate) fn node_completed(&self, node_id: &str, result: &str) -> Result<(), Cancelled> {
        self.cell.mutate(self.generation, |session, events| {
            let now = session.elapsed();
            let state = session.state_mut(node_id);
            state.status = NodeStatus::Complete;
            state.result = Some(result.to_string());
            state.ended_at = Some(now);
            events.push(SimulationEvent::NodeCompleted {
                run_id: session.run_id(),
                node_id: node_id.to_string(),
                result: result.to_string(),
            });
        })
    }

    pub(crate) fn node_failed(&self, node_id: &str, error: &str) -> Result<(), Cancelled> {
        self.cell.mutate(self.generation, |session, events| {
            let now = session.elapsed();
            let state = session.state_mut(node_id);
            state.status = NodeStatus::Failed;
            state.result = None;
            state.ended_at = Some(now);
            events.push(SimulationEvent::NodeFailed {
                run_id: session.run_id(),
                node_id: node_id.to_string(),
                error: error.to_string(),
            });
        })
    }

    /// Remember an output node's result; the latest one wins
    pub(crate) fn record_output(&self, output: &str) -> Result<(), Cancelled> {
        self.cell.mutate(self.generation, |session, _| {
            session.final_output = Some(output.to_string());
        })
    }

    pub(crate) fn rerouted(&self, from_node: &str, to_node: &str) -> Result<(), Cancelled> {
        self.cell.mutate(self.generation, |session, events| {
            events.push(SimulationEvent::Rerouted {
                run_id: session.run_id(),
                from_node: from_node.to_string(),
                to_node: to_node.to_string(),
            });
        })
    }

    /// Start a message along an edge
    pub(crate) fn emit_message(
        &self,
        edge: &PatternEdge,
        content: &str,
        kind: MessageKind,
    ) -> Result<FlowMessage, Cancelled> {
        self.cell.mutate(self.generation, |session, events| {
            let message = session.flow.emit(edge, content, kind);
            events.push(SimulationEvent::MessageEmitted {
                run_id: session.run_id(),
                message_id: message.id.clone(),
                edge_id: edge.id.clone(),
                kind,
            });
            message
        })
    }

    pub(crate) fn awaiting_step(&self, edge_id: &str) -> Result<(), Cancelled> {
        self.cell.mutate(self.generation, |session, events| {
            events.push(SimulationEvent::AwaitingStep {
                run_id: session.run_id(),
                edge_id: edge_id.to_string(),
            });
        })
    }

    /// Advance the flow animation by one tick
    ///
    /// Returns false once the run is over and no message is left in flight.
    pub(crate) fn tick(&self, speed: f64) -> Result<bool, Cancelled> {
        let mut events = Vec::new();
        let (changed, keep_going) = {
            let mut session = self.cell.session.lock();
            if session.generation != self.generation {
                return Err(Cancelled);
            }
            let changed = !session.flow.is_idle();
            let run_id = session.run_id();
            for message in session.flow.tick(speed) {
                events.push(SimulationEvent::MessageDelivered {
                    run_id: run_id.clone(),
                    message_id: message.id,
                    target: message.target,
                });
            }
            let keep_going = !(session.outcome.is_finished() && session.flow.is_idle());
            (changed, keep_going)
        };
        if changed {
            self.cell.publish(events);
        }
        Ok(keep_going)
    }

    /// Settle the run outcome
    ///
    /// A traversal that ends without error completes with the latest output
    /// recorded, or fails if no output node was reached.
    pub(crate) fn finish(&self, result: Result<(), RunError>) -> Result<RunOutcome, Cancelled> {
        self.cell.mutate(self.generation, |session, events| {
            let outcome = match (result, session.final_output.clone()) {
                (Ok(()), Some(output)) => RunOutcome::Completed { output },
                (Ok(()), None) => RunOutcome::Failed {
                    error: RunError::NoOutputReached,
                },
                (Err(error), _) => RunOutcome::Failed { error },
            };

            let run_id = session.run_id();
            let iterations = session.iteration_count;
            match &outcome {
                RunOutcome::Completed { output } => {
                    log::info!("Run {} completed after {} activations", run_id, iterations);
                    events.push(SimulationEvent::RunCompleted {
                        run_id,
                        output: output.clone(),
                        iterations,
                    });
                }
                RunOutcome::Failed { error } => {
                    log::info!("Run {} failed: {}", run_id, error);
                    events.push(SimulationEvent::RunFailed {
                        run_id,
                        error: error.to_string(),
                        iterations,
                    });
                }
                _ => {}
            }

            session.outcome = outcome.clone();
            outcome
        })
    }
}
