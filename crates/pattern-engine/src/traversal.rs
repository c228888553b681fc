//! Depth-first traversal of a pattern graph
//!
//! One traversal task runs per session. It walks the graph from the input
//! node, waits out each node's simulated work through the scheduler, and
//! crosses outgoing edges one at a time in declaration order. All state it
//! produces goes through a generation-bound [`SessionHandle`], so a
//! traversal that outlives its session stops at its next mutation.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};

use crate::config::EngineConfig;
use crate::error::{RunError, SimulationError};
use crate::flow::MessageKind;
use crate::scheduler::{Cancelled, StepScheduler};
use crate::session::SessionHandle;
use crate::simulator::{SimulatedWork, WorkSimulator};
use crate::types::{EdgeId, NodeId, NodeType, PatternEdge, PatternGraph, PatternNode};

/// Why traversal stopped early
enum Halt {
    /// The session was reset; nothing more may be recorded
    Cancelled,
    /// The run itself failed
    Run(RunError),
}

impl From<Cancelled> for Halt {
    fn from(_: Cancelled) -> Self {
        Halt::Cancelled
    }
}

impl From<RunError> for Halt {
    fn from(error: RunError) -> Self {
        Halt::Run(error)
    }
}

pub(crate) struct Traversal {
    graph: Arc<PatternGraph>,
    simulator: Arc<dyn WorkSimulator>,
    scheduler: Arc<StepScheduler>,
    session: SessionHandle,
    user_input: String,
    step_delay: Duration,
    max_iterations: u32,
    max_edge_crossings: u32,
    crossings: HashMap<EdgeId, u32>,
    activations: u32,
}

impl Traversal {
    pub(crate) fn new(
        graph: Arc<PatternGraph>,
        simulator: Arc<dyn WorkSimulator>,
        scheduler: Arc<StepScheduler>,
        session: SessionHandle,
        user_input: String,
        config: &EngineConfig,
    ) -> Self {
        Self {
            graph,
            simulator,
            scheduler,
            session,
            user_input,
            step_delay: config.step_delay(),
            max_iterations: config.max_iterations,
            max_edge_crossings: config.max_edge_crossings,
            crossings: HashMap::new(),
            activations: 0,
        }
    }

    /// Walk the graph and settle the run outcome
    pub(crate) async fn run(mut self) {
        let generation = self.session.generation();
        let Some(input) = self.graph.find_input_node().map(|n| n.id.clone()) else {
            log::error!("Pattern '{}' has no input node", self.graph.id);
            if self.session.finish(Err(RunError::MissingInput)).is_err() {
                log::debug!("Run outcome for generation {} discarded", generation);
            }
            return;
        };

        let result = match self.visit(input).await {
            Ok(()) => Ok(()),
            Err(Halt::Run(error)) => Err(error),
            Err(Halt::Cancelled) => {
                log::debug!("Traversal for generation {} cancelled", generation);
                return;
            }
        };

        if self.session.finish(result).is_err() {
            log::debug!("Run outcome for generation {} discarded", generation);
        }
    }

    fn visit(&mut self, node_id: NodeId) -> BoxFuture<'_, Result<(), Halt>> {
        async move {
            let node = self
                .graph
                .find_node(&node_id)
                .cloned()
                .ok_or(RunError::UnknownNode { node_id })?;

            if self.activations >= self.max_iterations {
                log::warn!("Iteration limit of {} reached", self.max_iterations);
                return Err(RunError::IterationLimit {
                    limit: self.max_iterations,
                }
                .into());
            }
            self.activations += 1;

            let generation = self.session.generation();
            self.session.node_started(&node.id)?;
            let work = self.simulate(&node);
            self.scheduler.delay(generation, work.after).await?;

            match work.result {
                Ok(result) => self.on_success(&node, result).await,
                Err(error) => self.on_failure(&node, error).await,
            }
        }
        .boxed()
    }

    async fn on_success(&mut self, node: &PatternNode, result: String) -> Result<(), Halt> {
        self.session.node_completed(&node.id, &result)?;

        if node.node_type == NodeType::Output {
            self.session.record_output(&result)?;
            return Ok(());
        }

        let graph = self.graph.clone();
        let edges: Vec<PatternEdge> = graph
            .outgoing_edges(&node.id)
            .filter(|edge| !graph.leads_to_failure_handler(edge))
            .cloned()
            .collect();

        for edge in &edges {
            self.cross(node, edge, &result, false).await?;
        }
        Ok(())
    }

    async fn on_failure(&mut self, node: &PatternNode, error: SimulationError) -> Result<(), Halt> {
        let reason = error.to_string();
        log::debug!("Node '{}' failed: {}", node.id, reason);
        self.session.node_failed(&node.id, &reason)?;

        let graph = self.graph.clone();
        let Some(handler) = graph
            .outgoing_edges(&node.id)
            .find(|edge| graph.leads_to_failure_handler(edge) && self.has_crossings_left(edge))
        else {
            return Err(RunError::UnhandledFailure {
                node_id: node.id.clone(),
                label: node.label.clone(),
                reason,
            }
            .into());
        };

        self.session.rerouted(&node.id, &handler.target)?;
        self.cross(node, handler, &reason, true).await
    }

    fn has_crossings_left(&self, edge: &PatternEdge) -> bool {
        self.crossings.get(&edge.id).copied().unwrap_or(0) < self.max_edge_crossings
    }

    /// Send a message along an edge, pass the edge's suspension point and
    /// visit the target
    async fn cross(
        &mut self,
        from: &PatternNode,
        edge: &PatternEdge,
        content: &str,
        failed: bool,
    ) -> Result<(), Halt> {
        if !self.has_crossings_left(edge) {
            log::debug!("Skipping exhausted edge '{}'", edge.id);
            return Ok(());
        }
        *self.crossings.entry(edge.id.clone()).or_insert(0) += 1;

        let target_type = self
            .graph
            .find_node(&edge.target)
            .map(|n| n.node_type)
            .unwrap_or_default();
        let kind = MessageKind::for_edge(from.node_type, target_type, failed);

        let generation = self.session.generation();
        self.session.emit_message(edge, content, kind)?;

        let session = &self.session;
        self.scheduler
            .gate(generation, &edge.id, self.step_delay, || {
                let _ = session.awaiting_step(&edge.id);
            })
            .await?;

        self.visit(edge.target.clone()).await
    }

    /// Run the simulator, treating a panic like any other failure
    fn simulate(&self, node: &PatternNode) -> SimulatedWork {
        let simulator = &self.simulator;
        let user_input = &self.user_input;
        std::panic::catch_unwind(AssertUnwindSafe(|| simulator.simulate(node, user_input)))
            .unwrap_or_else(|_| {
                log::warn!("Work simulator panicked on node '{}'", node.id);
                SimulatedWork::failure(
                    SimulationError::internal("the simulator stopped unexpectedly"),
                    Duration::ZERO,
                )
            })
    }
}
