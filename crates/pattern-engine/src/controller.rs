//! Run controller
//!
//! The controller is the public face of the engine. It owns the pattern,
//! the scheduler and the live session, spawns one traversal task and one
//! flow tick task per run, and hands out snapshots. All mutation happens
//! inside the engine; callers only issue commands and read.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{EventSink, NullEventSink, SimulationEvent};
use crate::flow::{EdgeEndpoints, EdgeGeometry, FlowEmitter, NoGeometry};
use crate::scheduler::StepScheduler;
use crate::session::{RunOutcome, RunSession, RunSnapshot, SessionCell, SessionHandle};
use crate::simulator::{MockWorkSimulator, WorkSimulator};
use crate::traversal::Traversal;
use crate::types::{ExecutionMode, PatternGraph, SpeedFactor};
use crate::validation::validate_pattern;

/// Builder for a [`RunController`]
pub struct RunControllerBuilder {
    graph: PatternGraph,
    config: EngineConfig,
    simulator: Option<Arc<dyn WorkSimulator>>,
    events: Arc<dyn EventSink>,
    geometry: Arc<dyn EdgeGeometry>,
}

impl RunControllerBuilder {
    pub fn new(graph: PatternGraph) -> Self {
        Self {
            graph,
            config: EngineConfig::default(),
            simulator: None,
            events: Arc::new(NullEventSink),
            geometry: Arc::new(NoGeometry),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default mock simulator
    pub fn simulator(mut self, simulator: impl WorkSimulator + 'static) -> Self {
        self.simulator = Some(Arc::new(simulator));
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn geometry(mut self, geometry: Arc<dyn EdgeGeometry>) -> Self {
        self.geometry = geometry;
        self
    }

    /// Use a fixed table of edge endpoints
    pub fn edge_endpoints(self, endpoints: HashMap<String, EdgeEndpoints>) -> Self {
        self.geometry(Arc::new(endpoints))
    }

    pub fn build(self) -> RunController {
        let simulator: Arc<dyn WorkSimulator> = match self.simulator {
            Some(simulator) => simulator,
            None => Arc::new(MockWorkSimulator::new(self.config.simulation.clone())),
        };
        let scheduler = Arc::new(StepScheduler::new(self.config.mode, self.config.speed));
        let graph = Arc::new(self.graph);
        let flow = FlowEmitter::new(self.config.flow_base_rate, self.geometry.clone());
        let session = Arc::new(SessionCell::new(
            RunSession::idle(scheduler.generation(), graph.clone(), flow),
            self.events,
        ));

        RunController {
            graph: RwLock::new(graph),
            config: self.config,
            simulator,
            scheduler,
            session,
            geometry: self.geometry,
            tasks: Mutex::new(Vec::new()),
        }
    }
}

/// Drives simulated runs of one pattern at a time
pub struct RunController {
    graph: RwLock<Arc<PatternGraph>>,
    config: EngineConfig,
    simulator: Arc<dyn WorkSimulator>,
    scheduler: Arc<StepScheduler>,
    session: Arc<SessionCell>,
    geometry: Arc<dyn EdgeGeometry>,
    /// Tasks of the current session; the lock also serialises start/reset
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RunController {
    /// Create a controller with default configuration and simulator
    pub fn new(graph: PatternGraph) -> Self {
        RunControllerBuilder::new(graph).build()
    }

    pub fn builder(graph: PatternGraph) -> RunControllerBuilder {
        RunControllerBuilder::new(graph)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The pattern runs are played on
    pub fn pattern(&self) -> Arc<PatternGraph> {
        self.graph.read().clone()
    }

    /// Start a run with the given user input
    ///
    /// Must be called from within a tokio runtime. Returns the new run's id.
    pub fn start(&self, user_input: impl Into<String>) -> Result<String> {
        let graph = self.pattern();
        let errors = validate_pattern(&graph);
        if !errors.is_empty() {
            return Err(EngineError::InvalidGraph(errors));
        }
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        let mut tasks = self.tasks.lock();
        if self.session.is_active() {
            return Err(EngineError::RunActive);
        }

        let generation = self.scheduler.stop();
        for task in tasks.drain(..) {
            task.abort();
        }
        self.scheduler.resume();

        let run_id = format!("run-{}", uuid::Uuid::new_v4());
        let flow = FlowEmitter::new(self.config.flow_base_rate, self.geometry.clone());
        self.session.replace(RunSession::running(
            run_id.clone(),
            generation,
            graph.clone(),
            flow,
        ));
        self.session.announce(SimulationEvent::RunStarted {
            run_id: run_id.clone(),
            pattern_id: graph.id.clone(),
            mode: self.scheduler.mode(),
        });
        log::info!(
            "Starting run {} of pattern '{}' ({:?} mode, {})",
            run_id,
            graph.id,
            self.scheduler.mode(),
            self.scheduler.speed()
        );

        let traversal = Traversal::new(
            graph,
            self.simulator.clone(),
            self.scheduler.clone(),
            self.session.handle(generation),
            user_input.into(),
            &self.config,
        );
        tasks.push(runtime.spawn(traversal.run()));
        tasks.push(runtime.spawn(run_ticker(
            self.scheduler.clone(),
            self.session.handle(generation),
            self.config.tick_interval(),
        )));

        Ok(run_id)
    }

    /// Stop any run and return every node to idle
    ///
    /// Safe to call at any time, any number of times.
    pub fn reset(&self) {
        let mut tasks = self.tasks.lock();
        let generation = self.scheduler.stop();
        for task in tasks.drain(..) {
            task.abort();
        }
        self.scheduler.resume();

        let flow = FlowEmitter::new(self.config.flow_base_rate, self.geometry.clone());
        let idle = RunSession::idle(generation, self.pattern(), flow);
        if let Some(run_id) = self.session.replace(idle) {
            log::info!("Reset run {}", run_id);
            self.session.announce(SimulationEvent::RunReset { run_id });
        }
    }

    /// Hold an automatic run at its next step boundary
    pub fn pause(&self) {
        self.scheduler.pause();
        self.session.touch();
    }

    pub fn resume(&self) {
        self.scheduler.resume();
        self.session.touch();
    }

    /// Change the playback speed; waits already scheduled keep their length
    pub fn set_speed(&self, speed: SpeedFactor) {
        self.scheduler.set_speed(speed);
        self.session.touch();
    }

    /// Change the playback speed from a raw multiplier (0.5, 1 or 2)
    pub fn set_speed_factor(&self, factor: f64) -> Result<()> {
        self.set_speed(SpeedFactor::try_from(factor)?);
        Ok(())
    }

    /// Switch between automatic and step mode
    ///
    /// A live run is reset first.
    pub fn set_mode(&self, mode: ExecutionMode) {
        if self.session.is_active() {
            log::info!("Mode changed during a run; resetting");
            self.reset();
        }
        self.scheduler.set_mode(mode);
        self.session.touch();
    }

    /// Let the oldest step-mode suspension proceed
    ///
    /// Returns false when traversal was not waiting for a step.
    pub fn advance_step(&self) -> bool {
        self.scheduler.advance()
    }

    /// Replace the pattern; any run is reset
    pub fn set_pattern(&self, graph: PatternGraph) {
        *self.graph.write() = Arc::new(graph);
        self.reset();
    }

    pub fn is_active(&self) -> bool {
        self.session.is_active()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.session.snapshot(
            self.scheduler.mode(),
            self.scheduler.speed(),
            self.scheduler.is_paused(),
            self.scheduler.next_step_edge(),
        )
    }

    /// Watch for changes; the value is a revision counter that increases
    /// whenever a snapshot would differ
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.session.subscribe()
    }

    /// Wait until the current run completes, fails or is reset
    pub async fn wait_for_outcome(&self) -> RunOutcome {
        let mut revisions = self.subscribe();
        loop {
            let outcome = self.session.outcome();
            if outcome != RunOutcome::Running {
                return outcome;
            }
            if revisions.changed().await.is_err() {
                return self.session.outcome();
            }
        }
    }
}

impl Drop for RunController {
    fn drop(&mut self) {
        self.scheduler.stop();
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

/// Advance flow messages at a fixed cadence until the run is over and
/// every message has arrived
async fn run_ticker(scheduler: Arc<StepScheduler>, session: SessionHandle, period: Duration) {
    let generation = session.generation();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = scheduler.cancelled(generation) => return,
        }
        if scheduler.mode() == ExecutionMode::Auto && scheduler.is_paused() {
            continue;
        }
        match session.tick(scheduler.speed().as_f64()) {
            Ok(true) => {}
            Ok(false) | Err(_) => break,
        }
    }
    log::debug!("Flow ticker for generation {} finished", generation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::PatternBuilder;
    use crate::error::RunError;
    use crate::events::VecEventSink;
    use crate::simulator::SimulatedWork;
    use crate::types::{NodeStatus, NodeType, PatternNode};
    use crate::validation::ValidationError;
    use crate::SimulationProfile;

    fn seeded() -> MockWorkSimulator {
        MockWorkSimulator::with_seed(SimulationProfile::default(), 7)
    }

    fn linear() -> PatternGraph {
        PatternBuilder::new("linear", "Linear")
            .input("in", "User Input")
            .node("llm", NodeType::Llm, "Model")
            .output("out", "Answer")
            .chain(&["in", "llm", "out"])
            .build()
    }

    fn routing(with_handler: bool) -> PatternGraph {
        let builder = PatternBuilder::new("routing", "Routing")
            .input("in", "User Input")
            .node("router", NodeType::Router, "Router")
            .node("answer", NodeType::Llm, "Specialist")
            .output("out", "Answer")
            .chain(&["in", "router", "answer", "out"]);
        if !with_handler {
            return builder.build();
        }
        builder
            .node("fb", NodeType::Default, "Failure Handler")
            .output("fallback", "Fallback Answer")
            .edge("router", "fb")
            .edge("fb", "fallback")
            .build()
    }

    fn step_config() -> EngineConfig {
        EngineConfig {
            mode: ExecutionMode::Step,
            ..Default::default()
        }
    }

    /// Wait for the snapshot to satisfy a condition
    async fn wait_until(
        controller: &RunController,
        pred: impl Fn(&RunSnapshot) -> bool,
    ) -> RunSnapshot {
        let mut revisions = controller.subscribe();
        tokio::time::timeout(Duration::from_secs(300), async {
            loop {
                let snapshot = controller.snapshot();
                if pred(&snapshot) {
                    return snapshot;
                }
                revisions.changed().await.unwrap();
            }
        })
        .await
        .expect("condition not reached")
    }

    fn node_events(events: &[SimulationEvent], node: &str) -> Vec<&'static str> {
        events
            .iter()
            .filter_map(|e| match e {
                SimulationEvent::NodeStarted { node_id, .. } if node_id == node => Some("started"),
                SimulationEvent::NodeCompleted { node_id, .. } if node_id == node => {
                    Some("completed")
                }
                SimulationEvent::NodeFailed { node_id, .. } if node_id == node => Some("failed"),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_run_completes() {
        let sink = Arc::new(VecEventSink::new());
        let controller = RunController::builder(linear())
            .simulator(seeded())
            .event_sink(sink.clone())
            .build();

        controller.start("hello").unwrap();
        let outcome = controller.wait_for_outcome().await;

        let output = match outcome {
            RunOutcome::Completed { output } => output,
            other => panic!("Expected completion, got {:?}", other),
        };
        assert!(output.contains("hello"));

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.iteration_count, 3);
        assert_eq!(snapshot.status("out"), NodeStatus::Complete);

        let events = sink.events();
        assert!(matches!(events.first(), Some(SimulationEvent::RunStarted { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, SimulationEvent::RunCompleted { iterations: 3, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_run_has_one_complete_output() {
        let controller = RunController::builder(routing(true))
            .simulator(seeded().force_success("router"))
            .build();

        controller.start("what is rust").unwrap();
        controller.wait_for_outcome().await;

        let snapshot = controller.snapshot();
        let outputs: Vec<_> = snapshot
            .nodes_with_status(NodeStatus::Complete)
            .filter(|n| n.node_type == NodeType::Output)
            .collect();
        assert_eq!(outputs.len(), 1);
        let result = outputs[0].state.result.as_deref().unwrap();
        assert!(!result.is_empty());
        assert_eq!(snapshot.final_output(), Some(result));

        // The failure branch is never taken on success
        assert_eq!(snapshot.status("fb"), NodeStatus::Idle);
        assert_eq!(snapshot.status("fallback"), NodeStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_router_failure_reroutes_to_handler() {
        let sink = Arc::new(VecEventSink::new());
        let controller = RunController::builder(routing(true))
            .simulator(seeded().force_failure("router"))
            .event_sink(sink.clone())
            .build();

        controller.start("hello").unwrap();
        let outcome = controller.wait_for_outcome().await;
        assert!(matches!(outcome, RunOutcome::Completed { .. }));

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.status("router"), NodeStatus::Failed);
        assert_eq!(snapshot.status("fb"), NodeStatus::Complete);
        assert_eq!(snapshot.status("fallback"), NodeStatus::Complete);
        assert_eq!(snapshot.status("answer"), NodeStatus::Idle);
        assert_eq!(snapshot.status("out"), NodeStatus::Idle);

        let events = sink.events();
        assert!(events.iter().any(|e| matches!(
            e,
            SimulationEvent::Rerouted { from_node, to_node, .. }
                if from_node == "router" && to_node == "fb"
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            SimulationEvent::MessageEmitted { kind: crate::flow::MessageKind::Error, .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhandled_failure_aborts_run() {
        let sink = Arc::new(VecEventSink::new());
        let controller = RunController::builder(routing(false))
            .simulator(seeded().force_failure("router"))
            .event_sink(sink.clone())
            .build();

        controller.start("hello").unwrap();
        let outcome = controller.wait_for_outcome().await;

        let error = match outcome {
            RunOutcome::Failed { error } => error,
            other => panic!("Expected failure, got {:?}", other),
        };
        assert!(matches!(error, RunError::UnhandledFailure { ref label, .. } if label == "Router"));
        assert_eq!(
            error.to_string(),
            "Router failed and no failure handler is connected: forced failure"
        );

        let events = sink.events();
        assert!(node_events(&events, "answer").is_empty());
        assert!(node_events(&events, "out").is_empty());
        assert_eq!(controller.snapshot().status("answer"), NodeStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_failure_handler_leaves_failure_unhandled() {
        let graph = PatternBuilder::new("retry", "Retry")
            .input("in", "User Input")
            .node("router", NodeType::Router, "Router")
            .node("fb", NodeType::Default, "Failure Handler")
            .output("out", "Answer")
            .edge("in", "router")
            .edge("router", "fb")
            .edge("fb", "router")
            .edge("router", "out")
            .build();
        let sink = Arc::new(VecEventSink::new());
        let controller = RunController::builder(graph)
            .simulator(seeded().force_failure("router"))
            .event_sink(sink.clone())
            .build();

        controller.start("hello").unwrap();
        let outcome = controller.wait_for_outcome().await;
        assert!(matches!(
            outcome,
            RunOutcome::Failed {
                error: RunError::UnhandledFailure { ref node_id, .. }
            } if node_id == "router"
        ));

        // in, router, fb, router again; the second failure has no handler left
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.iteration_count, 4);
        assert_eq!(snapshot.status("router"), NodeStatus::Failed);
        assert_eq!(snapshot.status("out"), NodeStatus::Idle);

        let reroutes = sink
            .events()
            .iter()
            .filter(|e| matches!(e, SimulationEvent::Rerouted { .. }))
            .count();
        assert_eq!(reroutes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_mode_moves_one_node_per_advance() {
        let graph = PatternBuilder::new("steps", "Steps")
            .input("in", "User Input")
            .node("a", NodeType::Llm, "Draft")
            .node("b", NodeType::Llm, "Refine")
            .output("out", "Answer")
            .chain(&["in", "a", "b", "out"])
            .build();
        let sink = Arc::new(VecEventSink::new());
        let controller = RunController::builder(graph)
            .config(step_config())
            .simulator(seeded())
            .event_sink(sink.clone())
            .build();

        controller.start("hello").unwrap();
        let snapshot = wait_until(&controller, |s| s.awaiting_step).await;
        assert_eq!(snapshot.status("in"), NodeStatus::Complete);
        assert_eq!(snapshot.next_step_edge.as_deref(), Some("edge-1"));

        // Nothing moves without an advance
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(controller.snapshot().status("a"), NodeStatus::Idle);

        for (completed, node) in [(2, "a"), (3, "b")] {
            assert!(controller.advance_step());
            let snapshot = wait_until(&controller, |s| {
                s.status(node) == NodeStatus::Complete && s.awaiting_step
            })
            .await;
            assert_eq!(snapshot.nodes_with_status(NodeStatus::Complete).count(), completed);
            assert_eq!(snapshot.nodes_with_status(NodeStatus::Running).count(), 0);
        }

        assert!(controller.advance_step());
        let outcome = controller.wait_for_outcome().await;
        assert!(matches!(outcome, RunOutcome::Completed { .. }));
        assert!(!controller.advance_step());

        // Every start after the input's follows an awaiting step
        let events = sink.events();
        let mut awaiting = 0;
        let mut started = 0;
        for event in &events {
            match event {
                SimulationEvent::AwaitingStep { .. } => awaiting += 1,
                SimulationEvent::NodeStarted { .. } => {
                    started += 1;
                    assert!(started <= awaiting + 1);
                }
                _ => {}
            }
        }
        assert_eq!(started, 4);
        assert_eq!(awaiting, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_transitions_alternate() {
        let sink = Arc::new(VecEventSink::new());
        let controller = RunController::builder(crate::catalog::tool_use())
            .simulator(seeded())
            .event_sink(sink.clone())
            .build();

        controller.start("weather in Oslo").unwrap();
        controller.wait_for_outcome().await;

        let events = sink.events();
        for node in &controller.pattern().nodes {
            let transitions = node_events(&events, &node.id);
            for pair in transitions.chunks(2) {
                assert_eq!(pair[0], "started", "node {}", node.id);
                assert_eq!(pair.get(1).copied(), Some("completed"), "node {}", node.id);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_cycle_revisits_agent_once() {
        let controller = RunController::builder(crate::catalog::tool_use())
            .simulator(seeded())
            .build();

        controller.start("weather in Oslo").unwrap();
        let outcome = controller.wait_for_outcome().await;
        assert!(matches!(outcome, RunOutcome::Completed { .. }));
        // input, agent, tool, agent, output
        assert_eq!(controller.snapshot().iteration_count, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_iteration_limit_stops_runaway_cycle() {
        let graph = PatternBuilder::new("loop", "Loop")
            .input("in", "User Input")
            .node("a", NodeType::Llm, "Critic")
            .node("b", NodeType::Llm, "Writer")
            .chain(&["in", "a", "b", "a"])
            .build();
        let config = EngineConfig {
            max_iterations: 10,
            max_edge_crossings: 100,
            ..Default::default()
        };
        let controller = RunController::builder(graph)
            .config(config)
            .simulator(seeded())
            .build();

        controller.start("x").unwrap();
        let outcome = controller.wait_for_outcome().await;
        assert_eq!(
            outcome,
            RunOutcome::Failed {
                error: RunError::IterationLimit { limit: 10 }
            }
        );
        assert_eq!(controller.snapshot().iteration_count, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_without_output_fails() {
        let graph = PatternBuilder::new("open", "Open")
            .input("in", "User Input")
            .node("llm", NodeType::Llm, "Model")
            .edge("in", "llm")
            .build();
        let controller = RunController::builder(graph).simulator(seeded()).build();

        controller.start("x").unwrap();
        assert_eq!(
            controller.wait_for_outcome().await,
            RunOutcome::Failed {
                error: RunError::NoOutputReached
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulator_panic_is_a_failure() {
        struct Flaky;
        impl WorkSimulator for Flaky {
            fn simulate(&self, node: &PatternNode, _user_input: &str) -> SimulatedWork {
                if node.node_type == NodeType::Llm {
                    panic!("model offline");
                }
                SimulatedWork::success("ok", Duration::from_millis(10))
            }
        }

        let controller = RunController::builder(linear()).simulator(Flaky).build();
        controller.start("x").unwrap();

        let outcome = controller.wait_for_outcome().await;
        assert!(matches!(
            outcome,
            RunOutcome::Failed {
                error: RunError::UnhandledFailure { ref node_id, .. }
            } if node_id == "llm"
        ));
        assert_eq!(controller.snapshot().status("llm"), NodeStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_is_idempotent_and_final() {
        let sink = Arc::new(VecEventSink::new());
        let controller = RunController::builder(linear())
            .simulator(seeded())
            .event_sink(sink.clone())
            .build();

        controller.reset();
        controller.start("hello").unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(!controller.snapshot().messages.is_empty());

        for _ in 0..3 {
            controller.reset();
        }
        let after_reset = sink.events().len();

        tokio::time::sleep(Duration::from_secs(10)).await;
        let snapshot = controller.snapshot();
        assert!(snapshot.nodes.iter().all(|n| n.state.status == NodeStatus::Idle));
        assert!(snapshot.messages.is_empty());
        assert_eq!(snapshot.iteration_count, 0);
        assert_eq!(snapshot.outcome, RunOutcome::Idle);
        assert_eq!(snapshot.run_id, None);

        // Exactly one reset event, and nothing from the stale run afterwards
        let events = sink.events();
        assert_eq!(events.len(), after_reset);
        let resets = events
            .iter()
            .filter(|e| matches!(e, SimulationEvent::RunReset { .. }))
            .count();
        assert_eq!(resets, 1);
        assert!(matches!(events.last(), Some(SimulationEvent::RunReset { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_speed_halves_input_time() {
        let mut finished = Vec::new();
        for speed in [SpeedFactor::Normal, SpeedFactor::Double] {
            let controller = RunController::builder(linear()).simulator(seeded()).build();
            controller.set_speed(speed);
            controller.start("hello").unwrap();

            let snapshot =
                wait_until(&controller, |s| s.status("in") == NodeStatus::Complete).await;
            finished.push(snapshot.node("in").unwrap().state.ended_at.unwrap());
        }

        let normal = finished[0].as_millis();
        let double = finished[1].as_millis();
        assert!((500..=502).contains(&normal), "normal = {}", normal);
        assert!((250..=252).contains(&double), "double = {}", double);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_holds_and_resume_continues() {
        let controller = RunController::builder(linear()).simulator(seeded()).build();
        controller.start("hello").unwrap();
        controller.pause();

        tokio::time::sleep(Duration::from_secs(10)).await;
        let snapshot = controller.snapshot();
        assert!(snapshot.paused);
        assert_eq!(snapshot.status("in"), NodeStatus::Running);
        assert!(controller.is_active());

        controller.resume();
        let outcome = controller.wait_for_outcome().await;
        assert!(matches!(outcome, RunOutcome::Completed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_freezes_message_progress() {
        let controller = RunController::builder(linear()).simulator(seeded()).build();
        controller.start("hello").unwrap();

        let progress_on = |snapshot: &RunSnapshot| {
            snapshot
                .messages
                .iter()
                .find(|m| m.edge_id == "edge-1")
                .map(|m| m.progress)
        };
        let moving = wait_until(&controller, |s| progress_on(s).is_some_and(|p| p > 0.0)).await;
        controller.pause();
        let held = progress_on(&controller.snapshot()).unwrap();
        assert!(held >= progress_on(&moving).unwrap());

        // Twenty ticks at the default cadence
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(progress_on(&controller.snapshot()), Some(held));

        controller.resume();
        wait_until(&controller, |s| progress_on(s).map_or(true, |p| p > held)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejections() {
        let controller = RunController::builder(linear()).simulator(seeded()).build();
        controller.start("hello").unwrap();
        assert!(matches!(controller.start("again"), Err(EngineError::RunActive)));

        controller.set_pattern(PatternGraph::new("empty", "Empty"));
        assert!(!controller.is_active());
        match controller.start("hello") {
            Err(EngineError::InvalidGraph(errors)) => assert!(!errors.is_empty()),
            other => panic!("Expected invalid graph, got {:?}", other),
        }

        let clashing = PatternBuilder::new("clash", "Clash")
            .input("in", "User Input")
            .llm("a", "Model")
            .output("out", "Answer")
            .edge_with_id("edge-2", "in", "a")
            .edge_with_id("edge-2", "a", "out")
            .build();
        controller.set_pattern(clashing);
        match controller.start("hello") {
            Err(EngineError::InvalidGraph(errors)) => assert_eq!(
                errors,
                vec![ValidationError::DuplicateEdgeId {
                    edge_id: "edge-2".to_string()
                }]
            ),
            other => panic!("Expected invalid graph, got {:?}", other),
        }
        assert!(!controller.is_active());
    }

    #[test]
    fn test_speed_factor_validation() {
        let controller = RunController::new(linear());
        assert!(matches!(
            controller.set_speed_factor(3.0),
            Err(EngineError::InvalidSpeed(_))
        ));
        assert_eq!(controller.snapshot().speed, SpeedFactor::Normal);

        controller.set_speed_factor(0.5).unwrap();
        assert_eq!(controller.snapshot().speed, SpeedFactor::Half);
    }

    #[test]
    fn test_start_needs_runtime() {
        let controller = RunController::new(linear());
        assert!(matches!(controller.start("hello"), Err(EngineError::NoRuntime)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mode_switch_resets_live_run() {
        let controller = RunController::builder(linear()).simulator(seeded()).build();
        controller.start("hello").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        controller.set_mode(ExecutionMode::Step);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.mode, ExecutionMode::Step);
        assert_eq!(snapshot.outcome, RunOutcome::Idle);
        assert!(snapshot.nodes.iter().all(|n| n.state.status == NodeStatus::Idle));

        // The new mode applies to the next run
        controller.start("hello").unwrap();
        let snapshot = wait_until(&controller, |s| s.awaiting_step).await;
        assert_eq!(snapshot.status("llm"), NodeStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_carry_geometry() {
        let mut endpoints = HashMap::new();
        endpoints.insert(
            "edge-1".to_string(),
            EdgeEndpoints {
                source_x: 0.0,
                source_y: 0.0,
                target_x: 200.0,
                target_y: 0.0,
            },
        );
        let controller = RunController::builder(linear())
            .simulator(seeded())
            .edge_endpoints(endpoints)
            .build();

        controller.start("hello").unwrap();
        let snapshot = wait_until(&controller, |s| {
            s.messages.iter().any(|m| m.edge_id == "edge-1" && m.progress > 0.0)
        })
        .await;
        let message = snapshot
            .messages
            .iter()
            .find(|m| m.edge_id == "edge-1")
            .unwrap();
        let (x, _) = message.position().unwrap();
        assert!(x > 0.0 && x <= 200.0);
    }
}
