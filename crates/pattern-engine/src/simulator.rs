//! Simulated node work
//!
//! The work simulator stands in for language-model calls, tool calls and
//! routing decisions. It returns what a node produced and how long that
//! took; the engine does the waiting, so a simulator never touches session
//! state and can be called from any branch.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SimulationProfile;
use crate::error::SimulationError;
use crate::types::{NodeId, NodeType, PatternNode};

/// Outcome of one simulated work unit
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedWork {
    /// What the node produced, or why it failed
    pub result: Result<String, SimulationError>,
    /// Latency at 1x speed; the engine divides it by the speed factor in
    /// effect when the wait is scheduled
    pub after: Duration,
}

impl SimulatedWork {
    /// A successful work unit
    pub fn success(result: impl Into<String>, after: Duration) -> Self {
        Self {
            result: Ok(result.into()),
            after,
        }
    }

    /// A failed work unit
    pub fn failure(error: SimulationError, after: Duration) -> Self {
        Self {
            result: Err(error),
            after,
        }
    }
}

/// Produces the simulated result and latency of a node
pub trait WorkSimulator: Send + Sync {
    fn simulate(&self, node: &PatternNode, user_input: &str) -> SimulatedWork;
}

/// Override for a single node's outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedOutcome {
    /// Always fail, whatever the node type
    Fail,
    /// Always succeed, even for routers
    Succeed,
}

/// Default simulator: type-dependent latency, probabilistic routers and a
/// canned response generator
pub struct MockWorkSimulator {
    profile: SimulationProfile,
    rng: Mutex<StdRng>,
    overrides: HashMap<NodeId, ForcedOutcome>,
}

impl MockWorkSimulator {
    /// Create a simulator with OS-seeded randomness
    pub fn new(profile: SimulationProfile) -> Self {
        Self {
            profile,
            rng: Mutex::new(StdRng::from_os_rng()),
            overrides: HashMap::new(),
        }
    }

    /// Create a simulator whose random draws are reproducible
    pub fn with_seed(profile: SimulationProfile, seed: u64) -> Self {
        Self {
            profile,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            overrides: HashMap::new(),
        }
    }

    /// Make a node fail on every activation
    pub fn force_failure(mut self, node_id: impl Into<String>) -> Self {
        self.overrides.insert(node_id.into(), ForcedOutcome::Fail);
        self
    }

    /// Make a node succeed on every activation
    pub fn force_success(mut self, node_id: impl Into<String>) -> Self {
        self.overrides.insert(node_id.into(), ForcedOutcome::Succeed);
        self
    }

    fn delay_for(&self, node_type: NodeType, rng: &mut StdRng) -> Duration {
        self.profile.fixed_delay(node_type).unwrap_or_else(|| {
            let (low, high) = self.profile.llm_delay_range();
            Duration::from_millis(rng.random_range(low..=high))
        })
    }
}

impl WorkSimulator for MockWorkSimulator {
    fn simulate(&self, node: &PatternNode, user_input: &str) -> SimulatedWork {
        let mut rng = self.rng.lock();
        let after = self.delay_for(node.node_type, &mut rng);

        match self.overrides.get(&node.id) {
            Some(ForcedOutcome::Fail) => {
                return SimulatedWork::failure(SimulationError::Forced, after);
            }
            Some(ForcedOutcome::Succeed) => {
                return SimulatedWork::success(mock_response(node, user_input, &mut rng), after);
            }
            None => {}
        }

        if node.node_type == NodeType::Router
            && !rng.random_bool(self.profile.router_success())
        {
            return SimulatedWork::failure(SimulationError::RouteRejected, after);
        }

        SimulatedWork::success(mock_response(node, user_input, &mut rng), after)
    }
}

const LLM_OPENERS: [&str; 3] = [
    "Drafted a reply to",
    "Reasoned about",
    "Summarised the key points of",
];

/// Canned text standing in for what each node type would produce
fn mock_response(node: &PatternNode, user_input: &str, rng: &mut StdRng) -> String {
    match node.node_type {
        NodeType::Input => format!("User request: \"{}\"", user_input),
        NodeType::Llm => {
            let opener = LLM_OPENERS[rng.random_range(0..LLM_OPENERS.len())];
            format!("{} \"{}\"", opener, user_input)
        }
        NodeType::Tool => format!(
            "{} returned {} results for \"{}\"",
            node.label,
            rng.random_range(1..=5),
            user_input
        ),
        NodeType::Router => format!("Routed \"{}\" to the best-suited handler", user_input),
        NodeType::Aggregator => format!("Combined branch results for \"{}\"", user_input),
        NodeType::Planner => format!(
            "Plan for \"{}\": 1) research 2) draft 3) review",
            user_input
        ),
        NodeType::Executor => format!("{} finished its step for \"{}\"", node.label, user_input),
        NodeType::Evaluator => format!(
            "Scored the answer to \"{}\" {}/10",
            user_input,
            rng.random_range(6..=10)
        ),
        NodeType::Output => format!("Final answer to \"{}\"", user_input),
        NodeType::Default => format!("{} processed \"{}\"", node.label, user_input),
    }
}
