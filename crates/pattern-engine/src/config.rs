//! Configuration types for the simulation engine
//!
//! Every field has a default, so a partial JSON document (or none at all)
//! yields a usable configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::defaults;
use crate::error::Result;
use crate::types::{ExecutionMode, NodeType, SpeedFactor};

/// Latency and failure model used by the mock work simulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulationProfile {
    /// Latency of input nodes (ms)
    pub input_delay_ms: u64,
    /// Lower bound of LLM latency (ms)
    pub llm_min_delay_ms: u64,
    /// Upper bound of LLM latency (ms)
    pub llm_max_delay_ms: u64,
    /// Latency of router nodes (ms)
    pub router_delay_ms: u64,
    /// Latency of aggregator nodes (ms)
    pub aggregator_delay_ms: u64,
    /// Latency of every other node type (ms)
    pub default_delay_ms: u64,
    /// Probability in [0, 1] that a router succeeds
    pub router_success_probability: f64,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            input_delay_ms: defaults::INPUT_DELAY_MS,
            llm_min_delay_ms: defaults::LLM_MIN_DELAY_MS,
            llm_max_delay_ms: defaults::LLM_MAX_DELAY_MS,
            router_delay_ms: defaults::ROUTER_DELAY_MS,
            aggregator_delay_ms: defaults::AGGREGATOR_DELAY_MS,
            default_delay_ms: defaults::DEFAULT_DELAY_MS,
            router_success_probability: defaults::ROUTER_SUCCESS_PROBABILITY,
        }
    }
}

impl SimulationProfile {
    /// Fixed latency for a node type, or `None` for LLM nodes whose latency
    /// is drawn from the configured range
    pub fn fixed_delay(&self, node_type: NodeType) -> Option<Duration> {
        let ms = match node_type {
            NodeType::Llm => return None,
            NodeType::Input => self.input_delay_ms,
            NodeType::Router => self.router_delay_ms,
            NodeType::Aggregator => self.aggregator_delay_ms,
            _ => self.default_delay_ms,
        };
        Some(Duration::from_millis(ms))
    }

    /// LLM latency bounds in ms, ordered low to high
    pub fn llm_delay_range(&self) -> (u64, u64) {
        let low = self.llm_min_delay_ms.min(self.llm_max_delay_ms);
        let high = self.llm_min_delay_ms.max(self.llm_max_delay_ms);
        (low, high)
    }

    /// Router success probability clamped to [0, 1]
    pub fn router_success(&self) -> f64 {
        self.router_success_probability.clamp(0.0, 1.0)
    }
}

/// Configuration for a run controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Pause at each edge crossing in automatic mode (ms, at 1x)
    pub step_delay_ms: u64,
    /// Flow animation tick cadence (ms)
    pub tick_interval_ms: u64,
    /// Progress added to each flow message per tick at 1x
    pub flow_base_rate: f64,
    /// Node activations allowed per run before it is aborted
    pub max_iterations: u32,
    /// Times one edge may be crossed per run; further crossings are skipped
    pub max_edge_crossings: u32,
    /// Initial scheduling mode
    pub mode: ExecutionMode,
    /// Initial playback speed
    pub speed: SpeedFactor,
    /// Work simulator latency model
    pub simulation: SimulationProfile,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_delay_ms: defaults::STEP_DELAY_MS,
            tick_interval_ms: defaults::TICK_INTERVAL_MS,
            flow_base_rate: defaults::FLOW_BASE_RATE,
            max_iterations: defaults::MAX_ITERATIONS,
            max_edge_crossings: defaults::MAX_EDGE_CROSSINGS,
            mode: ExecutionMode::default(),
            speed: SpeedFactor::default(),
            simulation: SimulationProfile::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&content)?;
        log::debug!("Loaded engine configuration from {:?}", path.as_ref());
        Ok(config)
    }

    /// Base delay at an edge crossing
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    /// Flow tick cadence (never zero)
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}
