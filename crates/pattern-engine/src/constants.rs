//! Tuning constants for the simulation

/// Default values for [`crate::config::EngineConfig`] and
/// [`crate::config::SimulationProfile`]
pub mod defaults {
    /// Latency of an input node (ms)
    pub const INPUT_DELAY_MS: u64 = 500;
    /// Lower bound of the randomized LLM latency (ms)
    pub const LLM_MIN_DELAY_MS: u64 = 500;
    /// Upper bound of the randomized LLM latency (ms)
    pub const LLM_MAX_DELAY_MS: u64 = 2000;
    /// Latency of a routing decision (ms)
    pub const ROUTER_DELAY_MS: u64 = 800;
    /// Latency of an aggregator (ms)
    pub const AGGREGATOR_DELAY_MS: u64 = 1200;
    /// Latency of every other node type (ms)
    pub const DEFAULT_DELAY_MS: u64 = 700;
    /// Chance that a router picks a route
    pub const ROUTER_SUCCESS_PROBABILITY: f64 = 0.8;

    /// Pause at each edge crossing in automatic mode (ms)
    pub const STEP_DELAY_MS: u64 = 500;
    /// Flow animation tick cadence (ms)
    pub const TICK_INTERVAL_MS: u64 = 50;
    /// Progress added per tick at 1x; 20 ticks of 50ms = one second per edge
    pub const FLOW_BASE_RATE: f64 = 0.05;

    /// Node activations allowed per run
    pub const MAX_ITERATIONS: u32 = 64;
    /// Times a single edge may be crossed per run
    pub const MAX_EDGE_CROSSINGS: u32 = 1;
}
