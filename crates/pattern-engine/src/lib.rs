//! Pattern Engine - execution playback for agent design pattern graphs
//!
//! This crate walks a directed graph describing an AI-agent pattern
//! (router, reflection, tool use, ...) and plays back a simulated run of it
//! so a learner can watch control and data move through the pattern.
//!
//! - Depth-first traversal from the pattern's `input` node
//! - Simulated, type-dependent node latency with probabilistic router failure
//! - Failure rerouting to nodes labelled as failure handlers
//! - Automatic playback or user-gated step-by-step advancement
//! - Pause/resume and speed scaling (0.5x, 1x, 2x)
//! - Progress-tracked flow messages for animating edges
//!
//! # Architecture
//!
//! - `WorkSimulator`: returns a node's simulated result and latency
//! - `StepScheduler`: owns suspension points, pause state and cancellation
//! - `FlowEmitter`: owns the animated message set and its tick cadence
//! - `RunController`: the public façade that starts, resets and observes runs
//!
//! Everything the rendering side needs is exposed as read-only
//! [`RunSnapshot`]s or as a stream of [`SimulationEvent`]s.
//!
//! # Example
//!
//! ```ignore
//! use pattern_engine::{catalog, RunController};
//!
//! let pattern = catalog::find("prompt-chaining").unwrap();
//! let controller = RunController::new(pattern);
//! controller.start("Summarise this article")?;
//! let outcome = controller.wait_for_outcome().await;
//! ```

pub mod builder;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod controller;
pub mod error;
pub mod events;
pub mod flow;
pub mod scheduler;
pub mod session;
pub mod simulator;
mod traversal;
pub mod types;
pub mod validation;

// Re-export key types
pub use builder::PatternBuilder;
pub use config::{EngineConfig, SimulationProfile};
pub use controller::{RunController, RunControllerBuilder};
pub use error::{EngineError, Result, RunError, SimulationError};
pub use events::{ChannelEventSink, EventSink, NullEventSink, SimulationEvent, VecEventSink};
pub use flow::{EdgeEndpoints, EdgeGeometry, FlowEmitter, FlowMessage, MessageKind, NoGeometry};
pub use scheduler::{Cancelled, StepScheduler};
pub use session::{NodeSnapshot, RunOutcome, RunSnapshot};
pub use simulator::{ForcedOutcome, MockWorkSimulator, SimulatedWork, WorkSimulator};
pub use types::{
    ExecutionMode, NodeRunState, NodeStatus, NodeType, PatternEdge, PatternGraph, PatternNode,
    SpeedFactor,
};
pub use validation::{validate_pattern, ValidationError};
