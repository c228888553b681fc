//! Step scheduler
//!
//! Owns every suspension point of a run. In automatic mode a suspension
//! resolves after a speed-scaled delay; in step mode it waits for the user
//! to advance. Each suspension is tied to a session generation: `stop()`
//! bumps the generation and every pending or future suspension of the old
//! generation resolves as [`Cancelled`].

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{oneshot, watch};

use crate::types::{ExecutionMode, SpeedFactor};

/// A suspension was discarded because its session was stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("suspension cancelled by session reset")]
pub struct Cancelled;

struct StepWaiter {
    edge_id: String,
    tx: oneshot::Sender<()>,
}

struct SchedulerState {
    mode: ExecutionMode,
    speed: SpeedFactor,
    /// Step-mode suspensions, resumed front to back
    waiters: VecDeque<StepWaiter>,
}

/// Cooperative controller for suspension points
pub struct StepScheduler {
    state: Mutex<SchedulerState>,
    paused: watch::Sender<bool>,
    generation: watch::Sender<u64>,
}

impl StepScheduler {
    /// Create a scheduler in the given mode and speed
    pub fn new(mode: ExecutionMode, speed: SpeedFactor) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                mode,
                speed,
                waiters: VecDeque::new(),
            }),
            paused: watch::Sender::new(false),
            generation: watch::Sender::new(0),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.state.lock().mode
    }

    /// Change the mode
    ///
    /// Callers must stop any live run first; suspensions already waiting
    /// keep the discipline they were created with.
    pub fn set_mode(&self, mode: ExecutionMode) {
        self.state.lock().mode = mode;
    }

    pub fn speed(&self) -> SpeedFactor {
        self.state.lock().speed
    }

    /// Change the speed; only delays scheduled afterwards are affected
    pub fn set_speed(&self, speed: SpeedFactor) {
        self.state.lock().speed = speed;
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Current session generation
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Number of step-mode suspensions waiting for `advance()`
    pub fn pending_steps(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Edge the oldest step-mode suspension is waiting on
    pub fn next_step_edge(&self) -> Option<String> {
        self.state.lock().waiters.front().map(|w| w.edge_id.clone())
    }

    /// Resume the oldest step-mode suspension
    ///
    /// Returns false when nothing was waiting; the call is not remembered.
    pub fn advance(&self) -> bool {
        let mut state = self.state.lock();
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.tx.send(()).is_ok() {
                log::debug!("Advanced step across edge '{}'", waiter.edge_id);
                return true;
            }
        }
        false
    }

    /// Discard every pending suspension and start a new generation
    ///
    /// Returns the new generation. Dropping the waiters' senders wakes them
    /// with a cancellation.
    pub fn stop(&self) -> u64 {
        let mut state = self.state.lock();
        state.waiters.clear();
        let mut next = 0;
        self.generation.send_modify(|generation| {
            *generation += 1;
            next = *generation;
        });
        next
    }

    /// Fail fast if the session has moved on
    pub fn check(&self, generation: u64) -> Result<(), Cancelled> {
        if self.generation() == generation {
            Ok(())
        } else {
            Err(Cancelled)
        }
    }

    /// Resolves once the given generation is no longer current
    pub async fn cancelled(&self, generation: u64) {
        let mut rx = self.generation.subscribe();
        // The sender lives as long as self, so this only returns on a change
        let _ = rx.wait_for(|current| *current != generation).await;
    }

    /// Wait out a simulated work delay
    ///
    /// The delay is scaled by the speed in effect now. In automatic mode
    /// the suspension then holds while the run is paused.
    pub async fn delay(&self, generation: u64, base: Duration) -> Result<(), Cancelled> {
        self.check(generation)?;
        let scaled = self.speed().scale(base);

        tokio::select! {
            _ = tokio::time::sleep(scaled) => {}
            _ = self.cancelled(generation) => return Err(Cancelled),
        }

        self.hold_while_paused(generation).await
    }

    /// Suspension point at an edge crossing
    ///
    /// Automatic mode behaves like [`StepScheduler::delay`]. Step mode
    /// queues the crossing, calls `on_wait` once the suspension is visible
    /// to `advance()`, and blocks until it is advanced or cancelled.
    pub async fn gate<F>(
        &self,
        generation: u64,
        edge_id: &str,
        base: Duration,
        on_wait: F,
    ) -> Result<(), Cancelled>
    where
        F: FnOnce(),
    {
        let rx = {
            let mut state = self.state.lock();
            if self.generation() != generation {
                return Err(Cancelled);
            }
            match state.mode {
                ExecutionMode::Auto => None,
                ExecutionMode::Step => {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(StepWaiter {
                        edge_id: edge_id.to_string(),
                        tx,
                    });
                    Some(rx)
                }
            }
        };

        let Some(rx) = rx else {
            return self.delay(generation, base).await;
        };

        on_wait();

        tokio::select! {
            resumed = rx => resumed.map_err(|_| Cancelled)?,
            _ = self.cancelled(generation) => return Err(Cancelled),
        }
        self.check(generation)
    }

    async fn hold_while_paused(&self, generation: u64) -> Result<(), Cancelled> {
        if self.mode() != ExecutionMode::Auto || !self.is_paused() {
            return self.check(generation);
        }

        log::debug!("Run paused at a step boundary");
        let mut paused = self.paused.subscribe();
        tokio::select! {
            _ = paused.wait_for(|is_paused| !*is_paused) => {}
            _ = self.cancelled(generation) => return Err(Cancelled),
        }
        self.check(generation)
    }
}

impl Default for StepScheduler {
    fn default() -> Self {
        Self::new(ExecutionMode::default(), SpeedFactor::default())
    }
}
