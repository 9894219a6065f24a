//! Serializable engine status projections for operators and callers.

use serde::{Deserialize, Serialize};

use crate::event::{FiredEvent, SimTime};

/// Engine lifecycle state.
///
/// `Stopped -> Running -> (Paused <-> Running) -> Stopped`. Paused is a
/// clock condition: the tick loop keeps running and still fires events
/// that are already due, but simulated time does not advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    /// No timer is running and external ticks are rejected.
    Stopped,
    /// Ticks advance simulated time and fire due events.
    Running,
    /// Ticks fire already-due events without advancing simulated time.
    Paused,
}

/// Cumulative dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Fired events handed to at least one listener.
    pub deliveries: u64,
    /// Fired events for which no listener was registered.
    pub unhandled: u64,
    /// Listener invocations that completed successfully.
    pub handler_successes: u64,
    /// Listener invocations that returned an error or panicked.
    pub handler_failures: u64,
}

/// Outcome of a single tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Sequence number of this tick (1-based, counts every tick run).
    pub tick: u64,
    /// Simulated time after the clock advance.
    pub time: SimTime,
    /// Whether the clock advanced (false while paused).
    pub advanced: bool,
    /// Occurrences fired this tick, in firing order.
    pub fired: Vec<FiredEvent>,
    /// Due occurrences left for the next tick because the per-tick
    /// firing cap was reached.
    pub deferred: usize,
}

/// Point-in-time view of the engine for the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Lifecycle state.
    pub status: EngineStatus,
    /// Current simulated time.
    pub current_time: SimTime,
    /// Number of ticks run so far.
    pub tick_count: u64,
    /// Simulated milliseconds per real millisecond.
    pub time_multiplier: u32,
    /// Real-time milliseconds between automatic ticks.
    pub tick_interval_ms: u64,
    /// Events waiting in the store.
    pub pending_events: usize,
    /// Due time of the earliest pending event, if any.
    pub next_due: Option<SimTime>,
    /// Fired events whose listeners are still running.
    pub in_flight_deliveries: usize,
    /// Cumulative dispatcher counters.
    pub dispatch: DispatchStats,
}
