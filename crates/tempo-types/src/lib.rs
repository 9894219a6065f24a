//! Shared type definitions for the Tempo game-clock and scheduling engine.
//!
//! Every crate in the workspace speaks in these types: strongly-typed
//! identifiers, the domain event vocabulary, scheduled and fired event
//! records, and the engine status projections served to operators.
//!
//! Simulated time is represented as [`SimTime`] (a UTC timestamp) and
//! simulated durations as [`chrono::TimeDelta`]. Simulated time is never
//! mixed with wall-clock time: wall-clock durations only appear as the
//! real tick interval.

pub mod event;
pub mod ids;
pub mod status;

pub use event::{EventType, FiredEvent, Recurrence, ScheduledEvent, SimTime};
pub use ids::{EventId, ListenerId};
pub use status::{DispatchStats, EngineSnapshot, EngineStatus, TickReport};
