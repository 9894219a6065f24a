//! Simulated clock, event store, dispatcher, and tick engine for Tempo.
//!
//! This crate owns the tick cycle that drives simulated game time: the
//! clock advances, due events are selected in `(due_at, sequence)` order,
//! recurring events are rescheduled by exactly one interval per
//! occurrence, and every occurrence is handed to its listeners.
//!
//! # Modules
//!
//! - [`clock`] -- Simulated clock with pause, jump, and speed controls.
//! - [`config`] -- Configuration loading from `tempo-config.yaml` into
//!   strongly-typed structs.
//! - [`store`] -- Pending events with an ordered due-index.
//! - [`dispatcher`] -- [`EventHandler`] trait and bounded, isolated
//!   delivery.
//! - [`scheduler`] -- [`Scheduler`] facade for creating and cancelling
//!   events.
//! - [`engine`] -- [`Engine`] handle: ticking, admin controls, snapshots.
//! - `runner` -- Real-time tick timer spawned by [`Engine::start`].
//! - [`bootstrap`] -- [`Bootstrapper`] for one-time listener and job
//!   wiring.
//!
//! [`EventHandler`]: dispatcher::EventHandler
//! [`Scheduler`]: scheduler::Scheduler
//! [`Engine`]: engine::Engine
//! [`Engine::start`]: engine::Engine::start
//! [`Bootstrapper`]: bootstrap::Bootstrapper

pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod engine;
mod runner;
pub mod scheduler;
pub mod store;

pub use bootstrap::{BootstrapError, BootstrapOutcome, BootstrapPlan, Bootstrapper, JobSpec};
pub use clock::{ClockError, SimulatedClock};
pub use config::{ConfigError, DriverMode, TempoConfig};
pub use dispatcher::{Dispatcher, EventHandler, HandlerError, HandlerResult, handler_fn};
pub use engine::{Engine, EngineError};
pub use scheduler::Scheduler;
pub use store::{EventStore, ScheduleError};
