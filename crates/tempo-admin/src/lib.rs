//! Admin HTTP control surface for the Tempo engine.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **Status** (`GET /api/status`) -- an [`EngineSnapshot`] of clock,
//!   queue, and delivery counters
//! - **Engine lifecycle** -- start, stop, and single-step ticks for
//!   deployments driven by an external cron trigger
//! - **Clock controls** -- pause, resume, set time, fast-forward, speed
//! - **Event scheduling** -- list, inspect, cancel, and create one-shot
//!   or recurring events
//!
//! Every handler is a thin call into the shared [`Engine`]; the engine's
//! own locking makes these safe to call between and during ticks.
//!
//! [`EngineSnapshot`]: tempo_types::EngineSnapshot
//! [`Engine`]: tempo_core::Engine

pub mod control;
pub mod error;
pub mod events;
pub mod router;
pub mod server;
pub mod state;

pub use router::build_router;
pub use server::{ServerError, spawn_admin, start_server};
pub use state::AppState;
