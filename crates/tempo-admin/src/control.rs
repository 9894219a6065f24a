//! Engine lifecycle and clock control handlers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/api/status` | Engine snapshot |
//! | `POST` | `/api/engine/start` | Start accepting ticks |
//! | `POST` | `/api/engine/stop` | Stop accepting ticks |
//! | `POST` | `/api/engine/tick` | Run one tick (external trigger) |
//! | `POST` | `/api/clock/pause` | Freeze simulated time |
//! | `POST` | `/api/clock/resume` | Unfreeze simulated time |
//! | `POST` | `/api/clock/time` | Set simulated time |
//! | `POST` | `/api/clock/fast-forward` | Jump simulated time forward |
//! | `POST` | `/api/clock/speed` | Change multiplier and/or tick interval |

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use tempo_types::{EngineSnapshot, SimTime};
use tracing::warn;

use crate::error::AdminError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request body for `POST /api/clock/time`.
#[derive(Debug, Deserialize)]
pub struct SetTimeRequest {
    /// New simulated time (RFC 3339).
    pub time: SimTime,
}

/// Request body for `POST /api/clock/fast-forward`.
#[derive(Debug, Deserialize)]
pub struct FastForwardRequest {
    /// Simulated seconds to jump forward.
    pub seconds: u64,
}

/// Request body for `POST /api/clock/speed`.
#[derive(Debug, Deserialize)]
pub struct SetSpeedRequest {
    /// Simulated milliseconds per real millisecond.
    pub time_multiplier: Option<u32>,
    /// Real-time milliseconds between ticks (minimum 10).
    pub tick_interval_ms: Option<u64>,
}

/// Response for lifecycle and clock commands.
#[derive(Debug, Serialize)]
struct ControlResponse {
    /// Whether the command changed anything.
    changed: bool,
    /// Human-readable message.
    message: String,
    /// Engine state after the command.
    snapshot: EngineSnapshot,
}

/// Response for time changes.
#[derive(Debug, Serialize)]
struct TimeChangeResponse {
    previous: SimTime,
    current: SimTime,
}

// ---------------------------------------------------------------------------
// GET /api/status
// ---------------------------------------------------------------------------

/// Return the engine snapshot.
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.snapshot())
}

// ---------------------------------------------------------------------------
// POST /api/engine/start, /api/engine/stop
// ---------------------------------------------------------------------------

/// Start the engine. Starting a running engine is not an error.
pub async fn start(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AdminError> {
    let changed = state.engine.start()?;
    let message = if changed {
        "Engine started"
    } else {
        "Engine already running"
    };
    Ok(Json(ControlResponse {
        changed,
        message: message.to_owned(),
        snapshot: state.engine.snapshot(),
    }))
}

/// Stop the engine. Pending events are kept.
pub async fn stop(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let changed = state.engine.stop();
    let message = if changed {
        "Engine stopped"
    } else {
        "Engine already stopped"
    };
    Json(ControlResponse {
        changed,
        message: message.to_owned(),
        snapshot: state.engine.snapshot(),
    })
}

// ---------------------------------------------------------------------------
// POST /api/engine/tick
// ---------------------------------------------------------------------------

/// Run one tick and return its report.
///
/// Rejects with `409` if the engine is stopped or a tick is already in
/// flight, so an overlapping cron trigger is visible to its caller.
pub async fn tick(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AdminError> {
    let report = state.engine.try_tick_once().await?;
    Ok(Json(report))
}

// ---------------------------------------------------------------------------
// POST /api/clock/pause, /api/clock/resume
// ---------------------------------------------------------------------------

/// Freeze simulated time.
pub async fn pause(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.engine.pause();
    Json(ControlResponse {
        changed: true,
        message: "Clock paused".to_owned(),
        snapshot: state.engine.snapshot(),
    })
}

/// Unfreeze simulated time.
pub async fn resume(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.engine.resume();
    Json(ControlResponse {
        changed: true,
        message: "Clock resumed".to_owned(),
        snapshot: state.engine.snapshot(),
    })
}

// ---------------------------------------------------------------------------
// POST /api/clock/time, /api/clock/fast-forward
// ---------------------------------------------------------------------------

/// Replace simulated time.
pub async fn set_time(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SetTimeRequest>,
) -> impl IntoResponse {
    let previous = state.engine.set_time(body.time);
    Json(TimeChangeResponse {
        previous,
        current: body.time,
    })
}

/// Jump simulated time forward.
pub async fn fast_forward(
    State(state): State<Arc<AppState>>,
    Json(body): Json<FastForwardRequest>,
) -> Result<impl IntoResponse, AdminError> {
    let delta = i64::try_from(body.seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .ok_or_else(|| AdminError::BadRequest(format!("{} seconds is out of range", body.seconds)))?;

    let previous = state.engine.now();
    let current = state.engine.fast_forward(delta)?;
    Ok(Json(TimeChangeResponse { previous, current }))
}

// ---------------------------------------------------------------------------
// POST /api/clock/speed
// ---------------------------------------------------------------------------

/// Change the time multiplier and/or the tick interval.
///
/// If the interval is rejected after the multiplier was applied, the
/// multiplier is restored.
pub async fn set_speed(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SetSpeedRequest>,
) -> Result<impl IntoResponse, AdminError> {
    if body.time_multiplier.is_none() && body.tick_interval_ms.is_none() {
        return Err(AdminError::BadRequest(
            "expected time_multiplier and/or tick_interval_ms".to_owned(),
        ));
    }

    let engine = &state.engine;
    let previous_multiplier = body
        .time_multiplier
        .map(|multiplier| engine.set_time_multiplier(multiplier))
        .transpose()?;

    if let Some(interval_ms) = body.tick_interval_ms {
        if let Err(err) = engine.set_tick_interval(Duration::from_millis(interval_ms)) {
            if let Some(previous) = previous_multiplier {
                if let Err(restore_err) = engine.set_time_multiplier(previous) {
                    warn!(%restore_err, "Could not restore time multiplier");
                }
            }
            return Err(err.into());
        }
    }

    Ok(Json(ControlResponse {
        changed: true,
        message: "Speed updated".to_owned(),
        snapshot: engine.snapshot(),
    }))
}
