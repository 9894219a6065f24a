//! Scheduled event handlers: the per-entity scheduling interface over HTTP.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/api/events` | Pending events in due order |
//! | `GET` | `/api/events/{id}` | One pending event |
//! | `DELETE` | `/api/events/{id}` | Cancel a pending event |
//! | `POST` | `/api/events/once` | Schedule a one-shot event |
//! | `POST` | `/api/events/recurring` | Schedule a recurring event |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use tempo_types::{EventId, EventType, SimTime};

use crate::error::AdminError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request body for `POST /api/events/once`.
#[derive(Debug, Deserialize)]
pub struct ScheduleOnceRequest {
    /// Event type to fire.
    pub event_type: EventType,
    /// Simulated time to fire at (RFC 3339). Past times fire next tick.
    pub due_at: SimTime,
    /// Payload delivered to listeners.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Request body for `POST /api/events/recurring`.
#[derive(Debug, Deserialize)]
pub struct ScheduleRecurringRequest {
    /// Event type to fire.
    pub event_type: EventType,
    /// Simulated seconds between occurrences; the first is one interval
    /// from now.
    pub interval_secs: u64,
    /// Payload delivered to listeners on every occurrence.
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    id: EventId,
    cancelled: bool,
}

// ---------------------------------------------------------------------------
// GET /api/events
// ---------------------------------------------------------------------------

/// List pending events in due order.
pub async fn list_events(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.scheduler().list())
}

// ---------------------------------------------------------------------------
// GET /api/events/{id}, DELETE /api/events/{id}
// ---------------------------------------------------------------------------

/// Return one pending event.
pub async fn get_event(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
) -> Result<impl IntoResponse, AdminError> {
    let id = parse_event_id(&id_str)?;
    let event = state
        .engine
        .scheduler()
        .get(id)
        .ok_or_else(|| AdminError::NotFound(format!("event {id}")))?;
    Ok(Json(event))
}

/// Cancel a pending event.
pub async fn cancel_event(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
) -> Result<impl IntoResponse, AdminError> {
    let id = parse_event_id(&id_str)?;
    if !state.engine.scheduler().cancel(id) {
        return Err(AdminError::NotFound(format!("event {id}")));
    }
    Ok(Json(CancelResponse {
        id,
        cancelled: true,
    }))
}

// ---------------------------------------------------------------------------
// POST /api/events/once, /api/events/recurring
// ---------------------------------------------------------------------------

/// Schedule a one-shot event. Responds `201` with the stored event.
pub async fn schedule_once(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ScheduleOnceRequest>,
) -> Result<impl IntoResponse, AdminError> {
    let event = state
        .engine
        .scheduler()
        .schedule_once_event(body.event_type, body.due_at, body.payload)?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// Schedule a recurring event. Responds `201` with the stored event.
pub async fn schedule_recurring(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ScheduleRecurringRequest>,
) -> Result<impl IntoResponse, AdminError> {
    let interval = i64::try_from(body.interval_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .ok_or_else(|| {
            AdminError::BadRequest(format!("interval_secs {} is out of range", body.interval_secs))
        })?;

    let event = state
        .engine
        .scheduler()
        .schedule_recurring_event(body.event_type, interval, body.payload)?;
    Ok((StatusCode::CREATED, Json(event)))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_event_id(s: &str) -> Result<EventId, AdminError> {
    s.parse::<EventId>()
        .map_err(|e| AdminError::BadRequest(format!("invalid event id {s}: {e}")))
}
