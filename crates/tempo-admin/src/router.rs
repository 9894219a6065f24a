//! Axum router construction for the admin API.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{control, events};

/// Build the complete admin router.
///
/// See [`control`] and [`events`] for the endpoint tables. CORS allows any
/// origin so an admin UI can be served from elsewhere.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(control::status))
        // Engine lifecycle
        .route("/api/engine/start", post(control::start))
        .route("/api/engine/stop", post(control::stop))
        .route("/api/engine/tick", post(control::tick))
        // Clock
        .route("/api/clock/pause", post(control::pause))
        .route("/api/clock/resume", post(control::resume))
        .route("/api/clock/time", post(control::set_time))
        .route("/api/clock/fast-forward", post(control::fast_forward))
        .route("/api/clock/speed", post(control::set_speed))
        // Events
        .route("/api/events", get(events::list_events))
        .route(
            "/api/events/{id}",
            get(events::get_event).delete(events::cancel_event),
        )
        .route("/api/events/once", post(events::schedule_once))
        .route("/api/events/recurring", post(events::schedule_recurring))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
