//! HTTP handlers that forward fired domain events to collaborators.
//!
//! Each built-in event type maps to one collaborator route under
//! `collaborator.base_url`. The handler POSTs the [`FiredEvent`] as JSON
//! and treats any non-2xx response as a failed delivery. Retries are left
//! to the collaborator.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt as _;
use futures::future::BoxFuture;
use tempo_core::config::{CollaboratorConfig, TempoConfig};
use tempo_core::{BootstrapError, BootstrapPlan, EventHandler, HandlerError, HandlerResult};
use tempo_types::{EventType, FiredEvent};
use tracing::debug;

/// Event types with a collaborator route, in bootstrap order.
const ROUTED_TYPES: [EventType; 4] = [
    EventType::Payroll,
    EventType::ContractDeadline,
    EventType::SkillDecay,
    EventType::TrainingComplete,
];

/// Collaborator path for a built-in event type.
pub const fn route_for(event_type: &EventType) -> Option<&'static str> {
    match event_type {
        EventType::Payroll => Some("/payroll/run"),
        EventType::ContractDeadline => Some("/contracts/sweep"),
        EventType::SkillDecay => Some("/skills/decay"),
        EventType::TrainingComplete => Some("/training/complete"),
        EventType::Custom(_) => None,
    }
}

/// Build the shared HTTP client with the configured timeout.
///
/// # Errors
///
/// Returns the client builder error if TLS initialization fails.
pub fn build_client(config: &CollaboratorConfig) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms))
        .build()
}

/// Forwards fired events to one collaborator endpoint.
#[derive(Debug, Clone)]
pub struct CollaboratorHandler {
    client: reqwest::Client,
    url: String,
}

impl CollaboratorHandler {
    /// Create a handler posting to `{base_url}{path}`.
    pub fn new(client: reqwest::Client, base_url: &str, path: &str) -> Self {
        Self {
            client,
            url: format!("{}{path}", base_url.trim_end_matches('/')),
        }
    }

    /// The endpoint this handler posts to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl EventHandler for CollaboratorHandler {
    fn handle(&self, event: FiredEvent) -> BoxFuture<'static, HandlerResult> {
        let client = self.client.clone();
        let url = self.url.clone();
        async move { post_event(&client, &url, &event).await }.boxed()
    }
}

async fn post_event(client: &reqwest::Client, url: &str, event: &FiredEvent) -> HandlerResult {
    let response = client
        .post(url)
        .json(event)
        .send()
        .await
        .map_err(|e| HandlerError::failed(format!("request to {url} failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "unable to read error body".to_owned());
        return Err(HandlerError::failed(format!(
            "{url} returned {status}: {error_body}"
        )));
    }

    debug!(
        event_id = %event.event_id,
        event_type = %event.event_type,
        %url,
        "Collaborator accepted event"
    );
    Ok(())
}

/// Plan one collaborator listener per routed event type plus the
/// configured recurring jobs.
///
/// # Errors
///
/// Returns [`BootstrapError::Config`] if a configured job is unusable.
pub fn bootstrap_plan(
    config: &TempoConfig,
    client: &reqwest::Client,
) -> Result<BootstrapPlan, BootstrapError> {
    let base_url = &config.collaborator.base_url;
    let plan = ROUTED_TYPES
        .iter()
        .filter_map(|event_type| route_for(event_type).map(|path| (event_type, path)))
        .fold(BootstrapPlan::new(), |plan, (event_type, path)| {
            let handler = CollaboratorHandler::new(client.clone(), base_url, path);
            plan.listener(
                event_type.clone(),
                format!("collaborator:{path}"),
                Arc::new(handler),
            )
        });
    plan.jobs_from_config(&config.jobs)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use chrono::DateTime;
    use tempo_types::EventId;
    use tokio::net::TcpListener;

    use super::*;

    fn fired(event_type: EventType) -> FiredEvent {
        FiredEvent {
            event_id: EventId::new(),
            event_type,
            payload: serde_json::json!({ "company_id": 3 }),
            scheduled_for: DateTime::UNIX_EPOCH,
            fired_at: DateTime::UNIX_EPOCH,
            recurring: true,
        }
    }

    async fn collaborator() -> String {
        let app = Router::new()
            .route(
                "/payroll/run",
                post(|axum::Json(body): axum::Json<serde_json::Value>| async move {
                    if body["event_type"] == "payroll" {
                        StatusCode::NO_CONTENT
                    } else {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                }),
            )
            .route(
                "/skills/decay",
                post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "skills offline") }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}/")
    }

    #[test]
    fn every_builtin_type_has_a_route() {
        for event_type in &ROUTED_TYPES {
            assert!(route_for(event_type).is_some());
        }
        assert_eq!(route_for(&EventType::Custom("x".to_owned())), None);
    }

    #[test]
    fn url_joins_without_double_slash() {
        let handler =
            CollaboratorHandler::new(reqwest::Client::new(), "http://hr.local/", "/payroll/run");
        assert_eq!(handler.url(), "http://hr.local/payroll/run");
    }

    #[tokio::test]
    async fn success_status_is_ok() {
        let base = collaborator().await;
        let handler = CollaboratorHandler::new(reqwest::Client::new(), &base, "/payroll/run");
        assert_eq!(handler.handle(fired(EventType::Payroll)).await, Ok(()));
    }

    #[tokio::test]
    async fn error_status_is_a_failure_with_body() {
        let base = collaborator().await;
        let handler = CollaboratorHandler::new(reqwest::Client::new(), &base, "/skills/decay");
        let err = handler
            .handle(fired(EventType::SkillDecay))
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            HandlerError::Failed { message }
                if message.contains("503") && message.contains("skills offline")
        ));
    }

    #[test]
    fn plan_has_one_listener_per_route_and_configured_jobs() {
        let config = TempoConfig::default();
        let plan = bootstrap_plan(&config, &reqwest::Client::new()).unwrap();
        assert_eq!(plan.listeners().len(), ROUTED_TYPES.len());
        assert_eq!(plan.jobs().len(), config.jobs.len());
    }
}
