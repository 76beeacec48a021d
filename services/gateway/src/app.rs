//! Gateway HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, configures request tracing, and defines the
//! shared application state injected into handlers.
//!
//! # Notes
//! The project context is optional on purpose: when the project id is not
//! configured the routes stay mounted and every broker-backed handler
//! answers 503, mirroring the gateway's configuration-error taxonomy.
use crate::api;
use crate::api::error::{ApiError, api_unavailable};
use crate::observability;
use axum::Router;
use axum::routing::get;
use courier_broker::BrokerClient;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Resolved upstream project: its id plus an open broker client.
#[derive(Clone)]
pub struct ProjectContext {
    pub project_id: String,
    pub broker: Arc<dyn BrokerClient>,
}

impl ProjectContext {
    pub fn topic_resource(&self, name: &str) -> String {
        format!("projects/{}/topics/{}", self.project_id, name)
    }

    pub fn subscription_resource(&self, name: &str) -> String {
        format!("projects/{}/subscriptions/{}", self.project_id, name)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub project: Option<ProjectContext>,
    pub drain_window: Duration,
    pub teardown_slack: Duration,
}

impl AppState {
    pub fn project(&self) -> Result<&ProjectContext, ApiError> {
        self.project
            .as_ref()
            .ok_or_else(|| api_unavailable("project configuration missing"))
    }
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let parent = observability::trace_context_from_headers(request.headers());
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            );
            span.set_parent(parent);
            span
        });

    Router::new()
        .route("/", get(api::index))
        .route(
            "/topics",
            get(api::topics::list_topics).put(api::topics::create_topic),
        )
        .route(
            "/topics/:name",
            get(api::topics::get_topic)
                .post(api::topics::publish_to_topic)
                .delete(api::topics::delete_topic),
        )
        .route(
            "/subscriptions",
            get(api::subscriptions::list_subscriptions).put(api::subscriptions::create_subscription),
        )
        .route(
            "/subscriptions/:name",
            get(api::subscriptions::get_subscription)
                .post(api::subscriptions::receive_from_subscription)
                .delete(api::subscriptions::delete_subscription),
        )
        .layer(trace_layer)
        .with_state(state)
}
