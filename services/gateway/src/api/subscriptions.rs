//! Subscription API handlers.
//!
//! # Purpose
//! Subscription listing, creation, deletion, and the bounded-window
//! receive endpoint. A receive drains the subscription's push stream for
//! the configured window and reports every delivered (and acked) message;
//! attribute keys are rendered sorted for deterministic output.
use crate::api::ensure_subscription;
use crate::api::error::{
    ApiError, api_conflict, api_internal, api_not_found, api_unavailable, api_validation_error,
};
use crate::api::types::SubscriptionCreateRequest;
use crate::app::AppState;
use crate::pipeline::drain;
use axum::body::Bytes;
use axum::extract::{Path, State};
use courier_broker::{BrokerError, Message, SubscriptionConfig};
use std::fmt::Write;

pub(crate) async fn list_subscriptions(State(state): State<AppState>) -> Result<String, ApiError> {
    let project = state.project()?;
    let subscriptions = project
        .broker
        .list_subscriptions()
        .await
        .map_err(|err| api_internal("failed to list subscriptions", &err))?;
    let mut body = String::from("Subscriptions\n-------------\n");
    if subscriptions.is_empty() {
        body.push_str("(none)\n");
    }
    for name in subscriptions {
        let _ = writeln!(body, "{}", project.subscription_resource(&name));
    }
    Ok(body)
}

pub(crate) async fn create_subscription(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<String, ApiError> {
    let project = state.project()?;
    let request: SubscriptionCreateRequest = serde_json::from_slice(&body)
        .map_err(|err| api_validation_error(&format!("invalid subscription payload: {err}")))?;
    match project
        .broker
        .create_subscription(&request.name, &request.topic, SubscriptionConfig::default())
        .await
    {
        Ok(()) => Ok(format!(
            "created subscription {}\n",
            project.subscription_resource(&request.name)
        )),
        Err(BrokerError::TopicNotFound(topic)) => {
            Err(api_not_found(&format!("topic {topic} not found")))
        }
        Err(BrokerError::SubscriptionExists(name)) => {
            Err(api_conflict(&format!("subscription {name} already exists")))
        }
        Err(err) => Err(api_internal("failed to create subscription", &err)),
    }
}

pub(crate) async fn get_subscription(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Result<String, ApiError> {
    let project = state.project()?;
    ensure_subscription(project, &name).await?;
    Ok(format!("{}\n", project.subscription_resource(&name)))
}

pub(crate) async fn receive_from_subscription(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Result<String, ApiError> {
    let project = state.project()?;
    ensure_subscription(project, &name).await?;
    let subscriber = project
        .broker
        .subscriber(&name)
        .await
        .map_err(|err| api_internal("failed to open subscriber", &err))?;

    let outcome = drain(subscriber, state.drain_window, state.teardown_slack).await;

    let mut body = String::new();
    if let Some(err) = &outcome.error {
        // Partial batches collected before the error are still reported.
        let _ = writeln!(body, "receive: {err}");
    }
    for (i, message) in outcome.messages.iter().enumerate() {
        render_message(&mut body, i, message);
    }
    Ok(body)
}

fn render_message(body: &mut String, index: usize, message: &Message) {
    let _ = writeln!(
        body,
        "[{index}] Data: \"{}\"",
        String::from_utf8_lossy(&message.data)
    );
    if message.attributes.is_empty() {
        return;
    }
    let _ = writeln!(body, "[{index}] Attributes:");
    let mut keys: Vec<&String> = message.attributes.keys().collect();
    keys.sort();
    for key in keys {
        let _ = writeln!(body, "    {key} = {}", message.attributes[key]);
    }
}

pub(crate) async fn delete_subscription(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Result<String, ApiError> {
    let project = state.project()?;
    ensure_subscription(project, &name).await?;
    let resource = project.subscription_resource(&name);
    project
        .broker
        .delete_subscription(&name)
        .await
        .map_err(|err| api_unavailable(&format!("failed to delete subscription: {err}")))?;
    Ok(format!("deleted subscription {resource}\n"))
}
