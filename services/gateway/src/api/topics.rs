//! Topic API handlers.
//!
//! # Purpose
//! Topic listing, creation, deletion, and the fan-out publish endpoint.
//! Success bodies are plain text and line-oriented; publish reports one
//! result line per input message, in input order.
use crate::api::ensure_topic;
use crate::api::error::{
    ApiError, api_conflict, api_internal, api_unavailable, api_validation_error,
};
use crate::api::types::TopicCreateRequest;
use crate::app::AppState;
use crate::pipeline::{PublishOutcome, publish_all};
use axum::body::Bytes;
use axum::extract::{Path, State};
use courier_broker::{BrokerError, Message};
use std::fmt::Write;

pub(crate) async fn list_topics(State(state): State<AppState>) -> Result<String, ApiError> {
    let project = state.project()?;
    let topics = project
        .broker
        .list_topics()
        .await
        .map_err(|err| api_internal("failed to list topics", &err))?;
    let mut body = String::from("Topics\n------\n");
    if topics.is_empty() {
        body.push_str("(none)\n");
    }
    for name in topics {
        let _ = writeln!(body, "{}", project.topic_resource(&name));
    }
    Ok(body)
}

pub(crate) async fn create_topic(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<String, ApiError> {
    let project = state.project()?;
    // Parsed by hand so malformed JSON and missing fields are both 400.
    let request: TopicCreateRequest = serde_json::from_slice(&body)
        .map_err(|err| api_validation_error(&format!("invalid topic payload: {err}")))?;
    match project.broker.create_topic(&request.name).await {
        Ok(()) => Ok(format!(
            "created topic {}\n",
            project.topic_resource(&request.name)
        )),
        Err(BrokerError::TopicExists(name)) => {
            Err(api_conflict(&format!("topic {name} already exists")))
        }
        Err(err) => Err(api_internal("failed to create topic", &err)),
    }
}

pub(crate) async fn get_topic(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Result<String, ApiError> {
    let project = state.project()?;
    ensure_topic(project, &name).await?;
    Ok(format!("{}\n", project.topic_resource(&name)))
}

pub(crate) async fn publish_to_topic(
    Path(name): Path<String>,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<String, ApiError> {
    let project = state.project()?;
    ensure_topic(project, &name).await?;
    let payloads: Vec<String> = serde_json::from_slice(&body)
        .map_err(|err| api_validation_error(&format!("invalid publish payload: {err}")))?;

    let publisher = project
        .broker
        .publisher(&name)
        .await
        .map_err(|err| api_internal("failed to open publisher", &err))?;
    let messages = payloads.into_iter().map(Message::from_text).collect();
    let outcomes = publish_all(publisher, messages).await;

    let mut body = String::new();
    for (i, outcome) in outcomes.iter().enumerate() {
        match outcome {
            PublishOutcome::Published { id } => {
                let _ = writeln!(body, "[{i}] published message ID {id}");
            }
            PublishOutcome::Failed { error } => {
                let _ = writeln!(body, "[{i}] {error}");
            }
        }
    }
    Ok(body)
}

pub(crate) async fn delete_topic(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Result<String, ApiError> {
    let project = state.project()?;
    ensure_topic(project, &name).await?;
    let resource = project.topic_resource(&name);
    project
        .broker
        .delete_topic(&name)
        .await
        .map_err(|err| api_unavailable(&format!("failed to delete topic: {err}")))?;
    Ok(format!("deleted topic {resource}\n"))
}
