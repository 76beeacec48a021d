//! Gateway HTTP API module.
//!
//! # Purpose
//! Exposes the route handler modules plus shared helpers for resolving the
//! project context and validating topic/subscription existence.
pub mod error;
pub mod subscriptions;
pub mod topics;
pub mod types;

use crate::api::error::{ApiError, api_internal, api_not_found};
use crate::app::ProjectContext;

const DOC: &str = "Courier Pub/Sub Gateway
-----------------------
GET    /topics                      # list topics
PUT    /topics                      # create topic;        payload: '{\"name\":\"<topic-name>\"}'
POST   /topics/<topic-name>         # publish messages;    payload: '[\"<message-1-text>\", \"<message-2-text>\", ...]'
DELETE /topics/<topic-name>         # delete topic

GET    /subscriptions               # list subscriptions
PUT    /subscriptions               # create subscription: payload: '{\"name\":\"<subscr-name>\", \"topic\":\"<topic-name>\"}'
POST   /subscriptions/<subscr-name> # receive messages;    payload: (none)
DELETE /subscriptions/<subscr-name> # delete subscription
";

/// `GET /` self-documentation page.
pub(crate) async fn index() -> &'static str {
    DOC
}

pub(crate) async fn ensure_topic(project: &ProjectContext, name: &str) -> Result<(), ApiError> {
    let exists = project
        .broker
        .topic_exists(name)
        .await
        .map_err(|err| api_internal("failed to check topic existence", &err))?;
    if !exists {
        return Err(api_not_found(&format!("topic {name} not found")));
    }
    Ok(())
}

pub(crate) async fn ensure_subscription(
    project: &ProjectContext,
    name: &str,
) -> Result<(), ApiError> {
    let exists = project
        .broker
        .subscription_exists(name)
        .await
        .map_err(|err| api_internal("failed to check subscription existence", &err))?;
    if !exists {
        return Err(api_not_found(&format!("subscription {name} not found")));
    }
    Ok(())
}
