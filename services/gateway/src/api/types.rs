//! HTTP API request/response types.
//!
//! # Purpose
//! Success bodies on this gateway are plain text and line-oriented, so the
//! shared shapes here are the structured error body plus the create-request
//! payloads parsed by hand in the handlers.
use serde::{Deserialize, Serialize};

/// JSON error body attached to every non-2xx response.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

/// `PUT /topics` payload.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TopicCreateRequest {
    pub name: String,
}

/// `PUT /subscriptions` payload.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubscriptionCreateRequest {
    pub name: String,
    pub topic: String,
}
