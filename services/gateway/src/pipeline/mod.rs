//! Core request pipelines.
//!
//! # Purpose
//! Composes the broker client's async primitives into the two bounded,
//! synchronous operations the HTTP surface exposes: the fan-out publish
//! coordinator and the bounded-window drain receiver.
pub mod drain;
pub mod publish;

pub use drain::{DrainOutcome, drain};
pub use publish::{PublishOutcome, publish_all};
