//! Courier gateway library.
//!
//! Exposes the service modules for integration testing.
pub mod api;
pub mod app;
pub mod config;
pub mod observability;
pub mod pipeline;
