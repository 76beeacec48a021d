use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_DRAIN_WINDOW_MS: u64 = 1_000;
pub const DEFAULT_TEARDOWN_SLACK_MS: u64 = 250;

// Gateway configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    pub project: Option<String>,
    pub drain_window: Duration,
    pub teardown_slack: Duration,
}

#[derive(Debug, Deserialize)]
struct GatewayConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    project: Option<String>,
    drain_window_ms: Option<u64>,
    teardown_slack_ms: Option<u64>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        // Legacy PORT is honored when COURIER_BIND is absent.
        let bind_addr = match std::env::var("COURIER_BIND") {
            Ok(value) => value.parse().with_context(|| "parse COURIER_BIND")?,
            Err(_) => {
                let port = match std::env::var("PORT") {
                    Ok(port) => port,
                    Err(_) => {
                        tracing::info!("defaulting to port 8080");
                        "8080".to_string()
                    }
                };
                format!("0.0.0.0:{port}")
                    .parse()
                    .with_context(|| "parse PORT")?
            }
        };
        let metrics_bind = std::env::var("COURIER_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:9090".to_string())
            .parse()
            .with_context(|| "parse COURIER_METRICS_BIND")?;
        let project = std::env::var("COURIER_PROJECT").ok().filter(|p| !p.is_empty());
        let drain_window_ms = match std::env::var("COURIER_DRAIN_WINDOW_MS") {
            Ok(value) => value
                .parse()
                .with_context(|| "parse COURIER_DRAIN_WINDOW_MS")?,
            Err(_) => DEFAULT_DRAIN_WINDOW_MS,
        };
        let teardown_slack_ms = match std::env::var("COURIER_TEARDOWN_SLACK_MS") {
            Ok(value) => value
                .parse()
                .with_context(|| "parse COURIER_TEARDOWN_SLACK_MS")?,
            Err(_) => DEFAULT_TEARDOWN_SLACK_MS,
        };
        Ok(Self {
            bind_addr,
            metrics_bind,
            project,
            drain_window: Duration::from_millis(drain_window_ms),
            teardown_slack: Duration::from_millis(teardown_slack_ms),
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("COURIER_CONFIG") {
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read COURIER_CONFIG: {path}"))?;
            let override_cfg: GatewayConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse gateway config yaml")?;
            if let Some(value) = override_cfg.bind_addr {
                config.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
            }
            if let Some(value) = override_cfg.metrics_bind {
                config.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
            }
            if let Some(value) = override_cfg.project {
                config.project = Some(value);
            }
            if let Some(value) = override_cfg.drain_window_ms {
                config.drain_window = Duration::from_millis(value);
            }
            if let Some(value) = override_cfg.teardown_slack_ms {
                config.teardown_slack = Duration::from_millis(value);
            }
        }
        Ok(config)
    }
}
