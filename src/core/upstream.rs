//! HTTP client for the protected origin.
//!
//! This module owns the forwarding path and the liveness probe. Both
//! run under bounded timeouts so an unreachable or stalled origin can
//! never wedge the gateway; a timed-out forward is dropped along with
//! its connection.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::OriginConfig;

/// Errors that can occur while talking to the origin
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("origin request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Origin liveness as reported by the health probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Up,
    Down,
}

/// Verbatim origin response relayed to the caller
#[derive(Debug)]
pub struct OriginResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Client for the origin server behind the gateway
pub struct OriginClient {
    client: Client,
    base_url: String,
    forward_timeout: Duration,
    probe_timeout: Duration,
}

impl OriginClient {
    pub fn new(config: &OriginConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            forward_timeout: Duration::from_secs(config.forward_timeout_secs),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
        }
    }

    /// Forward a request to the origin and return its status and body
    /// unmodified
    pub async fn forward(
        &self,
        method: Method,
        path_and_query: &str,
        headers: HeaderMap,
        body: Vec<u8>,
    ) -> Result<OriginResponse, UpstreamError> {
        let url = format!("{}{}", self.base_url, path_and_query);

        let mut request = self
            .client
            .request(method, &url)
            .timeout(self.forward_timeout)
            .headers(headers);
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        Ok(OriginResponse { status, body })
    }

    /// Probe the origin root with a short timeout
    pub async fn probe(&self) -> BackendStatus {
        match self
            .client
            .get(&self.base_url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().as_u16() < 500 => BackendStatus::Up,
            _ => BackendStatus::Down,
        }
    }
}
