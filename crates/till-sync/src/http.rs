//! HTTP transport implementation.
//!
//! This module builds the `/sync` requests and classifies responses. The
//! actual HTTP client is abstracted via a trait so the host application can
//! plug in whatever library it already ships. The `reqwest` feature provides
//! a ready-made client, `ReqwestClient`.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::connectivity::AuthToken;
use crate::error::{Result, SyncError};
use crate::messages::{AckStatus, PullResponse, PushAck, PushRequest, PushResponse};
use crate::transport::Transport;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A request handed to the [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

/// Status code and body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Why the client could not complete an exchange.
#[derive(Debug, Error)]
pub enum HttpFailure {
    /// DNS, refused connection, no route.
    #[error("connect failed: {0}")]
    Connect(#[source] anyhow::Error),

    /// The client's own deadline fired.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Anything else (TLS, broken pipe mid-body).
    #[error("request failed: {0}")]
    Other(#[source] anyhow::Error),
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, HttpFailure>;
}

/// HTTP-based sync transport speaking JSON.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the sync server (e.g., "https://pos.example.com/api").
    base_url: String,
    /// HTTP client implementation.
    client: C,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn sync_url(&self) -> String {
        format!("{}/sync", self.base_url)
    }

    fn headers(token: &AuthToken) -> Vec<(String, String)> {
        vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", token.as_str()),
            ),
            ("Accept".to_string(), "application/json".to_string()),
        ]
    }

    async fn exchange(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = self.client.send(request).await.map_err(|e| match e {
            HttpFailure::Connect(source) => SyncError::Connectivity(source.to_string()),
            HttpFailure::Timeout(after) => SyncError::Timeout(after),
            HttpFailure::Other(source) => SyncError::Transport(source.to_string()),
        })?;

        match response.status {
            200..=299 => Ok(response),
            401 | 403 => Err(SyncError::Auth(format!("HTTP {}", response.status))),
            400 | 422 => Err(SyncError::ServerRejected(body_text(&response))),
            408 | 429 | 500..=599 => Err(SyncError::Transport(format!(
                "HTTP {}: {}",
                response.status,
                body_text(&response)
            ))),
            other => Err(SyncError::Transport(format!("unexpected HTTP {}", other))),
        }
    }
}

fn body_text(response: &HttpResponse) -> String {
    String::from_utf8_lossy(&response.body).trim().to_string()
}

fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    serde_json::from_slice(&response.body)
        .map_err(|e| SyncError::InvalidMessage(format!("failed to decode response: {}", e)))
}

#[async_trait]
impl<C: HttpClient> Transport for HttpTransport<C> {
    async fn push(&self, token: &AuthToken, request: &PushRequest) -> Result<PushResponse> {
        let body = serde_json::to_vec(request)
            .map_err(|e| SyncError::InvalidMessage(format!("failed to encode request: {}", e)))?;
        let mut headers = Self::headers(token);
        headers.push(("Content-Type".to_string(), "application/json".to_string()));

        let result = self
            .exchange(HttpRequest {
                method: Method::Post,
                url: self.sync_url(),
                headers,
                body: Some(body),
            })
            .await;

        match result {
            Ok(response) => decode(&response),
            // A 400/422 on push refuses the whole batch.
            Err(SyncError::ServerRejected(reason)) => Ok(PushResponse {
                acks: request
                    .changes
                    .iter()
                    .map(|m| PushAck::new(m.id, AckStatus::Rejected).with_reason(reason.clone()))
                    .collect(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn pull(&self, token: &AuthToken, since: Option<i64>) -> Result<PullResponse> {
        let url = match since {
            Some(ts) => format!("{}?last_pulled_at={}", self.sync_url(), ts),
            None => self.sync_url(),
        };
        let response = self
            .exchange(HttpRequest {
                method: Method::Get,
                url,
                headers: Self::headers(token),
                body: None,
            })
            .await?;
        let pulled: PullResponse = decode(&response)?;
        pulled
            .validate_limits()
            .map_err(|e| SyncError::InvalidMessage(e.to_string()))?;
        Ok(pulled)
    }
}
