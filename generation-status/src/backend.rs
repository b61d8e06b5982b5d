//! HTTP access to the generation backend
//!
//! The engine talks to the backend through the [`ReadinessProbe`] and
//! [`SettingsSource`] traits so transports can be swapped in tests;
//! [`HttpBackend`] is the reqwest implementation.

use async_trait::async_trait;
use generation_status_sdk::{EvaluationSettings, LoadingPayload, ReadyResponse, WorkflowStatusUpdate};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::BackendError;
use crate::gate::GateOutcome;

pub const READY_PATH: &str = "/api/v1/admin/ready";
pub const SETTINGS_PATH: &str = "/api/v1/settings/evaluation";

/// HTTP 425, the backend's "still warming up" marker
pub const TOO_EARLY: u16 = 425;

/// Answer of the readiness endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum Readiness {
    Ready,
    Loading(LoadingPayload),
}

#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn check_ready(&self) -> Result<Readiness, BackendError>;
}

#[async_trait]
pub trait SettingsSource: Send + Sync {
    /// A warming backend answers [`GateOutcome::TooEarly`]
    async fn fetch_settings(&self) -> Result<GateOutcome<EvaluationSettings>, BackendError>;
}

/// reqwest client bound to one backend base URL
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    client: Client,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GET `path`, reporting a 425 as [`GateOutcome::TooEarly`]
    ///
    /// This is the shape [`crate::gate::ReadinessGate::execute`] expects from
    /// gated application requests.
    pub async fn get_gated<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<GateOutcome<T>, BackendError> {
        let response = self.client.get(self.url(path)).send().await?;
        if response.status().as_u16() == TOO_EARLY {
            return Ok(GateOutcome::TooEarly(loading_payload(response).await));
        }
        let response = ensure_success(response).await?;
        Ok(GateOutcome::Ready(response.json::<T>().await?))
    }

    /// Latest update of a survey's workflow status feed
    pub async fn fetch_workflow_status(
        &self,
        path: &str,
    ) -> Result<WorkflowStatusUpdate, BackendError> {
        let response = self.client.get(self.url(path)).send().await?;
        let response = ensure_success(response).await?;
        Ok(response.json::<WorkflowStatusUpdate>().await?)
    }
}

#[async_trait]
impl ReadinessProbe for HttpBackend {
    async fn check_ready(&self) -> Result<Readiness, BackendError> {
        let response = self.client.get(self.url(READY_PATH)).send().await?;
        if response.status().as_u16() == TOO_EARLY {
            return Ok(Readiness::Loading(loading_payload(response).await));
        }

        let response = ensure_success(response).await?;
        let body: ReadyResponse = response.json().await?;
        if body.ready {
            Ok(Readiness::Ready)
        } else {
            Ok(Readiness::Loading(LoadingPayload::default()))
        }
    }
}

#[async_trait]
impl SettingsSource for HttpBackend {
    async fn fetch_settings(&self) -> Result<GateOutcome<EvaluationSettings>, BackendError> {
        self.get_gated(SETTINGS_PATH).await
    }
}

/// A 425 body that fails to parse still gates, just without a countdown
async fn loading_payload(response: Response) -> LoadingPayload {
    match response.json::<LoadingPayload>().await {
        Ok(payload) => payload,
        Err(e) => {
            tracing::debug!(error = %e, "too-early response without a loading payload");
            LoadingPayload::default()
        }
    }
}

async fn ensure_success(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    })
}
