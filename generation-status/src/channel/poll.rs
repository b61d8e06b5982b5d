//! Pull sources used when the push channel is unavailable

use async_trait::async_trait;
use std::sync::Arc;

use super::normalize::{from_loading, from_workflow_update, ready_event};
use super::ChannelEvent;
use crate::backend::{HttpBackend, Readiness, ReadinessProbe};
use crate::error::BackendError;

/// One status request per poll tick
#[async_trait]
pub trait PollSource: Send + Sync {
    /// `Ok(None)` when the response carried nothing usable
    async fn poll_status(&self) -> Result<Option<ChannelEvent>, BackendError>;
}

/// Polls the readiness endpoint
pub struct ReadinessPoll {
    probe: Arc<dyn ReadinessProbe>,
}

impl ReadinessPoll {
    pub fn new(probe: Arc<dyn ReadinessProbe>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl PollSource for ReadinessPoll {
    async fn poll_status(&self) -> Result<Option<ChannelEvent>, BackendError> {
        match self.probe.check_ready().await? {
            Readiness::Ready => Ok(Some(ready_event())),
            Readiness::Loading(payload) => match from_loading(payload) {
                Ok(event) => Ok(Some(event)),
                Err(e) => {
                    tracing::warn!(error = %e, "discarding malformed readiness payload");
                    Ok(None)
                }
            },
        }
    }
}

/// Polls a survey's workflow status endpoint
pub struct WorkflowStatusPoll {
    backend: HttpBackend,
    path: String,
}

impl WorkflowStatusPoll {
    pub fn new(backend: HttpBackend, path: impl Into<String>) -> Self {
        Self {
            backend,
            path: path.into(),
        }
    }
}

#[async_trait]
impl PollSource for WorkflowStatusPoll {
    async fn poll_status(&self) -> Result<Option<ChannelEvent>, BackendError> {
        let update = self.backend.fetch_workflow_status(&self.path).await?;
        match from_workflow_update(update) {
            Ok(event) => Ok(Some(event)),
            Err(e) => {
                tracing::warn!(error = %e, "discarding malformed workflow status");
                Ok(None)
            }
        }
    }
}
