//! Readiness gate and retry queue
//!
//! Wraps outbound requests while the backend is still warming up. A request
//! answered with "too early" flips the gate into the gated state, publishes
//! the loading progress on a watch channel for countdown rendering, waits
//! for readiness with bounded backoff and then re-issues the same request.
//!
//! Only one readiness poll loop ever runs: every caller that finds the gate
//! closed awaits the same shared future.

use futures::future::{BoxFuture, FutureExt, Shared};
use generation_status_sdk::{LoadingPayload, ReadinessState, RetryEnvelope};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::backend::{Readiness, ReadinessProbe};
use crate::error::GateError;

/// Response of a gated request
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome<T> {
    Ready(T),
    TooEarly(LoadingPayload),
}

/// Backoff bounds for readiness retries
#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    /// Floor for every retry delay
    pub min_delay: Duration,
    /// Ceiling for every retry delay
    pub max_delay: Duration,
    /// Retries before giving up with [`GateError::ModelsNotReady`]
    pub max_attempts: u32,
    /// Share of the backend's ETA to wait before the next check
    pub eta_fraction: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_attempts: 60,
            eta_fraction: 0.5,
        }
    }
}

impl GateConfig {
    /// Delay before the next readiness check given the backend's ETA
    pub fn delay_for(&self, eta_seconds: Option<f64>) -> Duration {
        let ceiling = self.max_delay.max(self.min_delay);
        match eta_seconds.filter(|eta| eta.is_finite() && *eta > 0.0) {
            Some(eta) => Duration::try_from_secs_f64(eta * self.eta_fraction)
                .unwrap_or(ceiling)
                .clamp(self.min_delay, ceiling),
            None => self.min_delay,
        }
    }
}

type ReadyWait = Shared<BoxFuture<'static, Result<(), GateError>>>;

struct GateInner {
    probe: Arc<dyn ReadinessProbe>,
    config: GateConfig,
    state: watch::Sender<ReadinessState>,
    waiting: Mutex<Option<ReadyWait>>,
    cancel: CancellationToken,
}

/// Cheaply cloneable handle; clones share state and the poll loop
#[derive(Clone)]
pub struct ReadinessGate {
    inner: Arc<GateInner>,
}

impl ReadinessGate {
    pub fn new(probe: Arc<dyn ReadinessProbe>, config: GateConfig) -> Self {
        Self::with_cancel(probe, config, CancellationToken::new())
    }

    pub fn with_cancel(
        probe: Arc<dyn ReadinessProbe>,
        config: GateConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ReadinessState::default());
        Self {
            inner: Arc::new(GateInner {
                probe,
                config,
                state,
                waiting: Mutex::new(None),
                cancel,
            }),
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ReadinessState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReadinessState> {
        self.inner.state.subscribe()
    }

    pub fn is_gated(&self) -> bool {
        self.inner.state.borrow().gated
    }

    /// Adopt readiness observed elsewhere (e.g. the push channel)
    pub fn observe(&self, state: ReadinessState) {
        self.inner.state.send_replace(state);
    }

    pub fn mark_not_ready(&self, payload: &LoadingPayload) {
        self.observe(ReadinessState::from_loading(payload));
    }

    pub fn mark_ready(&self) {
        self.observe(ReadinessState::ready());
    }

    /// Stop scheduling retries; calls already in flight still finish
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Wait until the backend reports ready
    ///
    /// Returns immediately when not gated. Concurrent callers share one
    /// poll loop.
    pub async fn wait_until_ready(&self) -> Result<(), GateError> {
        if !self.is_gated() {
            return Ok(());
        }
        self.shared_wait().await
    }

    fn shared_wait(&self) -> ReadyWait {
        let mut slot = self
            .inner
            .waiting
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = slot.as_ref() {
            return existing.clone();
        }

        let inner = Arc::clone(&self.inner);
        let wait = async move {
            let result = poll_until_ready(&inner).await;
            clear_wait(&inner);
            result
        }
        .boxed()
        .shared();

        *slot = Some(wait.clone());
        wait
    }

    /// Run `request`, deferring and retrying it while the backend is not ready
    ///
    /// The request is re-issued only after readiness is observed, so a
    /// successful result is produced exactly once.
    pub async fn execute<T, E, F, Fut>(&self, mut request: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<GateOutcome<T>, E>>,
        E: From<GateError>,
    {
        let max_attempts = self.inner.config.max_attempts.max(1);
        let mut attempts = 0u32;

        loop {
            if self.is_gated() {
                self.wait_until_ready().await?;
            }
            if attempts > 0 && self.is_cancelled() {
                return Err(GateError::Cancelled.into());
            }

            attempts += 1;
            match request().await? {
                GateOutcome::Ready(value) => {
                    if self.is_gated() {
                        self.mark_ready();
                    }
                    return Ok(value);
                }
                GateOutcome::TooEarly(payload) => {
                    tracing::info!(
                        attempt = attempts,
                        progress = ?payload.progress,
                        eta_seconds = ?payload.estimated_seconds,
                        phase = ?payload.phase,
                        "backend not ready, request deferred"
                    );
                    self.mark_not_ready(&payload);
                    if attempts >= max_attempts {
                        tracing::error!(attempts, "request gave up waiting for backend readiness");
                        return Err(GateError::ModelsNotReady { attempts }.into());
                    }
                }
            }
        }
    }
}

fn clear_wait(inner: &GateInner) {
    let mut slot = inner
        .waiting
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    slot.take();
}

async fn poll_until_ready(inner: &GateInner) -> Result<(), GateError> {
    let mut envelope = RetryEnvelope::new(inner.config.max_attempts);
    let mut changes = inner.state.subscribe();

    loop {
        if inner.cancel.is_cancelled() {
            return Err(GateError::Cancelled);
        }
        let (gated, eta) = {
            let state = inner.state.borrow();
            (state.gated, state.eta_seconds)
        };
        if !gated {
            return Ok(());
        }
        if envelope.is_exhausted() {
            tracing::error!(
                request_id = %envelope.request_id,
                attempts = envelope.attempt,
                "models failed to become ready"
            );
            return Err(GateError::ModelsNotReady {
                attempts: envelope.attempt,
            });
        }

        let delay = inner.config.delay_for(eta);
        envelope.next_delay_ms = delay.as_millis() as u64;
        tracing::debug!(
            request_id = %envelope.request_id,
            attempt = envelope.attempt + 1,
            max_attempts = envelope.max_attempts,
            delay_ms = envelope.next_delay_ms,
            "waiting before readiness check"
        );

        if backoff(inner, &mut changes, delay).await? {
            return Ok(());
        }

        envelope.attempt += 1;
        match inner.probe.check_ready().await {
            Ok(Readiness::Ready) => {
                tracing::info!(attempts = envelope.attempt, "backend ready");
                inner.state.send_replace(ReadinessState::ready());
                return Ok(());
            }
            Ok(Readiness::Loading(payload)) => {
                inner.state.send_replace(ReadinessState::from_loading(&payload));
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt = envelope.attempt, "readiness check failed");
            }
        }
    }
}

/// Sleep for `delay`; `Ok(true)` when readiness arrived from elsewhere first
async fn backoff(
    inner: &GateInner,
    changes: &mut watch::Receiver<ReadinessState>,
    delay: Duration,
) -> Result<bool, GateError> {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => return Err(GateError::Cancelled),
            _ = &mut sleep => return Ok(false),
            changed = changes.changed() => {
                if changed.is_err() {
                    (&mut sleep).await;
                    return Ok(false);
                }
                let gated = changes.borrow_and_update().gated;
                if !gated {
                    return Ok(true);
                }
            }
        }
    }
}
