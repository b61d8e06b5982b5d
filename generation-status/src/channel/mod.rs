//! Channel adapter: push first, pull on failure
//!
//! The adapter opens the push channel and forwards every normalized message
//! to the engine. When the channel cannot be opened or errors out it switches
//! to fixed-interval polling. The two modes run strictly one after the other
//! inside a single task, so push and pull never overlap.

pub mod normalize;
pub mod poll;
pub mod ws;

use futures::StreamExt;
use generation_status_sdk::{ReadinessState, StatusEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ChannelError;
pub use normalize::normalize;
pub use poll::{PollSource, ReadinessPoll, WorkflowStatusPoll};
pub use ws::{MessageStream, PushConnector, WsConnector};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Normalized output of either transport
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub status: StatusEvent,
    /// Set by readiness messages so the gate can follow the push stream
    pub readiness: Option<ReadinessState>,
}

impl ChannelEvent {
    pub fn status(status: StatusEvent) -> Self {
        Self {
            status,
            readiness: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.terminal.is_some()
    }
}

/// Which transport is currently delivering events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Connecting,
    Push,
    Poll,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    /// Push channel path, already keyed by the client id
    pub push_path: String,
    pub poll_interval: Duration,
}

/// Locally generated correlation token for the push channel
pub fn new_client_id() -> String {
    Uuid::new_v4().simple().to_string()
}

enum PushExit {
    Finished,
    Failed(ChannelError),
}

pub struct ChannelAdapter {
    connector: Arc<dyn PushConnector>,
    poller: Arc<dyn PollSource>,
    config: ChannelConfig,
    mode: watch::Sender<ChannelMode>,
}

impl ChannelAdapter {
    pub fn new(
        connector: Arc<dyn PushConnector>,
        poller: Arc<dyn PollSource>,
        config: ChannelConfig,
    ) -> Self {
        let (mode, _) = watch::channel(ChannelMode::Connecting);
        Self {
            connector,
            poller,
            config,
            mode,
        }
    }

    pub fn mode(&self) -> watch::Receiver<ChannelMode> {
        self.mode.subscribe()
    }

    pub fn spawn(
        self,
        events: mpsc::Sender<ChannelEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(events, cancel))
    }

    /// Deliver events until a terminal event, cancellation, or the consumer
    /// going away
    pub async fn run(self, events: mpsc::Sender<ChannelEvent>, cancel: CancellationToken) {
        match self.run_push(&events, &cancel).await {
            PushExit::Finished => {}
            PushExit::Failed(err) => {
                tracing::warn!(error = %err, "push channel unavailable, falling back to polling");
                self.run_poll(&events, &cancel).await;
            }
        }
        self.mode.send_replace(ChannelMode::Closed);
        tracing::debug!("channel adapter stopped");
    }

    async fn run_push(
        &self,
        events: &mpsc::Sender<ChannelEvent>,
        cancel: &CancellationToken,
    ) -> PushExit {
        self.mode.send_replace(ChannelMode::Connecting);

        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return PushExit::Finished,
            opened = self.connector.connect(&self.config.push_path) => match opened {
                Ok(stream) => stream,
                Err(e) => return PushExit::Failed(e),
            },
        };
        self.mode.send_replace(ChannelMode::Push);
        tracing::debug!(path = %self.config.push_path, "receiving status over push channel");

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return PushExit::Finished,
                frame = stream.next() => frame,
            };

            match frame {
                Some(Ok(text)) => match normalize(&text) {
                    Ok(event) => {
                        if !forward(events, event).await {
                            return PushExit::Finished;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "discarding malformed status payload");
                    }
                },
                Some(Err(e)) => return PushExit::Failed(e),
                None => return PushExit::Failed(ChannelError::Closed),
            }
        }
    }

    async fn run_poll(&self, events: &mpsc::Sender<ChannelEvent>, cancel: &CancellationToken) {
        self.mode.send_replace(ChannelMode::Poll);

        // tokio intervals cannot have a zero period
        let period = self.config.poll_interval.max(MIN_POLL_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let polled = tokio::select! {
                _ = cancel.cancelled() => return,
                polled = self.poller.poll_status() => polled,
            };

            match polled {
                Ok(Some(event)) => {
                    if !forward(events, event).await {
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::debug!(error = %e, "status poll failed"),
            }
        }
    }
}

/// Send to the engine; `false` once the adapter should stop
async fn forward(events: &mpsc::Sender<ChannelEvent>, event: ChannelEvent) -> bool {
    let terminal = event.is_terminal();
    if events.send(event).await.is_err() {
        tracing::debug!("status consumer gone");
        return false;
    }
    !terminal
}
