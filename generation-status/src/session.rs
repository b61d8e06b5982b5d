//! Generation session: one engine, one channel adapter, one readiness gate
//!
//! Starting a session spawns the channel adapter and the engine consumer as
//! stream tasks and the settings fetch as a request task, all tracked in a
//! [`TaskRegistry`]. The host reads snapshots and readiness through watch
//! receivers and tears everything down with [`GenerationSession::shutdown`].

use generation_status_sdk::{ReadinessState, SnapshotSource, WorkflowSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::backend::{HttpBackend, ReadinessProbe, SettingsSource};
use crate::catalog::PhaseCatalog;
use crate::channel::{
    new_client_id, ChannelAdapter, ChannelConfig, ChannelMode, PollSource, PushConnector,
    ReadinessPoll, WorkflowStatusPoll, WsConnector,
};
use crate::config::EngineConfig;
use crate::enablement::ReviewSettings;
use crate::engine::{EngineCommand, StatusEngine};
use crate::error::{BackendError, GateError};
use crate::gate::{GateConfig, ReadinessGate};
use crate::task_registry::{TaskKind, TaskRegistry};

const EVENT_BUFFER: usize = 64;
const COMMAND_BUFFER: usize = 8;
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Which logical stream a session follows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSpec {
    /// Backend warm-up (`model_loading` / `models_ready`)
    Init,
    /// Workflow progress of one survey
    Workflow { survey_id: String },
}

impl StreamSpec {
    pub fn push_path(&self, client_id: &str) -> String {
        match self {
            StreamSpec::Init => format!("/ws/init/{}", client_id),
            StreamSpec::Workflow { survey_id } => {
                format!("/ws/workflow/{}/{}", survey_id, client_id)
            }
        }
    }

    /// Poll endpoint of the workflow feed; the init stream polls readiness
    pub fn poll_path(&self) -> Option<String> {
        match self {
            StreamSpec::Init => None,
            StreamSpec::Workflow { survey_id } => {
                Some(format!("/api/v1/surveys/{}/workflow/status", survey_id))
            }
        }
    }
}

/// Transports a session runs on
#[derive(Clone)]
pub struct Transports {
    pub connector: Arc<dyn PushConnector>,
    pub poller: Arc<dyn PollSource>,
    pub probe: Arc<dyn ReadinessProbe>,
    pub settings: Arc<dyn SettingsSource>,
}

impl Transports {
    /// reqwest and tokio-tungstenite transports for `config`
    pub fn http(config: &EngineConfig, stream: &StreamSpec) -> Result<Self, BackendError> {
        let backend = HttpBackend::with_timeout(&config.base_url, config.connect_timeout)?;
        let probe: Arc<dyn ReadinessProbe> = Arc::new(backend.clone());
        let poller: Arc<dyn PollSource> = match stream.poll_path() {
            Some(path) => Arc::new(WorkflowStatusPoll::new(backend.clone(), path)),
            None => Arc::new(ReadinessPoll::new(Arc::clone(&probe))),
        };

        Ok(Self {
            connector: Arc::new(WsConnector::new(&config.ws_url, config.connect_timeout)),
            poller,
            probe,
            settings: Arc::new(backend),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub poll_interval: Duration,
    pub gate: GateConfig,
}

impl From<&EngineConfig> for SessionOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            gate: config.gate.clone(),
        }
    }
}

pub struct GenerationSession {
    id: Uuid,
    client_id: String,
    snapshots: watch::Receiver<WorkflowSnapshot>,
    mode: watch::Receiver<ChannelMode>,
    gate: ReadinessGate,
    commands: mpsc::Sender<EngineCommand>,
    registry: TaskRegistry,
}

impl GenerationSession {
    /// Open a session against a live backend
    pub async fn connect(
        config: &EngineConfig,
        catalog: PhaseCatalog,
        stream: StreamSpec,
        registry: TaskRegistry,
    ) -> Result<Self, BackendError> {
        let transports = Transports::http(config, &stream)?;
        Ok(Self::start(catalog, stream, transports, SessionOptions::from(config), registry).await)
    }

    /// Spawn the session tasks on the given transports
    pub async fn start(
        catalog: PhaseCatalog,
        stream: StreamSpec,
        transports: Transports,
        options: SessionOptions,
        registry: TaskRegistry,
    ) -> Self {
        let id = Uuid::new_v4();
        let client_id = new_client_id();
        let cancel = registry.open(id).await;

        let gate = ReadinessGate::with_cancel(
            Arc::clone(&transports.probe),
            options.gate.clone(),
            cancel.child_token(),
        );

        // settings arrive later; review stays hidden until then
        let engine = StatusEngine::new(catalog, ReviewSettings::default());
        let snapshots = engine.subscribe();

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);

        let adapter = ChannelAdapter::new(
            transports.connector,
            transports.poller,
            ChannelConfig {
                push_path: stream.push_path(&client_id),
                poll_interval: options.poll_interval,
            },
        );
        let mode = adapter.mode();

        tracing::info!(
            session = %id,
            client_id = %client_id,
            stream = ?stream,
            "starting generation session"
        );

        let engine_task = tokio::spawn(engine.run(event_rx, command_rx, Some(gate.clone())));
        let adapter_task = adapter.spawn(event_tx, cancel.child_token());
        let settings_task = tokio::spawn(load_settings(
            transports.settings,
            gate.clone(),
            command_tx.clone(),
        ));

        registry.track(id, TaskKind::Stream, engine_task).await;
        registry.track(id, TaskKind::Stream, adapter_task).await;
        registry.track(id, TaskKind::Request, settings_task).await;

        Self {
            id,
            client_id,
            snapshots,
            mode,
            gate,
            commands: command_tx,
            registry,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn snapshots(&self) -> watch::Receiver<WorkflowSnapshot> {
        self.snapshots.clone()
    }

    pub fn readiness(&self) -> watch::Receiver<ReadinessState> {
        self.gate.subscribe()
    }

    pub fn mode(&self) -> watch::Receiver<ChannelMode> {
        self.mode.clone()
    }

    /// Gate for the host's own outbound requests
    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    /// Tell the engine whether the host has an active review for this run
    pub async fn set_active_review(&self, active: bool) {
        if self
            .commands
            .send(EngineCommand::SetActiveReview(active))
            .await
            .is_err()
        {
            tracing::debug!(session = %self.id, "engine already stopped");
        }
    }

    /// Resolves with the terminal snapshot, or `None` if the engine stopped
    /// without reaching one
    pub async fn wait_for_terminal(&self) -> Option<WorkflowSnapshot> {
        let mut snapshots = self.snapshots.clone();
        let reached = snapshots
            .wait_for(|snapshot| snapshot.is_terminal())
            .await
            .map(|snapshot| (*snapshot).clone())
            .ok();

        reached.or_else(|| {
            let last = snapshots.borrow().clone();
            last.is_terminal().then_some(last)
        })
    }

    /// Close the channel and stop retry scheduling
    ///
    /// The adapter and engine get a short grace period to stop on their own.
    /// A settings request already in flight is left to finish.
    pub async fn shutdown(&self) {
        tracing::info!(session = %self.id, "shutting down generation session");
        self.registry.close(&self.id, SHUTDOWN_GRACE).await;
    }
}

impl SnapshotSource for GenerationSession {
    fn current(&self) -> WorkflowSnapshot {
        self.snapshots.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<WorkflowSnapshot> {
        self.snapshots.clone()
    }
}

/// Fetch evaluation settings through the gate; any failure keeps review
/// disabled
async fn load_settings(
    source: Arc<dyn SettingsSource>,
    gate: ReadinessGate,
    commands: mpsc::Sender<EngineCommand>,
) {
    let source = &source;
    let fetched = gate
        .execute(|| async move { source.fetch_settings().await.map_err(GateError::from) })
        .await;

    let settings = match fetched {
        Ok(settings) => ReviewSettings::from(settings),
        Err(GateError::Cancelled) => {
            tracing::debug!("session closed before settings were fetched");
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "evaluation settings unavailable, review phase disabled");
            return;
        }
    };

    if commands.send(EngineCommand::SetSettings(settings)).await.is_err() {
        tracing::debug!("engine stopped before settings arrived");
    }
}
