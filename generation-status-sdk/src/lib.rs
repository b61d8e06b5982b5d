//! Shared data model for the generation status engine
//!
//! Host applications only need this crate to render progress: they read
//! [`WorkflowSnapshot`] values, render [`ReadinessState`] countdowns, and feed
//! [`StatusEvent`] values into whatever implements [`SnapshotSource`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::watch;
use uuid::Uuid;

// ============================================================================
// Phase definitions
// ============================================================================

/// Inclusive percent range `[low, high]` owned by a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PercentRange {
    pub low: u8,
    pub high: u8,
}

impl PercentRange {
    pub fn new(low: u8, high: u8) -> Self {
        Self { low, high }
    }

    /// Whether `percent` falls inside this range (both ends inclusive)
    pub fn contains(&self, percent: f64) -> bool {
        percent >= f64::from(self.low) && percent <= f64::from(self.high)
    }
}

/// Finer-grained label shown under the active phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubStepDefinition {
    pub key: String,
    pub label: String,
    /// Identifier the backend reports in `current_step`
    pub backend_step_id: String,
}

impl SubStepDefinition {
    pub fn new(
        key: impl Into<String>,
        label: impl Into<String>,
        backend_step_id: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            backend_step_id: backend_step_id.into(),
        }
    }
}

/// A coarse, user-facing stage of generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDefinition {
    pub key: String,
    pub label: String,
    /// Presentation copy, never interpreted by the engine
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub sub_steps: Vec<SubStepDefinition>,
    #[serde(default)]
    pub percent_range: PercentRange,
    /// Only shown when review is enabled or observed (human review)
    #[serde(default)]
    pub conditional: bool,
}

impl PhaseDefinition {
    /// Sub-step whose backend id equals `backend_step_id`
    pub fn sub_step_for(&self, backend_step_id: &str) -> Option<&SubStepDefinition> {
        self.sub_steps
            .iter()
            .find(|s| s.backend_step_id == backend_step_id)
    }

    pub fn owns_step(&self, backend_step_id: &str) -> bool {
        self.sub_step_for(backend_step_id).is_some()
    }
}

// ============================================================================
// Status events
// ============================================================================

/// Terminal outcome of a generation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    Completed,
    Failed,
}

/// Normalized status update, regardless of which transport produced it
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusEvent {
    pub backend_step_id: Option<String>,
    pub progress_percent: Option<f64>,
    pub message: Option<String>,
    #[serde(default)]
    pub paused: bool,
    pub terminal: Option<Terminal>,
}

impl StatusEvent {
    /// Event reporting a backend step together with its progress
    pub fn step(backend_step_id: impl Into<String>, progress_percent: f64) -> Self {
        Self {
            backend_step_id: Some(backend_step_id.into()),
            progress_percent: Some(progress_percent),
            ..Default::default()
        }
    }

    /// Event carrying only progress
    pub fn progress(progress_percent: f64) -> Self {
        Self {
            progress_percent: Some(progress_percent),
            ..Default::default()
        }
    }

    pub fn terminal(terminal: Terminal) -> Self {
        Self {
            terminal: Some(terminal),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    /// Progress is explicitly zero, the marker for a restarted run
    pub fn is_zero_progress(&self) -> bool {
        self.progress_percent == Some(0.0)
    }

    /// An event with no usable field carries nothing to reduce
    pub fn is_empty(&self) -> bool {
        self.backend_step_id.is_none()
            && self.progress_percent.is_none()
            && self.message.is_none()
            && !self.paused
            && self.terminal.is_none()
    }
}

// ============================================================================
// Workflow snapshot
// ============================================================================

/// Overall workflow state as rendered to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Idle,
    Started,
    InProgress,
    Paused,
    Completed,
    Failed,
}

impl GenerationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationStatus::Completed | GenerationStatus::Failed)
    }
}

/// Immutable view of workflow progress
///
/// Produced only by the phase reducer and replaced wholesale on every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub enabled_phases: Vec<PhaseDefinition>,
    pub current_phase_index: usize,
    pub completed_phase_indices: BTreeSet<usize>,
    pub current_sub_step_key: Option<String>,
    pub paused: bool,
    pub terminal: Option<Terminal>,
    /// Last accepted progress percent
    pub progress_percent: Option<f64>,
    pub message: Option<String>,
    /// Number of events applied since the last restart
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowSnapshot {
    /// Snapshot before any event has been observed
    pub fn initial(enabled_phases: Vec<PhaseDefinition>) -> Self {
        Self {
            enabled_phases,
            current_phase_index: 0,
            completed_phase_indices: BTreeSet::new(),
            current_sub_step_key: None,
            paused: false,
            terminal: None,
            progress_percent: None,
            message: None,
            revision: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn current_phase(&self) -> Option<&PhaseDefinition> {
        self.enabled_phases.get(self.current_phase_index)
    }

    pub fn current_sub_step(&self) -> Option<&SubStepDefinition> {
        let key = self.current_sub_step_key.as_deref()?;
        self.current_phase()?
            .sub_steps
            .iter()
            .find(|s| s.key == key)
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn is_phase_completed(&self, index: usize) -> bool {
        self.completed_phase_indices.contains(&index)
    }

    /// State-machine value derived from the snapshot fields
    pub fn status(&self) -> GenerationStatus {
        match self.terminal {
            Some(Terminal::Completed) => GenerationStatus::Completed,
            Some(Terminal::Failed) => GenerationStatus::Failed,
            None if self.revision == 0 => GenerationStatus::Idle,
            None if self.paused => GenerationStatus::Paused,
            None if self.current_phase_index == 0
                && self.completed_phase_indices.is_empty()
                && self.progress_percent.unwrap_or(0.0) <= 0.0 =>
            {
                GenerationStatus::Started
            }
            None => GenerationStatus::InProgress,
        }
    }
}

/// Read side of the engine, implemented by anything publishing snapshots
pub trait SnapshotSource: Send + Sync {
    /// Latest published snapshot
    fn current(&self) -> WorkflowSnapshot;

    /// Receiver notified on every replacement
    fn subscribe(&self) -> watch::Receiver<WorkflowSnapshot>;
}

// ============================================================================
// Readiness gating
// ============================================================================

/// Backend warm-up state rendered as a countdown while gated
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReadinessState {
    pub gated: bool,
    pub progress_percent: Option<f64>,
    pub eta_seconds: Option<f64>,
    pub phase: Option<String>,
    pub message: Option<String>,
}

impl ReadinessState {
    /// Gated state built from a "too early" payload
    pub fn from_loading(payload: &LoadingPayload) -> Self {
        Self {
            gated: true,
            progress_percent: payload.progress,
            eta_seconds: payload.estimated_seconds,
            phase: payload.phase.clone(),
            message: payload.message.clone(),
        }
    }

    pub fn ready() -> Self {
        Self::default()
    }
}

/// Bookkeeping for one gated outbound call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryEnvelope {
    pub request_id: Uuid,
    pub attempt: u32,
    pub max_attempts: u32,
    pub next_delay_ms: u64,
}

impl RetryEnvelope {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            attempt: 0,
            max_attempts,
            next_delay_ms: 0,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

// ============================================================================
// Wire payloads
// ============================================================================

/// Body of a "too early" response or a `model_loading` push message
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoadingPayload {
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub estimated_seconds: Option<f64>,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Messages on the `/ws/init/{clientId}` push channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InitMessage {
    ModelLoading(LoadingPayload),
    ModelsReady,
}

/// Update on the workflow status feed
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkflowStatusUpdate {
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub workflow_paused: bool,
    #[serde(default)]
    pub survey_id: Option<String>,
}

/// `200` body of the readiness endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub ready: bool,
}

/// Body of `GET /api/v1/settings/evaluation`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluationSettings {
    #[serde(default)]
    pub enable_prompt_review: bool,
    #[serde(default)]
    pub prompt_review_mode: String,
}

// ============================================================================
// Console Logging Macros
// ============================================================================
// Colored console output for the CLI, complementing the structured tracing
// events emitted by the engine.
// ============================================================================

/// Logs entry into a phase with its position and sub-step.
///
/// # Example
/// ```
/// use generation_status_sdk::log_phase_start_console;
/// log_phase_start_console!(1, 5, "Building Context", "Analyzing documents");
/// ```
///
/// Outputs:
/// ```text
/// ═══ PHASE 1/5: Building Context ═══
/// Analyzing documents
/// ```
#[macro_export]
macro_rules! log_phase_start_console {
    ($phase:expr, $total:expr, $title:expr, $detail:expr) => {
        println!(
            "\x1b[1;36m═══ PHASE {}/{}: {} ═══\x1b[0m",
            $phase, $total, $title
        );
        println!("\x1b[36m{}\x1b[0m", $detail);
    };
}

/// Logs the completion of a phase.
///
/// # Example
/// ```
/// use generation_status_sdk::log_phase_complete_console;
/// log_phase_complete_console!("Building Context");
/// ```
///
/// Outputs:
/// ```text
/// ✓ Building Context complete
/// ```
#[macro_export]
macro_rules! log_phase_complete_console {
    ($title:expr) => {
        println!("\x1b[32m✓ {} complete\x1b[0m", $title);
    };
}

/// Logs a readiness countdown line.
///
/// # Example
/// ```
/// use generation_status_sdk::log_readiness;
/// log_readiness!(42.0, 30.0, "Loading models");
/// ```
///
/// Outputs:
/// ```text
/// ⏳ Backend warming up: 42% (~30s) Loading models
/// ```
#[macro_export]
macro_rules! log_readiness {
    ($progress:expr, $eta:expr, $message:expr) => {
        println!(
            "\x1b[33m⏳ Backend warming up: {:.0}% (~{:.0}s) {}\x1b[0m",
            $progress, $eta, $message
        );
    };
}

/// Logs progress of the running workflow.
///
/// # Example
/// ```
/// use generation_status_sdk::log_progress;
/// log_progress!(64.0, "Generating questions");
/// ```
///
/// Outputs:
/// ```text
/// Progress: 64% Generating questions
/// ```
#[macro_export]
macro_rules! log_progress {
    ($percent:expr, $message:expr) => {
        println!("\x1b[36mProgress: {:.0}% {}\x1b[0m", $percent, $message);
    };
}

/// Logs an informational message.
///
/// # Example
/// ```
/// use generation_status_sdk::log_info;
/// log_info!("Connecting to backend...");
/// ```
///
/// Outputs:
/// ```text
/// ℹ Connecting to backend...
/// ```
#[macro_export]
macro_rules! log_info {
    ($message:expr) => {
        println!("\x1b[36mℹ {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[36mℹ {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs a warning message.
///
/// # Example
/// ```
/// use generation_status_sdk::log_warning;
/// log_warning!("Push channel unavailable, polling instead");
/// ```
///
/// Outputs:
/// ```text
/// ⚠ Warning: Push channel unavailable, polling instead
/// ```
#[macro_export]
macro_rules! log_warning {
    ($message:expr) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

// ============================================================================
// End of Console Logging Macros
// ============================================================================
