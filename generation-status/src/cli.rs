//! Command-line interface of the `genstatus` binary.
//!
//! - `watch`: follow a generation run (or backend warm-up) until terminal
//! - `ready`: block until the backend reports its models ready
//! - `catalog`: print the enabled phases for given review settings

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use generation_status_sdk::{
    log_info, log_phase_complete_console, log_phase_start_console, log_progress, log_readiness,
    log_warning, GenerationStatus, ReadinessState, Terminal, WorkflowSnapshot,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{HttpBackend, Readiness, ReadinessProbe};
use crate::config::EngineConfig;
use crate::enablement::{self, ReviewEvidence, ReviewSettings};
use crate::error::GateError;
use crate::gate::{GateOutcome, ReadinessGate};
use crate::session::{GenerationSession, StreamSpec};
use crate::task_registry::TaskRegistry;

/// Generation status synchronization client
///
/// Follows backend generation progress over the push channel (falling back
/// to polling) and renders it as user-facing phases.
#[derive(Parser, Debug, Clone)]
#[command(name = "genstatus")]
#[command(about = "Generation status synchronization client")]
#[command(version)]
pub struct Args {
    /// Backend base URL (overrides GENSTATUS_BASE_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    /// Push channel base URL (overrides GENSTATUS_WS_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub ws_url: Option<String>,

    /// Phase catalog YAML file (overrides GENSTATUS_CATALOG)
    #[arg(long, global = true, value_name = "PATH")]
    pub catalog: Option<PathBuf>,

    /// Poll interval used after falling back from the push channel
    #[arg(long, global = true, value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// Log level for the engine when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Follow progress until the run completes or fails
    Watch {
        /// Survey whose workflow to follow; omit to follow backend warm-up
        #[arg(long, value_name = "ID")]
        survey_id: Option<String>,

        /// Show the review phase because a review is active for this run
        #[arg(long)]
        active_review: bool,

        /// Print every snapshot as JSON instead of console lines
        #[arg(long)]
        json: bool,
    },

    /// Wait until the backend reports its models ready
    Ready {
        /// Readiness checks before giving up
        #[arg(long, value_name = "N")]
        max_attempts: Option<u32>,
    },

    /// Print the enabled phases with their percent ranges
    Catalog {
        /// Resolve as if review were enabled in the settings
        #[arg(long)]
        enable_review: bool,

        /// Resolve as if a review were active
        #[arg(long)]
        active_review: bool,
    },
}

impl Args {
    /// Environment configuration with command-line overrides applied
    pub fn config(&self) -> Result<EngineConfig> {
        let mut config = EngineConfig::from_env()?;
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(base_url.clone());
        }
        if let Some(ws_url) = &self.ws_url {
            config.ws_url = ws_url.trim_end_matches('/').to_string();
        }
        if let Some(path) = &self.catalog {
            config.catalog_path = Some(path.clone());
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }
}

pub async fn run(args: Args) -> Result<()> {
    let config = args.config()?;

    match args.command {
        Command::Watch {
            survey_id,
            active_review,
            json,
        } => {
            let stream = match survey_id {
                Some(survey_id) => StreamSpec::Workflow { survey_id },
                None => StreamSpec::Init,
            };
            watch(&config, stream, active_review, json).await
        }
        Command::Ready { max_attempts } => {
            let mut config = config;
            if let Some(max_attempts) = max_attempts {
                config.gate.max_attempts = max_attempts;
            }
            ready(&config).await
        }
        Command::Catalog {
            enable_review,
            active_review,
        } => print_catalog(&config, enable_review, active_review),
    }
}

async fn watch(
    config: &EngineConfig,
    stream: StreamSpec,
    active_review: bool,
    json: bool,
) -> Result<()> {
    let catalog = config.load_catalog()?;
    let registry = TaskRegistry::new();
    let session = GenerationSession::connect(config, catalog, stream, registry.clone())
        .await
        .context("failed to open generation session")?;

    if active_review {
        session.set_active_review(true).await;
    }

    let mut snapshots = session.snapshots();
    let mut readiness = session.readiness();
    let mut console = ConsoleView::default();

    log_info!("Following generation status ({})", session.client_id());

    let outcome = loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break None;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if json {
                    println!("{}", serde_json::to_string(&snapshot)?);
                } else {
                    console.render(&snapshot);
                }
                if let Some(terminal) = snapshot.terminal {
                    break Some(terminal);
                }
            }
            changed = readiness.changed() => {
                if changed.is_ok() && !json {
                    let state = readiness.borrow_and_update().clone();
                    render_readiness(&state);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log_warning!("Interrupted");
                break None;
            }
        }
    };

    session.shutdown().await;

    match outcome {
        Some(Terminal::Completed) => Ok(()),
        Some(Terminal::Failed) => anyhow::bail!("generation failed"),
        None => anyhow::bail!("status stream ended before the run finished"),
    }
}

async fn ready(config: &EngineConfig) -> Result<()> {
    let backend = HttpBackend::with_timeout(&config.base_url, config.connect_timeout)?;
    let probe: Arc<dyn ReadinessProbe> = Arc::new(backend);
    let gate = ReadinessGate::new(Arc::clone(&probe), config.gate.clone());

    let mut readiness = gate.subscribe();
    let countdown = tokio::spawn(async move {
        while readiness.changed().await.is_ok() {
            let state = readiness.borrow_and_update().clone();
            render_readiness(&state);
        }
    });

    let probe = &probe;
    let result = gate
        .execute(|| async move {
            let outcome = match probe.check_ready().await? {
                Readiness::Ready => GateOutcome::Ready(()),
                Readiness::Loading(payload) => GateOutcome::TooEarly(payload),
            };
            Ok::<_, GateError>(outcome)
        })
        .await;
    countdown.abort();

    result.context("backend did not become ready")?;
    log_info!("Backend ready");
    Ok(())
}

fn print_catalog(config: &EngineConfig, enable_review: bool, active_review: bool) -> Result<()> {
    let catalog = config.load_catalog()?;
    let settings = ReviewSettings {
        enable_review,
        review_mode: String::new(),
    };
    let evidence = ReviewEvidence {
        active_review_exists: active_review,
        ..Default::default()
    };
    let phases = enablement::resolve(&catalog, &settings, &evidence);
    println!("{}", serde_json::to_string_pretty(&phases)?);
    Ok(())
}

fn render_readiness(state: &ReadinessState) {
    if state.gated {
        log_readiness!(
            state.progress_percent.unwrap_or(0.0),
            state.eta_seconds.unwrap_or(0.0),
            state.message.as_deref().unwrap_or("")
        );
    }
}

/// Tracks what has been printed so each change is shown once
#[derive(Debug, Default)]
struct ConsoleView {
    phase: Option<usize>,
    completed: usize,
    progress: Option<f64>,
    status: Option<GenerationStatus>,
}

impl ConsoleView {
    fn render(&mut self, snapshot: &WorkflowSnapshot) {
        for index in snapshot.completed_phase_indices.iter().skip(self.completed) {
            if let Some(phase) = snapshot.enabled_phases.get(*index) {
                log_phase_complete_console!(phase.label);
            }
        }
        self.completed = snapshot.completed_phase_indices.len();

        if self.phase != Some(snapshot.current_phase_index) && !snapshot.is_terminal() {
            if let Some(phase) = snapshot.current_phase() {
                let detail = snapshot
                    .current_sub_step()
                    .map(|s| s.label.as_str())
                    .unwrap_or(phase.description.as_str());
                log_phase_start_console!(
                    snapshot.current_phase_index + 1,
                    snapshot.enabled_phases.len(),
                    phase.label,
                    detail
                );
            }
            self.phase = Some(snapshot.current_phase_index);
        }

        if snapshot.progress_percent != self.progress {
            if let Some(percent) = snapshot.progress_percent {
                log_progress!(percent, snapshot.message.as_deref().unwrap_or(""));
            }
            self.progress = snapshot.progress_percent;
        }

        let status = snapshot.status();
        if self.status != Some(status) {
            match status {
                GenerationStatus::Paused => {
                    log_warning!("Waiting for review");
                }
                GenerationStatus::Completed => {
                    log_info!("Generation completed");
                }
                GenerationStatus::Failed => {
                    log_warning!("Generation failed");
                }
                _ => {}
            }
            self.status = Some(status);
        }
    }
}
