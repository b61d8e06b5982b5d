//! Status engine: the single writer of [`WorkflowSnapshot`]
//!
//! Events are applied strictly in arrival order. Each one may add review
//! evidence, which can change the enabled phase list; the snapshot is then
//! rebased onto the new list before the reducer runs. Every resulting
//! snapshot replaces the previous one on a watch channel.

use chrono::Utc;
use generation_status_sdk::{PhaseDefinition, SnapshotSource, StatusEvent, WorkflowSnapshot};
use tokio::sync::{mpsc, watch};

use crate::catalog::PhaseCatalog;
use crate::channel::ChannelEvent;
use crate::enablement::{self, ReviewEvidence, ReviewSettings};
use crate::gate::ReadinessGate;
use crate::mapper;

/// Host-side inputs that arrive outside the status stream
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    SetSettings(ReviewSettings),
    SetActiveReview(bool),
}

pub struct StatusEngine {
    catalog: PhaseCatalog,
    settings: ReviewSettings,
    evidence: ReviewEvidence,
    enabled: Vec<PhaseDefinition>,
    snapshot: watch::Sender<WorkflowSnapshot>,
}

impl StatusEngine {
    pub fn new(catalog: PhaseCatalog, settings: ReviewSettings) -> Self {
        let evidence = ReviewEvidence::default();
        let enabled = enablement::resolve(&catalog, &settings, &evidence);
        let (snapshot, _) = watch::channel(WorkflowSnapshot::initial(enabled.clone()));
        Self {
            catalog,
            settings,
            evidence,
            enabled,
            snapshot,
        }
    }

    pub fn catalog(&self) -> &PhaseCatalog {
        &self.catalog
    }

    pub fn enabled_phases(&self) -> &[PhaseDefinition] {
        &self.enabled
    }

    pub fn evidence(&self) -> ReviewEvidence {
        self.evidence
    }

    /// Apply one status event; returns whether a new snapshot was published
    pub fn apply(&mut self, event: &StatusEvent) -> bool {
        if event.is_empty() {
            tracing::debug!("empty status event discarded");
            return false;
        }
        if let Some(progress) = event.progress_percent.filter(|p| !p.is_finite()) {
            tracing::warn!(progress, "status event with invalid progress discarded");
            return false;
        }

        let prev = self.snapshot.borrow().clone();

        if mapper::is_restart(&self.enabled, event) {
            // a new run keeps only what the host told us
            self.evidence = ReviewEvidence {
                active_review_exists: self.evidence.active_review_exists,
                ..Default::default()
            };
        } else if prev.terminal.is_some() {
            tracing::debug!(
                terminal = ?prev.terminal,
                step = ?event.backend_step_id,
                "status event after terminal state discarded"
            );
            return false;
        }
        self.evidence = self.evidence.merge(self.observed_evidence(event));

        let base = self.rebased(&prev);
        let next = mapper::reduce(&base, event, &self.enabled);
        self.publish(&prev, next)
    }

    /// Adopt freshly loaded settings
    pub fn set_settings(&mut self, settings: ReviewSettings) -> bool {
        tracing::debug!(
            enable_review = settings.enable_review,
            review_mode = %settings.review_mode,
            "review settings updated"
        );
        self.settings = settings;
        self.refresh()
    }

    /// Host-side knowledge of an active review for this run
    pub fn set_active_review(&mut self, active: bool) -> bool {
        self.evidence.active_review_exists = active;
        self.refresh()
    }

    pub fn handle(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::SetSettings(settings) => self.set_settings(settings),
            EngineCommand::SetActiveReview(active) => self.set_active_review(active),
        }
    }

    /// Consume events until the channel closes
    ///
    /// Readiness carried by events is forwarded to `gate` so gated callers
    /// follow the push stream without polling themselves.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ChannelEvent>,
        mut commands: mpsc::Receiver<EngineCommand>,
        gate: Option<ReadinessGate>,
    ) {
        let mut commands_open = true;

        loop {
            tokio::select! {
                biased;
                command = commands.recv(), if commands_open => match command {
                    Some(command) => {
                        self.handle(command);
                    }
                    None => commands_open = false,
                },
                event = events.recv() => match event {
                    Some(event) => {
                        if let (Some(gate), Some(readiness)) = (gate.as_ref(), event.readiness.clone()) {
                            gate.observe(readiness);
                        }
                        self.apply(&event.status);
                    }
                    None => break,
                },
            }
        }

        tracing::debug!("status engine stopped");
    }

    fn observed_evidence(&self, event: &StatusEvent) -> ReviewEvidence {
        let at_review = event
            .backend_step_id
            .as_deref()
            .is_some_and(|step| self.catalog.is_review_step(step));
        ReviewEvidence {
            active_review_exists: false,
            workflow_paused_at_review: at_review && event.paused,
            current_backend_step_is_review: at_review,
        }
    }

    /// Re-resolve the phase list and publish a rebased snapshot if it changed
    fn refresh(&mut self) -> bool {
        let prev = self.snapshot.borrow().clone();
        let next = self.rebased(&prev);
        self.publish(&prev, next)
    }

    fn rebased(&mut self, prev: &WorkflowSnapshot) -> WorkflowSnapshot {
        let phases = enablement::resolve(&self.catalog, &self.settings, &self.evidence);
        if phases == self.enabled {
            return prev.clone();
        }

        tracing::debug!(
            from = self.enabled.len(),
            to = phases.len(),
            "enabled phases changed"
        );
        self.enabled = phases;
        enablement::rebase(prev, &self.enabled)
    }

    fn publish(&self, prev: &WorkflowSnapshot, mut next: WorkflowSnapshot) -> bool {
        if next == *prev {
            return false;
        }

        if next.current_phase_index != prev.current_phase_index
            || next.enabled_phases.len() != prev.enabled_phases.len()
        {
            tracing::debug!(
                phase = next.current_phase_index,
                key = ?next.current_phase().map(|p| p.key.as_str()),
                sub_step = ?next.current_sub_step_key,
                status = ?next.status(),
                "phase changed"
            );
        }

        next.updated_at = Utc::now();
        self.snapshot.send_replace(next);
        true
    }
}

impl SnapshotSource for StatusEngine {
    fn current(&self) -> WorkflowSnapshot {
        self.snapshot.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<WorkflowSnapshot> {
        self.snapshot.subscribe()
    }
}
