//! Enablement resolver for the conditional human-review phase
//!
//! The review phase is shown when the server settings enable it or when the
//! status stream proves a review is happening anyway. The resulting phase
//! list gets evenly redistributed percent ranges.

use generation_status_sdk::{EvaluationSettings, PercentRange, PhaseDefinition, WorkflowSnapshot};
use std::collections::BTreeSet;

use crate::catalog::PhaseCatalog;

/// Server-side review configuration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReviewSettings {
    pub enable_review: bool,
    pub review_mode: String,
}

impl From<EvaluationSettings> for ReviewSettings {
    fn from(settings: EvaluationSettings) -> Self {
        Self {
            enable_review: settings.enable_prompt_review,
            review_mode: settings.prompt_review_mode,
        }
    }
}

/// Live evidence that a review is part of this run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReviewEvidence {
    pub active_review_exists: bool,
    pub workflow_paused_at_review: bool,
    pub current_backend_step_is_review: bool,
}

impl ReviewEvidence {
    pub fn any(&self) -> bool {
        self.active_review_exists
            || self.workflow_paused_at_review
            || self.current_backend_step_is_review
    }

    /// Evidence only accumulates within a run
    pub fn merge(self, other: ReviewEvidence) -> ReviewEvidence {
        ReviewEvidence {
            active_review_exists: self.active_review_exists || other.active_review_exists,
            workflow_paused_at_review: self.workflow_paused_at_review
                || other.workflow_paused_at_review,
            current_backend_step_is_review: self.current_backend_step_is_review
                || other.current_backend_step_is_review,
        }
    }
}

pub fn review_enabled(settings: &ReviewSettings, evidence: &ReviewEvidence) -> bool {
    settings.enable_review || evidence.any()
}

/// Enabled phases in catalog order with redistributed percent ranges
pub fn resolve(
    catalog: &PhaseCatalog,
    settings: &ReviewSettings,
    evidence: &ReviewEvidence,
) -> Vec<PhaseDefinition> {
    let include_review = review_enabled(settings, evidence);
    let mut phases: Vec<PhaseDefinition> = catalog
        .phases()
        .iter()
        .filter(|p| !p.conditional || include_review)
        .cloned()
        .collect();
    redistribute(&mut phases);
    phases
}

/// Phase `i` of `n` gets `[round(i*100/n), round((i+1)*100/n)]`
pub fn redistribute(phases: &mut [PhaseDefinition]) {
    let n = phases.len();
    for (i, phase) in phases.iter_mut().enumerate() {
        phase.percent_range = range_for(i, n);
    }
}

pub fn range_for(index: usize, count: usize) -> PercentRange {
    let bound = |i: usize| ((i as f64) * 100.0 / (count as f64)).round() as u8;
    PercentRange::new(bound(index), bound(index + 1))
}

/// Carry a snapshot over to a changed phase list
///
/// Phases are matched by key. When the active phase is gone the index is
/// clamped to the nearest valid one instead of falling back to zero.
pub fn rebase(prev: &WorkflowSnapshot, phases: &[PhaseDefinition]) -> WorkflowSnapshot {
    let index_of = |old: usize| {
        prev.enabled_phases
            .get(old)
            .and_then(|phase| phases.iter().position(|p| p.key == phase.key))
    };

    let last = phases.len().saturating_sub(1);
    let current = index_of(prev.current_phase_index)
        .unwrap_or_else(|| prev.current_phase_index.min(last));

    let mut completed: BTreeSet<usize> = prev
        .completed_phase_indices
        .iter()
        .filter_map(|&i| index_of(i))
        .collect();
    completed.extend(0..current);

    let current_sub_step_key = phases.get(current).and_then(|phase| {
        prev.current_sub_step_key
            .as_deref()
            .and_then(|key| phase.sub_steps.iter().find(|s| s.key == key))
            .or_else(|| phase.sub_steps.first())
            .map(|s| s.key.clone())
    });

    WorkflowSnapshot {
        enabled_phases: phases.to_vec(),
        current_phase_index: current,
        completed_phase_indices: completed,
        current_sub_step_key,
        ..prev.clone()
    }
}
