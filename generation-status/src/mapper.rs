//! Phase mapper: the progress reducer
//!
//! [`reduce`] is a pure transition from the previous snapshot and one status
//! event to the next snapshot. Transport, timing and publication live
//! elsewhere; the only side effect here is diagnostic logging.

use generation_status_sdk::{PhaseDefinition, StatusEvent, Terminal, WorkflowSnapshot};
use std::collections::BTreeSet;

/// Index of the phase owning `backend_step_id`
pub fn phase_for_step(phases: &[PhaseDefinition], backend_step_id: &str) -> Option<usize> {
    phases.iter().position(|p| p.owns_step(backend_step_id))
}

/// Index of the first phase whose range contains `percent`
pub fn phase_for_progress(phases: &[PhaseDefinition], percent: f64) -> Option<usize> {
    if !percent.is_finite() {
        return None;
    }
    phases.iter().position(|p| p.percent_range.contains(percent))
}

/// Target phase by exact step match, then by range containment
pub fn resolve_target(phases: &[PhaseDefinition], event: &StatusEvent) -> Option<usize> {
    event
        .backend_step_id
        .as_deref()
        .and_then(|step| phase_for_step(phases, step))
        .or_else(|| {
            event
                .progress_percent
                .and_then(|percent| phase_for_progress(phases, percent))
        })
}

/// Zero progress on the first step of the first phase
pub fn is_restart(phases: &[PhaseDefinition], event: &StatusEvent) -> bool {
    let first_step = phases
        .first()
        .and_then(|p| p.sub_steps.first())
        .map(|s| s.backend_step_id.as_str());

    event.is_zero_progress()
        && first_step.is_some()
        && event.backend_step_id.as_deref() == first_step
}

/// Backward-jump guard
pub fn accepts_transition(
    phases: &[PhaseDefinition],
    from: usize,
    to: usize,
    event: &StatusEvent,
) -> bool {
    if to >= from || event.is_zero_progress() {
        return true;
    }
    // leaving human review for the phase right after it
    phases.get(from).map(|p| p.conditional).unwrap_or(false) && to == from + 1
}

/// Produce the snapshot following `prev` once `event` is applied
///
/// `updated_at` is carried over unchanged; the publisher stamps it.
pub fn reduce(
    prev: &WorkflowSnapshot,
    event: &StatusEvent,
    phases: &[PhaseDefinition],
) -> WorkflowSnapshot {
    if phases.is_empty() {
        tracing::warn!("no enabled phases, status event ignored");
        return prev.clone();
    }

    if is_restart(phases, event) {
        tracing::debug!(revision = prev.revision, "workflow restarted");
        let mut restarted = WorkflowSnapshot::initial(phases.to_vec());
        restarted.updated_at = prev.updated_at;
        return settle(restarted, event, phases, 0, 0);
    }

    if prev.terminal.is_some() {
        tracing::debug!(
            terminal = ?prev.terminal,
            step = ?event.backend_step_id,
            "ignoring status event after terminal state"
        );
        return prev.clone();
    }

    let last = phases.len() - 1;
    let from = prev.current_phase_index.min(last);
    let target = resolve_target(phases, event).unwrap_or(from);

    let accepted = if accepts_transition(phases, from, target, event) {
        target
    } else {
        tracing::warn!(
            from,
            to = target,
            step = ?event.backend_step_id,
            progress = ?event.progress_percent,
            "rejected backward phase transition"
        );
        from
    };

    let mut next = prev.clone();
    next.enabled_phases = phases.to_vec();
    next.completed_phase_indices.extend(0..accepted);
    settle(next, event, phases, accepted, prev.revision)
}

/// Fill the fields that depend only on the accepted phase and the event
fn settle(
    mut next: WorkflowSnapshot,
    event: &StatusEvent,
    phases: &[PhaseDefinition],
    accepted: usize,
    revision: u64,
) -> WorkflowSnapshot {
    let phase = &phases[accepted];

    if event.terminal == Some(Terminal::Completed) {
        next.completed_phase_indices = (0..phases.len()).collect::<BTreeSet<_>>();
    }

    next.current_phase_index = accepted;
    next.current_sub_step_key = event
        .backend_step_id
        .as_deref()
        .and_then(|step| phase.sub_step_for(step))
        .or_else(|| phase.sub_steps.first())
        .map(|s| s.key.clone());
    next.paused = event.paused || phase.conditional;
    next.terminal = event.terminal;
    next.progress_percent = merge_progress(next.progress_percent, event);
    if let Some(message) = event.message.as_ref().filter(|m| !m.trim().is_empty()) {
        next.message = Some(message.clone());
    }
    next.revision = revision + 1;
    next
}

/// Displayed progress only moves forward, except on an explicit zero
fn merge_progress(prev: Option<f64>, event: &StatusEvent) -> Option<f64> {
    let incoming = event
        .progress_percent
        .filter(|p| p.is_finite() && (0.0..=100.0).contains(p));

    match (prev, incoming) {
        (_, Some(p)) if p == 0.0 => Some(0.0),
        (Some(old), Some(new)) => Some(old.max(new)),
        (None, Some(new)) => Some(new),
        (old, None) => old,
    }
}
