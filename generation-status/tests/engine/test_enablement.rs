//! Enablement resolver: review visibility and range partitioning

use super::common::*;
use generation_status::enablement::{self, range_for, ReviewEvidence, ReviewSettings};
use generation_status::{PhaseCatalog, StatusEngine};
use generation_status_sdk::{SnapshotSource, StatusEvent, WorkflowSnapshot};

#[test]
fn test_ranges_partition_for_every_count() {
    for n in 1..=20 {
        let ranges: Vec<_> = (0..n).map(|i| range_for(i, n)).collect();

        assert_eq!(ranges[0].low, 0, "n={}", n);
        assert_eq!(ranges[n - 1].high, 100, "n={}", n);
        for window in ranges.windows(2) {
            // contiguous, sharing at most the boundary point
            assert_eq!(window[0].high, window[1].low, "n={}", n);
        }
        for range in &ranges {
            assert!(range.low <= range.high, "n={}", n);
        }
    }
}

#[test]
fn test_every_progress_value_has_a_phase() {
    let catalog = PhaseCatalog::survey_generation();
    let phases = enablement::resolve(
        &catalog,
        &ReviewSettings {
            enable_review: true,
            review_mode: String::new(),
        },
        &ReviewEvidence::default(),
    );

    for percent in 0..=100 {
        assert!(
            phases
                .iter()
                .any(|p| p.percent_range.contains(f64::from(percent))),
            "{}% not covered",
            percent
        );
    }
}

#[test]
fn test_active_review_overrides_disabled_settings() {
    let catalog = PhaseCatalog::survey_generation();
    let settings = ReviewSettings {
        enable_review: false,
        review_mode: String::new(),
    };
    let evidence = ReviewEvidence {
        active_review_exists: true,
        ..Default::default()
    };

    let phases = enablement::resolve(&catalog, &settings, &evidence);
    assert!(phases.iter().any(|p| p.conditional));
    assert_eq!(phases.len(), catalog.len());
}

#[test]
fn test_each_evidence_flag_reveals_review() {
    let catalog = PhaseCatalog::survey_generation();
    let flags = [
        ReviewEvidence {
            workflow_paused_at_review: true,
            ..Default::default()
        },
        ReviewEvidence {
            current_backend_step_is_review: true,
            ..Default::default()
        },
    ];
    for evidence in flags {
        let phases = enablement::resolve(&catalog, &ReviewSettings::default(), &evidence);
        assert!(phases.iter().any(|p| p.conditional), "{:?}", evidence);
    }
}

#[test]
fn test_missing_settings_hide_review() {
    let catalog = PhaseCatalog::survey_generation();
    let phases = enablement::resolve(
        &catalog,
        &ReviewSettings::default(),
        &ReviewEvidence::default(),
    );
    assert!(phases.iter().all(|p| !p.conditional));
}

#[test]
fn test_shrinking_phase_list_clamps_instead_of_resetting() {
    let phases = vec![
        phase("a", &["a1"], (0, 25), false),
        phase("review", &["r1"], (25, 50), true),
        phase("b", &["b1"], (50, 75), false),
        phase("c", &["c1"], (75, 100), false),
    ];
    let mut snapshot = WorkflowSnapshot::initial(phases.clone());
    snapshot.current_phase_index = 3;
    snapshot.completed_phase_indices = [0, 1, 2].into_iter().collect();

    let shorter = vec![phases[0].clone(), phases[2].clone()];
    let rebased = enablement::rebase(&snapshot, &shorter);

    assert_eq!(rebased.current_phase_index, 1);
    assert_eq!(rebased.enabled_phases.len(), 2);
    assert!(rebased.is_phase_completed(0));
}

#[test]
fn test_engine_reveals_review_on_active_review() {
    let mut engine = StatusEngine::new(PhaseCatalog::survey_generation(), ReviewSettings::default());
    engine.apply(&StatusEvent::step("build_context", 20.0));
    let before = engine.current();
    assert_eq!(before.enabled_phases.len(), 4);

    assert!(engine.set_active_review(true));
    let after = engine.current();
    assert_eq!(after.enabled_phases.len(), 5);
    assert_eq!(
        after.current_phase().map(|p| p.key.as_str()),
        before.current_phase().map(|p| p.key.as_str())
    );
    assert!(after.updated_at >= before.updated_at);
}
