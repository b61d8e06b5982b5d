//! Readiness gate: deferral, coalescing, exhaustion and teardown

use super::common::*;
use generation_status::backend::Readiness;
use generation_status::{BackendError, GateError, GateOutcome, ReadinessGate};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::test]
async fn test_too_early_defers_and_completes_once() {
    let probe = ScriptedProbe::new(vec![Ok(Readiness::Ready)]);
    let gate = ReadinessGate::new(probe.clone(), fast_gate(60));
    let requests = AtomicUsize::new(0);
    let completions = AtomicUsize::new(0);

    let requests_ref = &requests;
    let completions_ref = &completions;
    let result: Result<&str, GateError> = gate
        .execute(|| async move {
            let attempt = requests_ref.fetch_add(1, Ordering::SeqCst);
            if attempt == 0 {
                Ok(GateOutcome::TooEarly(loading(42.0, 30.0)))
            } else {
                completions_ref.fetch_add(1, Ordering::SeqCst);
                Ok(GateOutcome::Ready("survey"))
            }
        })
        .await;

    assert_eq!(result, Ok("survey"));
    assert_eq!(requests.load(Ordering::SeqCst), 2);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert_eq!(probe.calls(), 1);
    assert!(!gate.is_gated());
}

#[tokio::test]
async fn test_too_early_publishes_countdown_state() {
    let gate = ReadinessGate::new(ScriptedProbe::always_loading(), fast_gate(1));

    let result: Result<(), GateError> = gate
        .execute(|| async { Ok(GateOutcome::TooEarly(loading(42.0, 30.0))) })
        .await;

    assert_eq!(result, Err(GateError::ModelsNotReady { attempts: 1 }));
    let state = gate.state();
    assert!(state.gated);
    assert_eq!(state.progress_percent, Some(42.0));
    assert_eq!(state.eta_seconds, Some(30.0));
    assert_eq!(state.phase.as_deref(), Some("llm"));
}

#[tokio::test]
async fn test_ungated_request_skips_probe() {
    let probe = ScriptedProbe::always_loading();
    let gate = ReadinessGate::new(probe.clone(), fast_gate(3));

    let result: Result<u32, GateError> = gate
        .execute(|| async { Ok(GateOutcome::Ready(7)) })
        .await;

    assert_eq!(result, Ok(7));
    assert_eq!(probe.calls(), 0);
}

#[tokio::test]
async fn test_request_errors_pass_through() {
    let gate = ReadinessGate::new(ScriptedProbe::ready(), fast_gate(3));

    let result: Result<(), GateError> = gate
        .execute(|| async {
            Err(GateError::Probe(BackendError::Status {
                status: 500,
                body: "boom".to_string(),
            }))
        })
        .await;

    assert!(matches!(result, Err(GateError::Probe(_))));
    assert!(!gate.is_gated());
}

#[tokio::test]
async fn test_concurrent_waiters_share_one_poll_loop() {
    let probe = ScriptedProbe::new(vec![
        Ok(Readiness::Loading(loading(80.0, 1.0))),
        Ok(Readiness::Ready),
    ]);
    let gate = ReadinessGate::new(probe.clone(), fast_gate(10));
    gate.mark_not_ready(&loading(50.0, 2.0));

    let waiters: Vec<_> = (0..5)
        .map(|_| {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_until_ready().await })
        })
        .collect();

    for waiter in waiters {
        let result = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Ok(()));
    }

    assert_eq!(probe.calls(), 2);
    assert!(!gate.is_gated());
}

#[tokio::test]
async fn test_exhaustion_is_a_definitive_error() {
    let probe = ScriptedProbe::always_loading();
    let gate = ReadinessGate::new(probe.clone(), fast_gate(3));
    gate.mark_not_ready(&loading(10.0, 120.0));

    let result = tokio::time::timeout(Duration::from_secs(5), gate.wait_until_ready())
        .await
        .unwrap();

    assert_eq!(result, Err(GateError::ModelsNotReady { attempts: 3 }));
    assert_eq!(probe.calls(), 3);
}

#[tokio::test]
async fn test_probe_failure_is_retried() {
    let probe = ScriptedProbe::new(vec![
        Err(BackendError::Transport("connection reset".to_string())),
        Ok(Readiness::Ready),
    ]);
    let gate = ReadinessGate::new(probe.clone(), fast_gate(5));
    gate.mark_not_ready(&loading(90.0, 1.0));

    let result = tokio::time::timeout(Duration::from_secs(5), gate.wait_until_ready())
        .await
        .unwrap();

    assert_eq!(result, Ok(()));
    assert_eq!(probe.calls(), 2);
}

#[tokio::test]
async fn test_readiness_observed_elsewhere_ends_backoff() {
    let probe = ScriptedProbe::always_loading();
    let mut config = fast_gate(5);
    config.min_delay = Duration::from_secs(30);
    config.max_delay = Duration::from_secs(30);
    let gate = ReadinessGate::new(probe.clone(), config);
    gate.mark_not_ready(&loading(42.0, 30.0));

    let waiter = {
        let gate = gate.clone();
        tokio::spawn(async move { gate.wait_until_ready().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    gate.mark_ready();

    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result, Ok(()));
    assert_eq!(probe.calls(), 0);
}

#[tokio::test]
async fn test_cancel_stops_scheduling_retries() {
    let probe = ScriptedProbe::always_loading();
    let mut config = fast_gate(5);
    config.min_delay = Duration::from_secs(30);
    config.max_delay = Duration::from_secs(30);
    let gate = ReadinessGate::new(probe.clone(), config);
    gate.mark_not_ready(&loading(42.0, 30.0));

    let waiter = {
        let gate = gate.clone();
        tokio::spawn(async move { gate.wait_until_ready().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    gate.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result, Err(GateError::Cancelled));
    assert_eq!(probe.calls(), 0);
    assert!(gate.is_cancelled());
}

#[tokio::test]
async fn test_cancelled_gate_rejects_deferred_request() {
    let gate = ReadinessGate::new(ScriptedProbe::always_loading(), fast_gate(5));
    gate.cancel();

    let calls = AtomicUsize::new(0);
    let calls_ref = &calls;
    let result: Result<(), GateError> = gate
        .execute(|| async move {
            calls_ref.fetch_add(1, Ordering::SeqCst);
            Ok(GateOutcome::TooEarly(loading(5.0, 60.0)))
        })
        .await;

    assert_eq!(result, Err(GateError::Cancelled));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

