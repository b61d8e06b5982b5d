//! Generation session wiring with fake transports

use super::common::*;
use generation_status::channel::{ChannelEvent, ChannelMode};
use generation_status::session::SessionOptions;
use generation_status::task_registry::TaskRegistry;
use generation_status::{GenerationSession, PhaseCatalog, StreamSpec};
use generation_status_sdk::{
    GenerationStatus, SnapshotSource, StatusEvent, Terminal, WorkflowStatusUpdate,
};
use std::time::Duration;

fn options() -> SessionOptions {
    SessionOptions {
        poll_interval: Duration::from_millis(10),
        gate: fast_gate(20),
    }
}

fn survey() -> StreamSpec {
    StreamSpec::Workflow {
        survey_id: "survey-1".to_string(),
    }
}

fn update(step: &str, progress: f64) -> String {
    serde_json::to_string(&WorkflowStatusUpdate {
        current_step: Some(step.to_string()),
        progress: Some(progress),
        status: Some("running".to_string()),
        survey_id: Some("survey-1".to_string()),
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_init_stream_reaches_ready() {
    let connector = FakeConnector::text(&[
        r#"{"type":"model_loading","progress":42,"estimated_seconds":30,"phase":"llm","message":"Loading models"}"#,
        r#"{"type":"models_ready"}"#,
    ]);
    let session = GenerationSession::start(
        PhaseCatalog::survey_generation(),
        StreamSpec::Init,
        transports(
            connector,
            ScriptedPoller::empty(),
            ScriptedProbe::ready(),
            FakeSettings::review(false),
        ),
        options(),
        TaskRegistry::new(),
    )
    .await;

    let terminal = tokio::time::timeout(Duration::from_secs(5), session.wait_for_terminal())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(terminal.status(), GenerationStatus::Completed);
    assert_eq!(terminal.message.as_deref(), Some("Loading models"));
    assert!(!session.readiness().borrow().gated);
    session.shutdown().await;
}

#[tokio::test]
async fn test_workflow_over_push_channel() {
    let connector = FakeConnector::messages(vec![
        Ok(update("analyze_documents", 8.0)),
        Ok(update("generate_questions", 45.0)),
        Ok(update("evaluate_survey", 70.0)),
        Ok(r#"{"status":"completed","survey_id":"survey-1"}"#.to_string()),
    ]);
    let poller = ScriptedPoller::empty();
    let session = GenerationSession::start(
        PhaseCatalog::survey_generation(),
        survey(),
        transports(
            connector,
            poller.clone(),
            ScriptedProbe::ready(),
            FakeSettings::failing(),
        ),
        options(),
        TaskRegistry::new(),
    )
    .await;

    let terminal = tokio::time::timeout(Duration::from_secs(5), session.wait_for_terminal())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(terminal.terminal, Some(Terminal::Completed));
    assert_eq!(terminal.enabled_phases.len(), 4);
    assert_eq!(
        terminal.current_phase().map(|p| p.key.as_str()),
        Some("validation")
    );
    assert_eq!(terminal.completed_phase_indices.len(), 4);
    assert_eq!(poller.polls(), 0);
    session.shutdown().await;
}

#[tokio::test]
async fn test_workflow_falls_back_to_polling() {
    let poller = ScriptedPoller::new(vec![
        ChannelEvent::status(StatusEvent::step("build_context", 20.0)),
        ChannelEvent::status(StatusEvent::step("prompt_review", 30.0).with_paused(true)),
        ChannelEvent::status(StatusEvent::step("generate_outline", 50.0)),
        ChannelEvent::status(StatusEvent::terminal(Terminal::Failed)),
    ]);
    let session = GenerationSession::start(
        PhaseCatalog::survey_generation(),
        survey(),
        transports(
            FakeConnector::failing(),
            poller.clone(),
            ScriptedProbe::ready(),
            FakeSettings::review(false),
        ),
        options(),
        TaskRegistry::new(),
    )
    .await;

    let terminal = tokio::time::timeout(Duration::from_secs(5), session.wait_for_terminal())
        .await
        .unwrap()
        .unwrap();

    // the review step revealed the conditional phase despite settings
    assert_eq!(terminal.enabled_phases.len(), 5);
    assert_eq!(terminal.status(), GenerationStatus::Failed);
    assert_eq!(
        terminal.current_phase().map(|p| p.key.as_str()),
        Some("generation")
    );
    assert_eq!(poller.polls(), 4);
    session.shutdown().await;
}

#[tokio::test]
async fn test_settings_enable_review_phase() {
    let session = GenerationSession::start(
        PhaseCatalog::survey_generation(),
        survey(),
        transports(
            FakeConnector::pending(),
            ScriptedPoller::empty(),
            ScriptedProbe::ready(),
            FakeSettings::review(true),
        ),
        options(),
        TaskRegistry::new(),
    )
    .await;

    let mut snapshots = session.snapshots();
    tokio::time::timeout(
        Duration::from_secs(5),
        snapshots.wait_for(|s| s.enabled_phases.len() == 5),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(session.current().enabled_phases[1].key, "prompt_review");
    session.shutdown().await;
}

#[tokio::test]
async fn test_active_review_reveals_phase() {
    let session = GenerationSession::start(
        PhaseCatalog::survey_generation(),
        survey(),
        transports(
            FakeConnector::pending(),
            ScriptedPoller::empty(),
            ScriptedProbe::ready(),
            FakeSettings::failing(),
        ),
        options(),
        TaskRegistry::new(),
    )
    .await;
    assert_eq!(session.current().enabled_phases.len(), 4);

    session.set_active_review(true).await;

    let mut snapshots = session.snapshots();
    tokio::time::timeout(
        Duration::from_secs(5),
        snapshots.wait_for(|s| s.enabled_phases.len() == 5),
    )
    .await
    .unwrap()
    .unwrap();
    session.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_channel_and_tasks() {
    let connector = FakeConnector::pending();
    let open = connector.open_flag();
    let registry = TaskRegistry::new();
    let session = GenerationSession::start(
        PhaseCatalog::survey_generation(),
        survey(),
        transports(
            connector,
            ScriptedPoller::empty(),
            ScriptedProbe::ready(),
            FakeSettings::review(false),
        ),
        options(),
        registry.clone(),
    )
    .await;

    let mut mode = session.mode();
    tokio::time::timeout(
        Duration::from_secs(5),
        mode.wait_for(|m| *m == ChannelMode::Push),
    )
    .await
    .unwrap()
    .unwrap();

    session.shutdown().await;
    assert_eq!(registry.running(&session.id()).await, 0);
    assert!(session.gate().is_cancelled());

    // aborted tasks drop the push stream once the runtime gets to them
    tokio::time::timeout(Duration::from_secs(5), async {
        while open.load(std::sync::atomic::Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_shutdown_lets_settings_request_finish() {
    let settings = FakeSettings::slow(Duration::from_millis(300));
    let session = GenerationSession::start(
        PhaseCatalog::survey_generation(),
        survey(),
        transports(
            FakeConnector::pending(),
            ScriptedPoller::empty(),
            ScriptedProbe::ready(),
            settings.clone(),
        ),
        options(),
        TaskRegistry::new(),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    session.shutdown().await;
    assert_eq!(settings.finished(), 0);

    tokio::time::timeout(Duration::from_secs(5), async {
        while settings.finished() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}
