//! Translation of raw channel payloads into [`ChannelEvent`]s

use generation_status_sdk::{
    InitMessage, LoadingPayload, ReadinessState, StatusEvent, Terminal, WorkflowStatusUpdate,
};
use serde_json::Value;

use super::ChannelEvent;
use crate::error::NormalizeError;

/// Parse one inbound message from either logical stream
///
/// Messages with a `type` field belong to the init stream; everything else
/// is read as a workflow status update.
pub fn normalize(raw: &str) -> Result<ChannelEvent, NormalizeError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| NormalizeError::Json(e.to_string()))?;

    if let Some(kind) = value.get("type").and_then(Value::as_str) {
        let kind = kind.to_string();
        let message: InitMessage =
            serde_json::from_value(value).map_err(|_| NormalizeError::UnknownType(kind))?;
        return from_init(message);
    }

    let update: WorkflowStatusUpdate =
        serde_json::from_value(value).map_err(|e| NormalizeError::Json(e.to_string()))?;
    from_workflow_update(update)
}

pub fn from_init(message: InitMessage) -> Result<ChannelEvent, NormalizeError> {
    match message {
        InitMessage::ModelLoading(payload) => from_loading(payload),
        InitMessage::ModelsReady => Ok(ready_event()),
    }
}

/// "Too early" maps to a running, unpaused event
pub fn from_loading(payload: LoadingPayload) -> Result<ChannelEvent, NormalizeError> {
    check_progress(payload.progress)?;
    let readiness = ReadinessState::from_loading(&payload);
    Ok(ChannelEvent {
        status: StatusEvent {
            backend_step_id: payload.phase,
            progress_percent: payload.progress,
            message: payload.message,
            paused: false,
            terminal: None,
        },
        readiness: Some(readiness),
    })
}

pub fn ready_event() -> ChannelEvent {
    ChannelEvent {
        status: StatusEvent::terminal(Terminal::Completed),
        readiness: Some(ReadinessState::ready()),
    }
}

pub fn from_workflow_update(update: WorkflowStatusUpdate) -> Result<ChannelEvent, NormalizeError> {
    check_progress(update.progress)?;

    let status = StatusEvent {
        backend_step_id: update.current_step.filter(|s| !s.is_empty()),
        progress_percent: update.progress,
        message: update.message,
        paused: update.workflow_paused,
        terminal: update.status.as_deref().and_then(terminal_for_status),
    };
    if status.is_empty() {
        return Err(NormalizeError::Empty);
    }

    Ok(ChannelEvent {
        status,
        readiness: None,
    })
}

/// Backend status strings that end a run
pub fn terminal_for_status(status: &str) -> Option<Terminal> {
    match status.to_ascii_lowercase().as_str() {
        "completed" | "complete" | "done" | "succeeded" | "success" => Some(Terminal::Completed),
        "failed" | "failure" | "error" | "cancelled" | "canceled" => Some(Terminal::Failed),
        _ => None,
    }
}

fn check_progress(progress: Option<f64>) -> Result<(), NormalizeError> {
    match progress {
        Some(p) if !p.is_finite() => Err(NormalizeError::InvalidProgress(p)),
        _ => Ok(()),
    }
}
