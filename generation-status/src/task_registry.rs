//! Session lifecycles
//!
//! Every session owns a cancellation token and two kinds of tasks. Stream
//! tasks (channel adapter, engine consumer) watch the token and wind down
//! on their own; they get a grace period before being aborted. Request
//! tasks (gated backend calls) are never aborted: once the token is
//! cancelled the gate schedules no further retries, and a call already on
//! the wire is left to finish.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Runs for the life of the session
    Stream,
    /// One backend call, possibly waiting on readiness
    Request,
}

#[derive(Default)]
struct SessionTasks {
    cancel: CancellationToken,
    streams: Vec<JoinHandle<()>>,
    requests: Vec<JoinHandle<()>>,
}

impl SessionTasks {
    fn live(&self) -> usize {
        self.streams
            .iter()
            .chain(&self.requests)
            .filter(|h| !h.is_finished())
            .count()
    }
}

/// Sessions started by this process, keyed by session id
#[derive(Clone, Default)]
pub struct TaskRegistry {
    sessions: Arc<Mutex<HashMap<Uuid, SessionTasks>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancellation token of `session_id`, created on first use
    pub async fn open(&self, session_id: Uuid) -> CancellationToken {
        let mut sessions = self.sessions.lock().await;
        sessions.entry(session_id).or_default().cancel.clone()
    }

    pub async fn track(&self, session_id: Uuid, kind: TaskKind, handle: JoinHandle<()>) {
        let mut sessions = self.sessions.lock().await;
        let tasks = sessions.entry(session_id).or_default();
        match kind {
            TaskKind::Stream => tasks.streams.push(handle),
            TaskKind::Request => tasks.requests.push(handle),
        }
    }

    /// Tasks of a session that are still tracked and unfinished
    pub async fn running(&self, session_id: &Uuid) -> usize {
        let sessions = self.sessions.lock().await;
        sessions.get(session_id).map(SessionTasks::live).unwrap_or(0)
    }

    pub async fn sessions(&self) -> Vec<Uuid> {
        self.sessions.lock().await.keys().copied().collect()
    }

    /// Cancel a session and wait up to `grace` for its stream tasks
    ///
    /// Stream tasks still running after `grace` are aborted. Request tasks
    /// are detached and run to completion. Returns how many stream tasks
    /// had to be aborted.
    pub async fn close(&self, session_id: &Uuid, grace: Duration) -> usize {
        let tasks = match self.sessions.lock().await.remove(session_id) {
            Some(tasks) => tasks,
            None => return 0,
        };
        tasks.cancel.cancel();

        let pending = tasks.requests.iter().filter(|h| !h.is_finished()).count();
        if pending > 0 {
            tracing::debug!(session = %session_id, pending, "leaving in-flight requests to finish");
        }

        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = 0;
        for mut handle in tasks.streams {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                aborted += 1;
            }
        }
        if aborted > 0 {
            tracing::warn!(session = %session_id, aborted, "session tasks ignored cancellation");
        }
        aborted
    }

    /// Close every session (process shutdown)
    pub async fn close_all(&self, grace: Duration) {
        for session_id in self.sessions().await {
            self.close(&session_id, grace).await;
        }
    }
}
