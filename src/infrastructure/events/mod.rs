//! `EngineEvent`: the engine's observability channel, analogous to the
//! teacher's `SchaltEvent`/`emit_event` but broadcast over a `tokio`
//! channel rather than through a `tauri::AppHandle` — there is no UI
//! process on the other end, only log subscribers and (eventually) the
//! HTTP layer's own diagnostics.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EngineEvent {
    SessionLaunched { session_id: String, branch: String },
    SessionResumed { session_id: String },
    SessionClosed { session_id: String, status: String },
    SessionReactivated { session_id: String },
    WorktreeDeleted { session_id: String },
    ConflictRecorded { session_id: String, files: Vec<String> },
    SyncCompleted { session_id: String },
    MergeCompleted { session_id: String },
    SessionsDiscovered { project_id: String, count: usize },
    StalePurgeCompleted { count: u64 },
    ReconciliationTick { reconciled: usize },
}

impl EngineEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            EngineEvent::SessionLaunched { .. } => "session.launched",
            EngineEvent::SessionResumed { .. } => "session.resumed",
            EngineEvent::SessionClosed { .. } => "session.closed",
            EngineEvent::SessionReactivated { .. } => "session.reactivated",
            EngineEvent::WorktreeDeleted { .. } => "session.worktree_deleted",
            EngineEvent::ConflictRecorded { .. } => "session.conflict_recorded",
            EngineEvent::SyncCompleted { .. } => "session.sync_completed",
            EngineEvent::MergeCompleted { .. } => "session.merge_completed",
            EngineEvent::SessionsDiscovered { .. } => "sessions.discovered",
            EngineEvent::StalePurgeCompleted { .. } => "sessions.stale_purged",
            EngineEvent::ReconciliationTick { .. } => "sessions.reconciliation_tick",
        }
    }
}

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast sender shared by the orchestrator, reconciler, and discoverer.
/// Cloning is cheap (it's a handle); subscribers that lag behind the
/// capacity silently miss events rather than blocking producers, matching
/// `broadcast`'s default semantics.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Best-effort emit: logged regardless of whether anyone is listening,
    /// mirroring the teacher's `emit_event` tolerance for a dropped UI.
    pub fn emit(&self, event: EngineEvent) {
        log::debug!("event: {} {:?}", event.topic(), event);
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
