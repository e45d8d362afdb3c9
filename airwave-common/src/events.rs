//! Job progress events and the broadcast bus that carries them.
//!
//! Grounded on the teacher workspace's `EventBus` (a thin wrapper over
//! `tokio::sync::broadcast`), reworked from a playback-event enum into the
//! progress/terminal-state events the long-running job controller (C9)
//! needs: `(current, total, message)` updates terminating in one of
//! `{completed, failed, cancelled}`.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Terminal/running state of a long-running job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// A progress update for one job, identified by `task_id`.
///
/// Emitted at a rate bounded by the job controller (spec: "a job emits
/// `(current, total, message)` at a rate <= 2 Hz"); `current` is
/// monotonically non-decreasing within a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub task_id: Uuid,
    pub current: u64,
    pub total: u64,
    pub message: String,
    pub state: JobState,
}

impl JobProgress {
    pub fn running(task_id: Uuid, current: u64, total: u64, message: impl Into<String>) -> Self {
        Self {
            task_id,
            current,
            total,
            message: message.into(),
            state: JobState::Running,
        }
    }

    pub fn terminal(task_id: Uuid, current: u64, total: u64, state: JobState, message: impl Into<String>) -> Self {
        debug_assert_ne!(state, JobState::Running);
        Self {
            task_id,
            current,
            total,
            message: message.into(),
            state,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state != JobState::Running
    }
}

/// Central event distribution bus for job progress.
///
/// Uses `tokio::broadcast` internally: publish is non-blocking, slow
/// subscribers lag rather than block producers, and subscribers are cleaned
/// up automatically on drop.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobProgress>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a progress event. Errors (no subscribers) are not fatal to
    /// the producer, so callers typically discard the result with `.ok()`.
    pub fn emit(&self, event: JobProgress) -> Result<usize, broadcast::error::SendError<JobProgress>> {
        self.tx.send(event)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgress> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_emitted_progress() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let task_id = Uuid::new_v4();

        bus.emit(JobProgress::running(task_id, 1, 10, "scanning")).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.task_id, task_id);
        assert_eq!(received.current, 1);
        assert!(!received.is_terminal());
    }

    #[tokio::test]
    async fn terminal_event_marks_is_terminal() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let task_id = Uuid::new_v4();

        bus.emit(JobProgress::terminal(task_id, 10, 10, JobState::Completed, "done")).unwrap();

        let received = rx.recv().await.unwrap();
        assert!(received.is_terminal());
    }
}
