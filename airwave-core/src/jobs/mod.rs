//! Job Controller (C9): cancellable, progress-reporting execution for
//! scan/import/discovery/rematch/back-fill (§4.9).
//!
//! Progress is carried on `airwave_common::events::EventBus`, the same
//! broadcast-channel bus the teacher uses for playback events. Cancellation
//! is cooperative via `tokio_util::sync::CancellationToken`, checked by
//! each job body at the start of every unit of work.

use airwave_common::events::{EventBus, JobProgress, JobState};
use airwave_common::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Handed to a job's body; reports progress and exposes the cancel flag.
#[derive(Clone)]
pub struct JobHandle {
    task_id: Uuid,
    total: u64,
    current: Arc<AtomicU64>,
    cancel: CancellationToken,
    bus: EventBus,
    latest: Arc<Mutex<JobProgress>>,
    last_emit: Arc<Mutex<Instant>>,
}

/// Minimum spacing between progress broadcasts (§4.9: "a rate <= 2 Hz").
const MIN_EMIT_INTERVAL: Duration = Duration::from_millis(500);

impl JobHandle {
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Report progress. `current` must be monotonically non-decreasing
    /// within a job; broadcast is rate-limited, but the latest value is
    /// always recorded so a late `task_status` poll sees it.
    pub fn report(&self, current: u64, message: impl Into<String>) {
        self.current.store(current, Ordering::SeqCst);
        let progress = JobProgress::running(self.task_id, current, self.total, message);
        *self.latest.lock().unwrap() = progress.clone();

        let mut last = self.last_emit.lock().unwrap();
        if last.elapsed() >= MIN_EMIT_INTERVAL {
            *last = Instant::now();
            let _ = self.bus.emit(progress);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub state: JobState,
    pub message: String,
}

struct JobRecord {
    latest: Arc<Mutex<JobProgress>>,
    cancel: CancellationToken,
}

/// Owns every in-flight and completed (within-process) job.
#[derive(Clone)]
pub struct JobController {
    bus: EventBus,
    jobs: Arc<Mutex<HashMap<Uuid, JobRecord>>>,
}

impl JobController {
    pub fn new(bus: EventBus) -> Self {
        Self { bus, jobs: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Start a job. `body` receives a `JobHandle` and must check
    /// `is_cancelled()` at the start of every unit of work; its `Result`
    /// maps to `Completed` on `Ok`, `Failed` on `Err` (unless cancellation
    /// was observed, in which case it maps to `Cancelled` regardless).
    pub fn spawn<F, Fut>(&self, total: u64, body: F) -> Uuid
    where
        F: FnOnce(JobHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let task_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let latest = Arc::new(Mutex::new(JobProgress::running(task_id, 0, total, "queued")));

        self.jobs.lock().unwrap().insert(task_id, JobRecord { latest: latest.clone(), cancel: cancel.clone() });

        let handle = JobHandle {
            task_id,
            total,
            current: Arc::new(AtomicU64::new(0)),
            cancel: cancel.clone(),
            bus: self.bus.clone(),
            latest: latest.clone(),
            last_emit: Arc::new(Mutex::new(Instant::now() - MIN_EMIT_INTERVAL)),
        };

        let bus = self.bus.clone();
        tokio::spawn(async move {
            let result = body(handle.clone()).await;
            let current = handle.current.load(Ordering::SeqCst);

            let terminal = if cancel.is_cancelled() {
                JobProgress::terminal(task_id, current, total, JobState::Cancelled, "cancelled")
            } else {
                match result {
                    Ok(()) => JobProgress::terminal(task_id, current, total, JobState::Completed, "completed"),
                    Err(e) => JobProgress::terminal(task_id, current, total, JobState::Failed, e.to_string()),
                }
            };

            *latest.lock().unwrap() = terminal.clone();
            let _ = bus.emit(terminal);
        });

        task_id
    }

    /// Latest known state for `task_id`, whether or not a subscriber is
    /// listening right now.
    pub fn status(&self, task_id: Uuid) -> Result<JobProgress> {
        let jobs = self.jobs.lock().unwrap();
        let record = jobs.get(&task_id).ok_or_else(|| Error::NotFound(format!("job {task_id}")))?;
        let progress = record.latest.lock().unwrap().clone();
        Ok(progress)
    }

    /// Signal cooperative cancellation. Idempotent: cancelling twice, or
    /// cancelling a job that already finished, is not an error.
    pub fn cancel(&self, task_id: Uuid) -> Result<()> {
        let jobs = self.jobs.lock().unwrap();
        let record = jobs.get(&task_id).ok_or_else(|| Error::NotFound(format!("job {task_id}")))?;
        record.cancel.cancel();
        Ok(())
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<JobProgress> {
        self.bus.subscribe()
    }
}

/// Fixed-size batches for discovery/rematch (§4.9; default 500, §6
/// `DISCOVERY_BATCH_SIZE`). The same code path must serve both initial
/// discovery and post-alias rematch.
pub fn batches<T>(items: &[T], size: usize) -> impl Iterator<Item = &[T]> {
    items.chunks(size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn job_reports_progress_and_completes() {
        let controller = JobController::new(EventBus::new(16));
        let mut rx = controller.subscribe();

        let task_id = controller.spawn(10, |handle| async move {
            for i in 1..=10 {
                handle.report(i, "working");
            }
            Ok(())
        });

        loop {
            let event = rx.recv().await.unwrap();
            if event.task_id == task_id && event.is_terminal() {
                assert_eq!(event.state, JobState::Completed);
                break;
            }
        }

        let status = controller.status(task_id).unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.current, 10);
    }

    #[tokio::test]
    async fn cancel_is_observed_cooperatively() {
        let controller = JobController::new(EventBus::new(16));
        let mut rx = controller.subscribe();

        let task_id = controller.spawn(100, |handle| async move {
            for i in 1..=100u64 {
                if handle.is_cancelled() {
                    return Ok(());
                }
                handle.report(i, "working");
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok(())
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        controller.cancel(task_id).unwrap();

        loop {
            let event = rx.recv().await.unwrap();
            if event.task_id == task_id && event.is_terminal() {
                assert_eq!(event.state, JobState::Cancelled);
                break;
            }
        }
    }

    #[tokio::test]
    async fn failed_job_reports_reason() {
        let controller = JobController::new(EventBus::new(16));
        let mut rx = controller.subscribe();

        let task_id = controller.spawn(1, |_handle| async move {
            Err(Error::Internal("boom".to_string()))
        });

        loop {
            let event = rx.recv().await.unwrap();
            if event.task_id == task_id && event.is_terminal() {
                assert_eq!(event.state, JobState::Failed);
                assert!(event.message.contains("boom"));
                break;
            }
        }
    }

    #[test]
    fn batches_splits_into_fixed_size_chunks() {
        let items: Vec<i32> = (0..1250).collect();
        let chunks: Vec<&[i32]> = batches(&items, 500).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 500);
        assert_eq!(chunks[2].len(), 250);
    }
}
