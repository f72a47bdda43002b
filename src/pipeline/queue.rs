//! FIFO job queue drained by exactly one consumer thread.
//!
//! The synthesis engine is an exclusive resource, so jobs never overlap:
//! producers enqueue without blocking and the single consumer runs each job
//! to a terminal state before claiming the next.

use crate::error::{NarrateError, Result};
use crate::job::{JobEvent, JobId, JobOutcome, JobState, JobSummary, SynthesisJob};
use crate::pipeline::runner::JobRunner;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Finished jobs whose state and outcome stay queryable.
pub const HISTORY_LIMIT: usize = 1024;

struct QueuedJob {
    id: JobId,
    job: SynthesisJob,
}

#[derive(Default)]
struct Shared {
    /// Jobs not yet claimed by the consumer, in FIFO order.
    pending: Mutex<VecDeque<JobSummary>>,
    states: Mutex<HashMap<JobId, JobState>>,
    outcomes: Mutex<HashMap<JobId, JobOutcome>>,
    /// Finished jobs, oldest first, for trimming `states` and `outcomes`.
    finished: Mutex<VecDeque<JobId>>,
    history_limit: usize,
    /// Enqueued jobs that have not reached a terminal state.
    outstanding: Mutex<usize>,
    idle: Condvar,
    events: Option<Sender<JobEvent>>,
}

impl Shared {
    fn publish(&self, event: JobEvent) {
        if let Some(tx) = &self.events
            && tx.try_send(event).is_err()
        {
            debug!("event receiver gone, dropping job event");
        }
    }

    fn set_state(&self, id: JobId, state: JobState) {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, state);
        self.publish(JobEvent::StateChanged { id, state });
    }

    fn finish(&self, outcome: JobOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(outcome.id, outcome.clone());
        self.forget_oldest(outcome.id);
        self.publish(JobEvent::Finished(outcome));

        let mut outstanding = self.outstanding.lock().unwrap_or_else(|e| e.into_inner());
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            self.idle.notify_all();
        }
    }

    /// Records `id` as finished and drops the oldest finished jobs beyond
    /// the history limit.
    fn forget_oldest(&self, id: JobId) {
        let mut finished = self.finished.lock().unwrap_or_else(|e| e.into_inner());
        finished.push_back(id);
        while finished.len() > self.history_limit {
            let Some(old) = finished.pop_front() else { break };
            self.states
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&old);
            self.outcomes
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&old);
            debug!(job = %old, "job history trimmed");
        }
    }
}

/// Serializing job queue with inspection.
///
/// States and outcomes of the most recent [`HISTORY_LIMIT`] finished jobs
/// remain queryable.
pub struct JobQueue {
    sender: Option<Sender<QueuedJob>>,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    next_id: AtomicU64,
}

impl JobQueue {
    /// Starts the consumer thread.
    pub fn start(runner: JobRunner) -> Self {
        Self::spawn(runner, None)
    }

    /// Starts the consumer thread and publishes progress on `events`.
    pub fn with_events(runner: JobRunner, events: Sender<JobEvent>) -> Self {
        Self::spawn(runner, Some(events))
    }

    fn spawn(runner: JobRunner, events: Option<Sender<JobEvent>>) -> Self {
        let (tx, rx) = unbounded();
        let shared = Arc::new(Shared {
            events,
            history_limit: HISTORY_LIMIT,
            ..Default::default()
        });
        let worker_shared = Arc::clone(&shared);
        let handle = thread::spawn(move || consume(runner, rx, worker_shared));

        Self {
            sender: Some(tx),
            shared,
            handle: Some(handle),
            next_id: AtomicU64::new(1),
        }
    }

    /// Appends a job. Fails once the queue is shutting down.
    pub fn enqueue(&self, job: SynthesisJob) -> Result<JobId> {
        let sender = self.sender.as_ref().ok_or_else(|| NarrateError::Queue {
            message: "queue is shut down".to_string(),
        })?;

        let title = job.title.clone();

        // Held until the job is on the channel so waiting order matches
        // run order across producers.
        let mut pending = self.shared.pending.lock().unwrap_or_else(|e| e.into_inner());
        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));

        *self
            .shared
            .outstanding
            .lock()
            .unwrap_or_else(|e| e.into_inner()) += 1;
        pending.push_back(job.summary(id));
        self.shared
            .states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, JobState::Queued);
        self.shared.publish(JobEvent::Enqueued {
            id,
            title: title.clone(),
        });

        if sender.send(QueuedJob { id, job }).is_err() {
            pending.retain(|s| s.id != id);
            drop(pending);
            self.shared.finish(JobOutcome {
                id,
                title,
                state: JobState::Failed,
                final_path: None,
                error: Some("worker stopped".to_string()),
            });
            return Err(NarrateError::Queue {
                message: "worker thread is not running".to_string(),
            });
        }
        drop(pending);

        info!(job = %id, %title, "job enqueued");
        Ok(id)
    }

    /// Copy of the jobs still waiting, oldest first. The job in flight is
    /// not included.
    pub fn snapshot(&self) -> Vec<JobSummary> {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn status(&self, id: JobId) -> Option<JobState> {
        self.shared
            .states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .copied()
    }

    pub fn outcome(&self, id: JobId) -> Option<JobOutcome> {
        self.shared
            .outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Blocks until every enqueued job has reached a terminal state.
    pub fn wait_idle(&self) {
        let mut outstanding = self
            .shared
            .outstanding
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        while *outstanding > 0 {
            outstanding = self
                .shared
                .idle
                .wait(outstanding)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Stops accepting jobs, runs everything already queued, and joins the
    /// consumer thread.
    pub fn shutdown(&mut self) -> Result<()> {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            handle.join().map_err(|_| NarrateError::Queue {
                message: "worker thread panicked".to_string(),
            })?;
        }
        Ok(())
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "queue shutdown failed");
        }
    }
}

fn consume(mut runner: JobRunner, rx: Receiver<QueuedJob>, shared: Arc<Shared>) {
    while let Ok(QueuedJob { id, job }) = rx.recv() {
        {
            let mut pending = shared.pending.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(pos) = pending.iter().position(|s| s.id == id) {
                pending.remove(pos);
            }
        }

        // A panicking job must still reach a terminal state or `wait_idle`
        // would never return.
        let run = panic::catch_unwind(AssertUnwindSafe(|| {
            runner.run(id, &job, |state| shared.set_state(id, state))
        }));
        let outcome = run.unwrap_or_else(|_| {
            error!(job = %id, "job panicked");
            shared.set_state(id, JobState::Failed);
            JobOutcome {
                id,
                title: job.title.clone(),
                state: JobState::Failed,
                final_path: None,
                error: Some("job panicked".to_string()),
            }
        });
        info!(job = %id, state = %outcome.state, "job finished");
        shared.finish(outcome);
    }
    debug!("job queue drained, consumer exiting");
}
