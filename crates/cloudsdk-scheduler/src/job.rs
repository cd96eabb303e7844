use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::{CancellationToken, TaskError};

/// Lifecycle of a scheduled job.
///
/// `Created → Scheduled → Waiting → Running → Done`. A job cancelled before it starts goes
/// straight to `Done`. `Done` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Created,
    Scheduled,
    /// Dequeued by the worker but blocked on a resource (for example a lock).
    Waiting,
    Running,
    Done,
}

struct JobSlot<T> {
    state: JobState,
    result: Option<Result<T, TaskError>>,
}

struct JobShared<T> {
    name: String,
    token: CancellationToken,
    slot: Mutex<JobSlot<T>>,
    changed: Condvar,
}

/// Observer side of a scheduled job. Cheap to clone.
pub struct JobHandle<T> {
    shared: Arc<JobShared<T>>,
}

impl<T> Clone for JobHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

impl<T> JobHandle<T> {
    pub(crate) fn new(name: String, token: CancellationToken) -> Self {
        Self {
            shared: Arc::new(JobShared {
                name,
                token,
                slot: Mutex::new(JobSlot {
                    state: JobState::Created,
                    result: None,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> JobState {
        self.shared.slot.lock().state
    }

    pub fn is_done(&self) -> bool {
        self.state() == JobState::Done
    }

    pub fn token(&self) -> CancellationToken {
        self.shared.token.clone()
    }

    /// Request cancellation.
    ///
    /// A job that has not been dequeued yet finishes immediately with [`TaskError::Cancelled`];
    /// a job that already started observes the token at its next checkpoint.
    pub fn cancel(&self) {
        self.shared.token.cancel();
        let mut slot = self.shared.slot.lock();
        if matches!(slot.state, JobState::Created | JobState::Scheduled) {
            slot.state = JobState::Done;
            slot.result = Some(Err(TaskError::Cancelled));
            self.shared.changed.notify_all();
        }
    }

    /// Blocks until `pred` holds for the job state or `timeout` elapses. Returns whether the
    /// predicate was satisfied.
    pub fn wait_until(&self, timeout: Duration, pred: impl Fn(JobState) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        while !pred(slot.state) {
            if self.shared.changed.wait_until(&mut slot, deadline).timed_out() {
                return pred(slot.state);
            }
        }
        true
    }

    pub(crate) fn set_state(&self, state: JobState) {
        let mut slot = self.shared.slot.lock();
        if slot.state != JobState::Done {
            slot.state = state;
            self.shared.changed.notify_all();
        }
    }

    /// Moves a queued job to `Waiting`. Returns `false` when the job must not run, either because
    /// it already finished (cancelled while queued) or because its token fired.
    pub(crate) fn begin(&self) -> bool {
        let mut slot = self.shared.slot.lock();
        if slot.state == JobState::Done {
            return false;
        }
        if self.shared.token.is_cancelled() {
            slot.state = JobState::Done;
            slot.result = Some(Err(TaskError::Cancelled));
            self.shared.changed.notify_all();
            return false;
        }
        slot.state = JobState::Waiting;
        self.shared.changed.notify_all();
        true
    }

    pub(crate) fn complete(&self, result: Result<T, TaskError>) {
        let mut slot = self.shared.slot.lock();
        if slot.state == JobState::Done {
            return;
        }
        slot.state = JobState::Done;
        slot.result = Some(result);
        self.shared.changed.notify_all();
    }
}

impl<T: Clone> JobHandle<T> {
    /// Blocks until the job is done and returns its result.
    pub fn join(&self) -> Result<T, TaskError> {
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(result) = slot.result.as_ref() {
                return result.clone();
            }
            self.shared.changed.wait(&mut slot);
        }
    }

    pub fn join_timeout(&self, timeout: Duration) -> Option<Result<T, TaskError>> {
        if self.wait_until(timeout, |state| state == JobState::Done) {
            self.result()
        } else {
            None
        }
    }

    /// The result of a finished job, `None` while it is still pending.
    pub fn result(&self) -> Option<Result<T, TaskError>> {
        self.shared.slot.lock().result.clone()
    }
}

/// Handed to the job body while it runs on the worker.
pub struct JobContext<T> {
    handle: JobHandle<T>,
}

impl<T> JobContext<T> {
    pub(crate) fn new(handle: JobHandle<T>) -> Self {
        Self { handle }
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.handle.shared.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.shared.token.is_cancelled()
    }

    /// Marks the end of the `Waiting` phase.
    pub fn mark_running(&self) {
        self.handle.set_state(JobState::Running);
    }
}
