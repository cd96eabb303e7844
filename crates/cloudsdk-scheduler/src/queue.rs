use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::job::{JobContext, JobHandle};
use crate::{panic_payload_to_string, CancellationToken, JobState, TaskError};

type Work = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("the job queue has been shut down")]
pub struct QueueClosed;

enum Worker {
    Thread {
        tx: Sender<Work>,
        handle: JoinHandle<()>,
    },
    /// Used when no worker thread could be spawned. Work runs on the submitting thread, still one
    /// item at a time.
    Inline,
    Closed,
}

/// FIFO queue drained by a single dedicated worker thread.
///
/// At most one submitted item executes at any instant, no matter how many threads submit work.
pub struct SerialQueue {
    name: String,
    worker: Mutex<Worker>,
    inline_gate: Mutex<()>,
}

impl SerialQueue {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let (tx, rx) = crossbeam_channel::unbounded::<Work>();
        let worker_name = name.clone();
        let spawned = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(&worker_name, rx));

        let worker = match spawned {
            Ok(handle) => Worker::Thread { tx, handle },
            Err(err) => {
                // Thread creation can fail under tight process limits; keep working serially on
                // the caller's thread instead of refusing all work.
                tracing::warn!(
                    target: "cloudsdk.queue",
                    queue = %name,
                    error = %err,
                    "failed to spawn queue worker; running jobs inline"
                );
                Worker::Inline
            }
        };

        Self {
            name,
            worker: Mutex::new(worker),
            inline_gate: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.worker.lock(), Worker::Closed)
    }

    pub fn submit(&self, work: impl FnOnce() + Send + 'static) -> Result<(), QueueClosed> {
        {
            let worker = self.worker.lock();
            match &*worker {
                Worker::Thread { tx, .. } => {
                    return tx.send(Box::new(work)).map_err(|_| QueueClosed);
                }
                Worker::Closed => return Err(QueueClosed),
                Worker::Inline => {}
            }
        }
        let _gate = self.inline_gate.lock();
        run_work(&self.name, Box::new(work));
        Ok(())
    }

    /// Queue `f` as a tracked job.
    ///
    /// The job is `Scheduled` while queued and `Waiting` once dequeued; the body calls
    /// [`JobContext::mark_running`] when it actually starts work. A token that is already
    /// cancelled, or a closed queue, yields a handle that is done with [`TaskError::Cancelled`].
    pub fn schedule<T, F>(
        &self,
        name: impl Into<String>,
        token: CancellationToken,
        f: F,
    ) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&JobContext<T>) -> T + Send + 'static,
    {
        let handle = JobHandle::new(name.into(), token);
        if handle.token().is_cancelled() {
            handle.complete(Err(TaskError::Cancelled));
            return handle;
        }
        handle.set_state(JobState::Scheduled);

        let job = handle.clone();
        let queue = self.name.clone();
        let work = move || {
            if !job.begin() {
                tracing::debug!(
                    target: "cloudsdk.queue",
                    queue = %queue,
                    job = %job.name(),
                    "skipping cancelled job"
                );
                return;
            }
            let cx = JobContext::new(job.clone());
            let result = match catch_unwind(AssertUnwindSafe(|| f(&cx))) {
                Ok(value) => Ok(value),
                Err(panic) => {
                    let message = panic_payload_to_string(&*panic);
                    tracing::error!(
                        target: "cloudsdk.queue",
                        queue = %queue,
                        job = %job.name(),
                        panic = %message,
                        "job panicked"
                    );
                    Err(TaskError::Panicked(message))
                }
            };
            job.complete(result);
        };

        if self.submit(work).is_err() {
            tracing::warn!(
                target: "cloudsdk.queue",
                queue = %self.name,
                job = %handle.name(),
                "queue closed; job will not run"
            );
            handle.complete(Err(TaskError::Cancelled));
        }
        handle
    }

    /// Stops accepting work, lets the worker drain what is already queued, and joins it.
    pub fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.worker.lock(), Worker::Closed);
        if let Worker::Thread { tx, handle } = previous {
            drop(tx);
            if handle.thread().id() == thread::current().id() {
                // Shutting down from inside a job: the worker exits on its own once it returns.
                return;
            }
            if handle.join().is_err() {
                tracing::error!(
                    target: "cloudsdk.queue",
                    queue = %self.name,
                    "queue worker panicked"
                );
            }
        }
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(name: &str, rx: Receiver<Work>) {
    tracing::debug!(target: "cloudsdk.queue", queue = %name, "worker started");
    for work in rx.iter() {
        run_work(name, work);
    }
    tracing::debug!(target: "cloudsdk.queue", queue = %name, "worker stopped");
}

fn run_work(name: &str, work: Work) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(work)) {
        tracing::error!(
            target: "cloudsdk.queue",
            queue = %name,
            panic = %panic_payload_to_string(&*panic),
            "queued work panicked"
        );
    }
}
