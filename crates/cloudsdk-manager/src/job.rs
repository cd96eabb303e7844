use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use cloudsdk_scheduler::{
    panic_payload_to_string, Cancelled, CancellationToken, JobContext, JobHandle, JobState,
    TaskError,
};

use crate::error::{ModifierPanicked, ModifyError, SdkError};
use crate::lock::UseModifyLock;
use crate::output::SharedSink;

/// Written to a job's output once it holds the write lock.
pub const MODIFY_STARTING_MESSAGE: &str =
    "Installing/upgrading the Cloud SDK... (may take several minutes)";

/// The body of a modify job. Runs with exclusive write access to the SDK.
pub trait SdkModifier: Send + 'static {
    fn modify_sdk(&mut self, cx: &ModifyContext) -> Result<(), ModifyError>;
}

struct FnModifier<F>(F);

impl<F> SdkModifier for FnModifier<F>
where
    F: FnMut(&ModifyContext) -> Result<(), ModifyError> + Send + 'static,
{
    fn modify_sdk(&mut self, cx: &ModifyContext) -> Result<(), ModifyError> {
        (self.0)(cx)
    }
}

/// What a modifier sees while it runs.
#[derive(Clone)]
pub struct ModifyContext {
    job: String,
    token: CancellationToken,
    output: Option<SharedSink>,
}

impl ModifyContext {
    pub fn new(job: impl Into<String>, token: CancellationToken, output: Option<SharedSink>) -> Self {
        Self {
            job: job.into(),
            token,
            output,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cooperative checkpoint for long modifiers.
    pub fn check_cancelled(&self) -> Result<(), ModifyError> {
        Cancelled::check(&self.token).map_err(ModifyError::from)
    }

    /// Writes a progress line to the job's output, if it has one.
    pub fn println(&self, line: &str) {
        if let Some(output) = &self.output {
            output.println(line);
        }
    }

    pub fn output(&self) -> Option<SharedSink> {
        self.output.clone()
    }
}

/// A named SDK modification waiting to be scheduled on a manager.
pub struct ModifyJob {
    name: String,
    output: Option<SharedSink>,
    modifier: Box<dyn SdkModifier>,
}

impl std::fmt::Debug for ModifyJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModifyJob")
            .field("name", &self.name)
            .field("has_output", &self.output.is_some())
            .finish_non_exhaustive()
    }
}

impl ModifyJob {
    pub fn new(name: impl Into<String>, modifier: impl SdkModifier) -> Self {
        Self {
            name: name.into(),
            output: None,
            modifier: Box::new(modifier),
        }
    }

    /// A job whose body is the closure `f`.
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnMut(&ModifyContext) -> Result<(), ModifyError> + Send + 'static,
    {
        Self::new(name, FnModifier(f))
    }

    pub fn with_output(mut self, output: SharedSink) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_optional_output(mut self, output: Option<SharedSink>) -> Self {
        self.output = output;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs on the queue worker: take the write lock, run the modifier, release, translate.
    pub(crate) fn run(
        mut self,
        lock: &UseModifyLock,
        cx: &JobContext<Result<(), SdkError>>,
    ) -> Result<(), SdkError> {
        let token = cx.token();
        if token.is_cancelled() {
            return Err(SdkError::Cancelled { job: self.name });
        }

        tracing::debug!(target: "cloudsdk.job", job = %self.name, "waiting for write access");
        let guard = match lock.acquire_write(token) {
            Ok(guard) => guard,
            Err(Cancelled) => {
                tracing::info!(
                    target: "cloudsdk.job",
                    job = %self.name,
                    "cancelled while waiting for write access"
                );
                return Err(SdkError::LockAcquisitionInterrupted);
            }
        };
        cx.mark_running();
        tracing::info!(target: "cloudsdk.job", job = %self.name, "modifying Cloud SDK");

        if let Some(output) = &self.output {
            output.println(MODIFY_STARTING_MESSAGE);
        }

        let modifier = &mut self.modifier;
        let modify_cx = ModifyContext::new(self.name.clone(), token.clone(), self.output.clone());
        let outcome = catch_unwind(AssertUnwindSafe(|| modifier.modify_sdk(&modify_cx)));
        guard.release();

        match outcome {
            Ok(Ok(())) => {
                tracing::info!(target: "cloudsdk.job", job = %self.name, "Cloud SDK modification finished");
                Ok(())
            }
            Ok(Err(ModifyError::Cancelled)) => {
                tracing::info!(target: "cloudsdk.job", job = %self.name, "Cloud SDK modification cancelled");
                Err(SdkError::Cancelled { job: self.name })
            }
            Ok(Err(ModifyError::Failed(cause))) if token.is_cancelled() => {
                tracing::info!(
                    target: "cloudsdk.job",
                    job = %self.name,
                    error = %cause,
                    "Cloud SDK modification failed after cancellation"
                );
                Err(SdkError::Cancelled { job: self.name })
            }
            Ok(Err(ModifyError::Failed(cause))) => {
                tracing::error!(
                    target: "cloudsdk.job",
                    job = %self.name,
                    error = %cause,
                    "Cloud SDK modification failed"
                );
                Err(SdkError::failed(&self.name, cause))
            }
            Err(panic) => {
                let message = panic_payload_to_string(&*panic);
                tracing::error!(
                    target: "cloudsdk.job",
                    job = %self.name,
                    panic = %message,
                    "Cloud SDK modifier panicked"
                );
                Err(SdkError::failed(&self.name, ModifierPanicked(message)))
            }
        }
    }
}

/// Observer side of a scheduled [`ModifyJob`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ModifyJobHandle {
    inner: JobHandle<Result<(), SdkError>>,
}

impl ModifyJobHandle {
    pub(crate) fn new(inner: JobHandle<Result<(), SdkError>>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn state(&self) -> JobState {
        self.inner.state()
    }

    pub fn is_done(&self) -> bool {
        self.inner.is_done()
    }

    pub fn token(&self) -> CancellationToken {
        self.inner.token()
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn wait_until(&self, timeout: Duration, pred: impl Fn(JobState) -> bool) -> bool {
        self.inner.wait_until(timeout, pred)
    }

    /// Blocks until the job is done.
    pub fn join(&self) -> Result<(), SdkError> {
        self.flatten(self.inner.join())
    }

    pub fn join_timeout(&self, timeout: Duration) -> Option<Result<(), SdkError>> {
        self.inner
            .join_timeout(timeout)
            .map(|result| self.flatten(result))
    }

    /// The result of a finished job, `None` while it is pending.
    pub fn result(&self) -> Option<Result<(), SdkError>> {
        self.inner.result().map(|result| self.flatten(result))
    }

    fn flatten(&self, result: Result<Result<(), SdkError>, TaskError>) -> Result<(), SdkError> {
        match result {
            Ok(result) => result,
            Err(TaskError::Cancelled) => Err(SdkError::Cancelled {
                job: self.name().to_owned(),
            }),
            Err(TaskError::Panicked(message)) => {
                Err(SdkError::failed(self.name(), ModifierPanicked(message)))
            }
        }
    }
}
