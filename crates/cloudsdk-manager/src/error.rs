use std::error::Error as StdError;
use std::sync::Arc;

use cloudsdk_process::RunCommandError;
use cloudsdk_scheduler::Cancelled;
use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Outcome of SDK gate operations and modify jobs.
#[derive(Debug, Clone, Error)]
pub enum SdkError {
    /// Cancelled while blocked on the use/modify lock.
    #[error("interrupted while waiting for access to the Cloud SDK")]
    LockAcquisitionInterrupted,

    #[error("{job} failed: {source}")]
    ModificationFailed {
        job: String,
        #[source]
        source: Arc<dyn StdError + Send + Sync + 'static>,
    },

    #[error("{job} was cancelled")]
    Cancelled { job: String },

    #[error("the managed Cloud SDK feature is not enabled")]
    FeatureDisabled,

    #[error("the Cloud SDK is not managed by these tools (sdk.management = \"custom\")")]
    NotManaged,
}

impl SdkError {
    /// `true` for both flavors of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            SdkError::Cancelled { .. } | SdkError::LockAcquisitionInterrupted
        )
    }

    pub(crate) fn failed(job: &str, source: impl Into<BoxError>) -> Self {
        SdkError::ModificationFailed {
            job: job.to_owned(),
            source: Arc::from(source.into()),
        }
    }
}

/// What an [`SdkModifier`](crate::SdkModifier) reports.
#[derive(Debug, Error)]
pub enum ModifyError {
    #[error("modification cancelled")]
    Cancelled,
    #[error(transparent)]
    Failed(BoxError),
}

impl ModifyError {
    pub fn failed(cause: impl Into<BoxError>) -> Self {
        ModifyError::Failed(cause.into())
    }
}

impl From<Cancelled> for ModifyError {
    fn from(_: Cancelled) -> Self {
        ModifyError::Cancelled
    }
}

impl From<RunCommandError> for ModifyError {
    fn from(err: RunCommandError) -> Self {
        if err.is_cancelled() {
            ModifyError::Cancelled
        } else {
            ModifyError::Failed(Box::new(err))
        }
    }
}

impl From<std::io::Error> for ModifyError {
    fn from(err: std::io::Error) -> Self {
        ModifyError::Failed(Box::new(err))
    }
}

#[derive(Debug, Error)]
#[error("panicked: {0}")]
pub(crate) struct ModifierPanicked(pub(crate) String);
