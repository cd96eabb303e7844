//! Gate between use and modification of a local Google Cloud SDK installation.
//!
//! Anything that runs SDK tools holds the read side of a [`UseModifyLock`]; anything that
//! installs or upgrades the SDK runs as a [`ModifyJob`] holding the write side. Jobs are
//! serialized on a per-manager worker thread, see [`CloudSdkManager`].

mod error;
mod gcloud;
mod install;
mod job;
mod locate;
mod lock;
mod manager;
mod output;

pub use cloudsdk_scheduler::{CancellationToken, JobState};
pub use error::{BoxError, ModifyError, SdkError};
pub use gcloud::{GcloudManagedSdk, MissingInstaller};
pub use install::{
    InstallModifier, ManagedSdk, NotInstalled, SdkComponent, UpdateModifier, INSTALL_JOB_NAME,
    UPDATE_JOB_NAME,
};
pub use job::{ModifyContext, ModifyJob, ModifyJobHandle, SdkModifier, MODIFY_STARTING_MESSAGE};
pub use locate::{gcloud_path, SdkDiscoveryError, SdkInstallation, CLOUDSDK_ROOT_ENV_VAR};
pub use lock::{ModifyGuard, UseGuard, UseModifyLock};
pub use manager::CloudSdkManager;
pub use output::{MemorySink, OutputSink, SharedSink, StdoutSink, TracingSink};
